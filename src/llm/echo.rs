//! Offline backend that answers with the last user message.
//!
//! Selected with `provider = "echo"`. Useful for trying the playground and
//! the chat client without a model server; the stream yields one fragment
//! per word so progressive rendering is visible.

use async_trait::async_trait;
use futures::StreamExt;

use super::{ChatModel, FragmentStream, ModelError};
use crate::models::{ChatMessage, Role};

#[derive(Debug, Default, Clone)]
pub struct EchoModel;

fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// Split into fragments that concatenate back to `text`.
fn fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl ChatModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<String, ModelError> {
        Ok(last_user_text(&messages))
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ModelError> {
        let parts = fragments(&last_user_text(&messages));
        Ok(futures::stream::iter(parts.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_concatenate_to_input() {
        let parts = fragments("hello there world");
        assert_eq!(parts, vec!["hello ", "there ", "world"]);
        assert_eq!(parts.concat(), "hello there world");
    }

    #[tokio::test]
    async fn echoes_last_user_message() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];
        assert_eq!(EchoModel.invoke(messages).await.unwrap(), "second");
    }
}
