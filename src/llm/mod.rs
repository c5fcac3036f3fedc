//! Chat model backends served by `ragserve serve`.
//!
//! [`ChatModel`] is the seam between the HTTP routes and whatever produces
//! the text. Three backends are provided:
//!
//! | Provider | Backend | Streaming wire format |
//! |----------|---------|-----------------------|
//! | `ollama` | [`ollama::OllamaChat`] | NDJSON from `/api/chat` |
//! | `openai` | [`openai::OpenAiChat`] | SSE from `/chat/completions` |
//! | `echo` | [`echo::EchoModel`] | in-process, one fragment per word |

pub mod echo;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::models::ChatMessage;

/// A stream of text fragments in emission order.
pub type FragmentStream = BoxStream<'static, Result<String, ModelError>>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A chat model reachable for one-shot and streaming generation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier shown in logs and the playground.
    fn name(&self) -> &str;

    /// Generate the complete reply.
    async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<String, ModelError>;

    /// Generate the reply as a sequence of fragments.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ModelError>;
}

/// Model input as accepted on the wire: a bare string is one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelInput {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl ModelInput {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            ModelInput::Text(text) => vec![ChatMessage::user(text)],
            ModelInput::Messages(messages) => messages,
        }
    }
}

impl From<&str> for ModelInput {
    fn from(text: &str) -> Self {
        ModelInput::Text(text.to_string())
    }
}

/// Split a byte stream into lines, yielding each complete line (without
/// the trailing newline) as soon as it arrives. A final unterminated line
/// is yielded at the end of the stream.
pub(crate) fn lines<S, E>(bytes: S) -> BoxStream<'static, Result<String, E>>
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures::StreamExt;

    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    futures::stream::unfold(state, |(mut bytes, mut buffer, mut done)| async move {
        loop {
            if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1])
                    .trim_end_matches('\r')
                    .to_string();
                return Some((Ok(text), (bytes, buffer, done)));
            }
            if done {
                if buffer.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&buffer).to_string();
                buffer.clear();
                return Some((Ok(text), (bytes, buffer, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    done = true;
                    buffer.clear();
                    return Some((Err(e), (bytes, buffer, done)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

/// Create the configured chat model backend.
pub fn create_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaChat::new(config, client))),
        "openai" => Ok(Arc::new(openai::OpenAiChat::new(config, client))),
        "echo" => Ok(Arc::new(echo::EchoModel)),
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn byte_stream(
        parts: Vec<Result<&'static str, std::io::Error>>,
    ) -> impl futures::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| bytes::Bytes::from_static(s.as_bytes()))),
        )
    }

    #[tokio::test]
    async fn lines_reassembles_split_chunks() {
        let stream = byte_stream(vec![Ok("ab"), Ok("c\nde"), Ok("f\r\n"), Ok("tail")]);
        let got: Vec<String> = lines(stream).map(|l| l.unwrap()).collect().await;
        assert_eq!(got, vec!["abc", "def", "tail"]);
    }

    #[tokio::test]
    async fn lines_stops_after_error() {
        let stream = byte_stream(vec![
            Ok("one\n"),
            Err(std::io::Error::other("reset")),
            Ok("never\n"),
        ]);
        let got: Vec<Result<String, std::io::Error>> = lines(stream).collect().await;
        assert_eq!(got.len(), 2);
        assert!(got[1].is_err());
    }

    #[test]
    fn text_input_becomes_user_message() {
        let input: ModelInput = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(input.into_messages(), vec![ChatMessage::user("hi")]);
    }

    #[test]
    fn message_list_input_is_kept() {
        let input: ModelInput =
            serde_json::from_str(r#"[{"role":"user","content":"a"},{"role":"assistant","content":"b"}]"#)
                .unwrap();
        assert_eq!(input.into_messages().len(), 2);
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = ModelConfig {
            provider: "mystery".to_string(),
            ..ModelConfig::default()
        };
        assert!(create_model(&config).is_err());
    }
}
