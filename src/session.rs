//! Per-user chat state: history, the active document and turn handling.
//!
//! A turn appends the user message, builds the prompt (RAG when a document
//! is active, plain otherwise), streams the answer from a [`Runnable`] and
//! renders the accumulated text after every fragment. The assistant turn is
//! committed only when the stream completes; a failed stream leaves the
//! partial text rendered and the history without an answer.

use futures::StreamExt;
use std::sync::Arc;

use crate::client::{ClientError, Runnable};
use crate::index::Retriever;
use crate::ingest::{IngestError, Ingestor, UploadedFile};
use crate::llm::ModelInput;
use crate::models::ChatMessage;
use crate::prompt::{build_prompt, Templates};

/// Receives the full text of the answer so far, once per fragment.
pub trait Renderer {
    fn render(&mut self, text: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("retrieval failed: {0}")]
    Retrieval(anyhow::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

struct ActiveDocument {
    name: String,
    retriever: Arc<Retriever>,
}

pub struct ChatSession {
    history: Vec<ChatMessage>,
    active: Option<ActiveDocument>,
    ingestor: Ingestor,
    templates: Templates,
}

impl ChatSession {
    /// A fresh session whose history holds only the assistant greeting.
    pub fn new(greeting: &str, ingestor: Ingestor, templates: Templates) -> Self {
        Self {
            history: vec![ChatMessage::assistant(greeting)],
            active: None,
            ingestor,
            templates,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn active_document(&self) -> Option<&str> {
        self.active.as_ref().map(|d| d.name.as_str())
    }

    /// Ingest `file` and make it the active document, replacing any
    /// previous one. On failure the previous document stays active.
    ///
    /// Returns the number of indexed chunks.
    pub async fn upload(&mut self, file: &UploadedFile) -> Result<usize, IngestError> {
        let retriever = self.ingestor.ingest(file).await?;
        let chunks = retriever.index().len();
        if let Some(previous) = self.active.as_ref() {
            if previous.name != file.name {
                tracing::info!(previous = %previous.name, current = %file.name, "active document replaced");
            }
        }
        self.active = Some(ActiveDocument {
            name: file.name.clone(),
            retriever,
        });
        Ok(chunks)
    }

    /// Unbind the active document. Returns its name.
    pub fn drop_document(&mut self) -> Option<String> {
        self.active.take().map(|d| d.name)
    }

    /// The prompt that would be sent for `question` right now.
    pub async fn prompt_for(&self, question: &str) -> anyhow::Result<String> {
        let retriever = self.active.as_ref().map(|d| d.retriever.as_ref());
        build_prompt(&self.templates, question, retriever).await
    }

    /// Run one turn and return the committed answer.
    pub async fn submit(
        &mut self,
        question: &str,
        runnable: &dyn Runnable,
        renderer: &mut dyn Renderer,
    ) -> Result<String, TurnError> {
        self.history.push(ChatMessage::user(question));

        let prompt = self
            .prompt_for(question)
            .await
            .map_err(TurnError::Retrieval)?;
        let mut fragments = runnable.stream(ModelInput::Text(prompt)).await?;

        let mut answer = String::new();
        while let Some(fragment) = fragments.next().await {
            answer.push_str(&fragment?);
            renderer.render(&answer);
        }

        self.history.push(ChatMessage::assistant(answer.clone()));
        Ok(answer)
    }
}
