//! HTTP client for the routes exposed by `ragserve serve`.
//!
//! [`RemoteRunnable`] mirrors the server surface: `invoke`, `batch` and a
//! streaming call that decodes the server-sent events of `/stream` into a
//! stream of text fragments. The stream ends cleanly only on the `end`
//! event; a connection that closes before it, or an `error` event, yields
//! a [`ClientError`] as the last item.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

use crate::llm::{lines, ModelInput};

/// Text fragments of one streamed response, in emission order.
pub type ClientStream = BoxStream<'static, Result<String, ClientError>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint '{url}': {reason}")]
    Config { url: String, reason: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Anything that can stream an answer for a model input.
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn stream(&self, input: ModelInput) -> Result<ClientStream, ClientError>;
}

/// A model served by `ragserve serve`, addressed by its route prefix URL
/// (e.g. `http://localhost:8000/llm/`).
///
/// The URL is not checked until the first call, so a bad endpoint shows up
/// as a [`ClientError::Config`] on the first turn.
pub struct RemoteRunnable {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct InvokeResponse {
    output: String,
}

#[derive(Deserialize)]
struct BatchResponse {
    output: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct StreamErrorEvent {
    #[serde(default)]
    status_code: Option<u16>,
    message: String,
}

impl RemoteRunnable {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn route(&self, name: &str) -> Result<reqwest::Url, ClientError> {
        let config_error = |reason: String| ClientError::Config {
            url: self.base_url.clone(),
            reason,
        };
        if self.base_url.trim().is_empty() {
            return Err(config_error("no endpoint configured".to_string()));
        }
        let mut base = reqwest::Url::parse(&self.base_url).map_err(|e| config_error(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(config_error(format!(
                "unsupported scheme '{}'",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(name).map_err(|e| config_error(e.to_string()))
    }

    async fn post(
        &self,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.route(name)?;
        tracing::debug!(%url, "calling remote model");
        let resp = self.http.post(url).json(body).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        Err(ClientError::Remote { status, message })
    }

    pub async fn invoke(&self, input: impl Into<ModelInput>) -> Result<String, ClientError> {
        let body = serde_json::json!({ "input": input.into() });
        let resp: InvokeResponse = self
            .post("invoke", &body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(resp.output)
    }

    /// Outputs are returned in input order.
    pub async fn batch(&self, inputs: Vec<ModelInput>) -> Result<Vec<String>, ClientError> {
        let body = serde_json::json!({ "inputs": inputs });
        let resp: BatchResponse = self
            .post("batch", &body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(resp.output)
    }
}

#[async_trait]
impl Runnable for RemoteRunnable {
    async fn stream(&self, input: ModelInput) -> Result<ClientStream, ClientError> {
        let body = serde_json::json!({ "input": input });
        let resp = self.post("stream", &body).await?;
        Ok(decode_events(lines(resp.bytes_stream())))
    }
}

/// One dispatched server-sent event.
#[derive(Debug, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Accumulates `event:`/`data:` fields until a blank line dispatches them.
#[derive(Default)]
struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: self.event.take().unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

enum Step {
    Fragment(String),
    End,
    Skip,
}

fn interpret(event: SseEvent) -> Result<Step, ClientError> {
    match event.event.as_str() {
        "data" => serde_json::from_str::<String>(&event.data)
            .map(Step::Fragment)
            .map_err(|e| ClientError::Decode(e.to_string())),
        "metadata" => {
            tracing::debug!(metadata = %event.data, "stream started");
            Ok(Step::Skip)
        }
        "end" => Ok(Step::End),
        "error" => {
            let err = match serde_json::from_str::<StreamErrorEvent>(&event.data) {
                Ok(e) => ClientError::Remote {
                    status: e.status_code.unwrap_or(500),
                    message: e.message,
                },
                Err(_) => ClientError::Stream(event.data),
            };
            Err(err)
        }
        _ => Ok(Step::Skip),
    }
}

/// Turn SSE lines into fragments. Stops after `end` or the first error.
fn decode_events(
    lines: BoxStream<'static, Result<String, reqwest::Error>>,
) -> ClientStream {
    futures::stream::unfold(
        Some((lines, SseDecoder::default())),
        |state| async move {
            let (mut lines, mut decoder) = state?;
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        let Some(event) = decoder.push(&line) else {
                            continue;
                        };
                        match interpret(event) {
                            Ok(Step::Fragment(text)) => {
                                return Some((Ok(text), Some((lines, decoder))))
                            }
                            Ok(Step::Skip) => continue,
                            Ok(Step::End) => return None,
                            Err(e) => return Some((Err(e), None)),
                        }
                    }
                    Some(Err(e)) => return Some((Err(ClientError::Http(e)), None)),
                    None => {
                        return Some((
                            Err(ClientError::Stream(
                                "connection closed before the end of the response".to_string(),
                            )),
                            None,
                        ))
                    }
                }
            }
        },
    )
    .boxed()
}
