//! OpenAI-compatible `/chat/completions` backend.
//!
//! Works against api.openai.com as well as local servers exposing the same
//! API (vLLM, llama.cpp server, LM Studio). The bearer token is read from
//! `OPENAI_API_KEY` and omitted when unset.

use async_trait::async_trait;
use futures::future::ready;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{lines, ChatModel, FragmentStream, ModelError};
use crate::config::ModelConfig;
use crate::models::ChatMessage;

pub struct OpenAiChat {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE line carries.
#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, ModelError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let parsed: OpenAiStreamResponse =
        serde_json::from_str(data).map_err(|e| ModelError::Parse(e.to_string()))?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

/// Turn SSE lines into fragments, ending at `data: [DONE]`.
///
/// A body that closes before `[DONE]` ends with an error.
fn decode_stream<S>(lines: S) -> FragmentStream
where
    S: Stream<Item = Result<String, reqwest::Error>> + Send + 'static,
{
    lines
        .map(Some)
        .chain(futures::stream::once(ready(None)))
        .scan(false, |failed, item| {
            if *failed {
                return ready(None);
            }
            let out = match item {
                Some(line) => match line.map_err(ModelError::from).and_then(|l| parse_sse_line(&l)) {
                    Ok(SseLine::Fragment(text)) => Some(Ok(text)),
                    Ok(SseLine::Skip) => Some(Ok(String::new())),
                    Ok(SseLine::Done) => None,
                    Err(e) => {
                        *failed = true;
                        Some(Err(e))
                    }
                },
                None => Some(Err(ModelError::Parse(
                    "stream ended before completion".to_string(),
                ))),
            };
            ready(out)
        })
        .filter(|item| ready(!matches!(item, Ok(text) if text.is_empty())))
        .boxed()
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig, client: reqwest::Client) -> Self {
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: config.temperature,
            client,
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let body = OpenAiRequest {
            model: &self.model,
            messages,
            stream,
            temperature: self.temperature,
        };
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<String, ModelError> {
        let resp = self.send(&messages, false).await?;
        let data: OpenAiResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;
        Ok(data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ModelError> {
        let resp = self.send(&messages, true).await?;
        Ok(decode_stream(lines(resp.bytes_stream())))
    }
}
