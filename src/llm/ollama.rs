//! Ollama `/api/chat` backend.

use async_trait::async_trait;
use futures::future::ready;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{lines, ChatModel, FragmentStream, ModelError};
use crate::config::ModelConfig;
use crate::models::ChatMessage;

pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    pub fn new(config: &ModelConfig, client: reqwest::Client) -> Self {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let body = OllamaRequest {
            model: &self.model,
            messages,
            stream,
            options: self.temperature.map(|temperature| OllamaOptions { temperature }),
        };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }
        Ok(resp)
    }
}

/// Decode one NDJSON line. `Ok(None)` for blank lines and empty fragments.
fn parse_line(line: &str) -> Result<Option<(String, bool)>, ModelError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let chunk: OllamaChunk =
        serde_json::from_str(line).map_err(|e| ModelError::Parse(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(ModelError::Api {
            status: 500,
            message: error,
        });
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((content, chunk.done)))
}

/// Turn NDJSON lines into fragments, ending at the `done` line.
///
/// A body that closes before the `done` line ends with an error.
fn decode_stream<S>(lines: S) -> FragmentStream
where
    S: Stream<Item = Result<String, reqwest::Error>> + Send + 'static,
{
    lines
        .map(Some)
        .chain(futures::stream::once(ready(None)))
        .scan(false, |finished, item| {
            if *finished {
                return ready(None);
            }
            let out = match item {
                Some(line) => match line.map_err(ModelError::from).and_then(|l| parse_line(&l)) {
                    Ok(Some((content, done))) => {
                        *finished = done;
                        Some(Ok(content))
                    }
                    Ok(None) => Some(Ok(String::new())),
                    Err(e) => {
                        *finished = true;
                        Some(Err(e))
                    }
                },
                None => Some(Err(ModelError::Parse(
                    "stream ended before completion".to_string(),
                ))),
            };
            ready(out)
        })
        .filter(|item| ready(!matches!(item, Ok(content) if content.is_empty())))
        .boxed()
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: Vec<ChatMessage>) -> Result<String, ModelError> {
        let resp = self.send(&messages, false).await?;
        let text = resp.text().await?;
        match parse_line(&text)? {
            Some((content, _)) => Ok(content),
            None => Err(ModelError::Parse("empty response".to_string())),
        }
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ModelError> {
        let resp = self.send(&messages, true).await?;
        Ok(decode_stream(lines(resp.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_line() {
        let parsed =
            parse_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#).unwrap();
        assert_eq!(parsed, Some(("Hel".to_string(), false)));
    }

    #[test]
    fn final_line_marks_done() {
        let parsed = parse_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
            .unwrap();
        assert_eq!(parsed, Some((String::new(), true)));
    }

    #[test]
    fn error_line_is_an_error() {
        let err = parse_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn blank_line_ignored() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    async fn decode(body: &[&str]) -> Vec<Result<String, ModelError>> {
        let lines: Vec<Result<String, reqwest::Error>> =
            body.iter().map(|l| Ok(l.to_string())).collect();
        decode_stream(futures::stream::iter(lines)).collect().await
    }

    #[tokio::test]
    async fn stream_stops_at_done_line() {
        let got = decode(&[
            r#"{"message":{"content":"Par"},"done":false}"#,
            "",
            r#"{"message":{"content":"is"},"done":false}"#,
            r#"{"message":{"content":""},"done":true}"#,
            r#"{"message":{"content":"ignored"},"done":false}"#,
        ])
        .await;
        let fragments: Vec<String> = got.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(fragments, vec!["Par", "is"]);
    }

    #[tokio::test]
    async fn body_closed_before_done_is_an_error() {
        let got = decode(&[r#"{"message":{"content":"Par"},"done":false}"#]).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap(), "Par");
        assert!(matches!(&got[1], Err(ModelError::Parse(m)) if m.contains("before completion")));
    }

    #[tokio::test]
    async fn error_line_ends_stream() {
        let got = decode(&[
            r#"{"message":{"content":"Par"},"done":false}"#,
            r#"{"error":"out of memory"}"#,
            r#"{"message":{"content":"more"},"done":true}"#,
        ])
        .await;
        assert_eq!(got.len(), 2);
        assert!(matches!(&got[1], Err(ModelError::Api { .. })));
    }

    #[test]
    fn request_omits_options_without_temperature() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OllamaRequest {
            model: "llama3",
            messages: &messages,
            stream: true,
            options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("options").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
