//! Prompt templates and per-turn prompt assembly.
//!
//! A turn is grounded in retrieved passages only when a retriever is bound
//! to the session; otherwise the plain template is used and the prompt has
//! no context section at all.

use anyhow::Result;

use crate::config::PromptConfig;
use crate::index::Retriever;
use crate::models::Passage;

pub const DEFAULT_RAG_TEMPLATE: &str = "You are an AI that answers questions kindly. \
Use the following retrieved context to answer the question. \
If you don't know the answer, say that you don't know.

Question: {question}
Context: {context}
Answer:";

pub const DEFAULT_PLAIN_TEMPLATE: &str = "Answer the following question concisely:\n{input}";

/// The two templates a session chooses between.
#[derive(Debug, Clone)]
pub struct Templates {
    pub rag: String,
    pub plain: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            rag: DEFAULT_RAG_TEMPLATE.to_string(),
            plain: DEFAULT_PLAIN_TEMPLATE.to_string(),
        }
    }
}

impl From<&PromptConfig> for Templates {
    fn from(config: &PromptConfig) -> Self {
        Self {
            rag: config.rag_template.clone(),
            plain: config.plain_template.clone(),
        }
    }
}

impl Templates {
    pub fn fill_rag(&self, question: &str, context: &str) -> String {
        fill(&self.rag, &[("question", question), ("context", context)])
    }

    pub fn fill_plain(&self, input: &str) -> String {
        fill(&self.plain, &[("input", input)])
    }
}

/// Substitute `{name}` placeholders in one pass, so values containing
/// braces are never re-expanded.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Join passages into one context string, separated by blank lines.
pub fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the prompt for one turn.
pub async fn build_prompt(
    templates: &Templates,
    question: &str,
    retriever: Option<&Retriever>,
) -> Result<String> {
    match retriever {
        Some(retriever) => {
            let passages = retriever.retrieve(question).await?;
            tracing::debug!(passages = passages.len(), "retrieved context");
            Ok(templates.fill_rag(question, &format_passages(&passages)))
        }
        None => Ok(templates.fill_plain(question)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::embedding::cache::tests::{letter_vector, CountingEmbedder};
    use crate::index::SimilarityIndex;
    use crate::models::Chunk;
    use std::sync::Arc;

    fn passage(text: &str) -> Passage {
        Passage {
            chunk_index: 0,
            text: text.to_string(),
            score: 1.0,
        }
    }

    fn retriever_over(texts: &[&str]) -> Retriever {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(index, t)| Chunk {
                index,
                text: t.to_string(),
                hash: content_hash(t),
            })
            .collect();
        let vectors = texts.iter().map(|t| letter_vector(t)).collect();
        Retriever::new(
            Arc::new(CountingEmbedder::new()),
            SimilarityIndex::build(chunks, vectors).unwrap(),
            4,
        )
    }

    #[test]
    fn passages_joined_with_blank_line() {
        let context = format_passages(&[passage("one"), passage("two")]);
        assert_eq!(context, "one\n\ntwo");
    }

    #[test]
    fn fill_does_not_reexpand_values() {
        let out = fill("Q: {question} C: {context}", &[("question", "{context}"), ("context", "x")]);
        assert_eq!(out, "Q: {context} C: x");
    }

    #[test]
    fn fill_leaves_unknown_braces() {
        assert_eq!(fill("{a} {input", &[("input", "x")]), "{a} {input");
    }

    #[tokio::test]
    async fn plain_prompt_has_no_context_section() {
        let prompt = build_prompt(&Templates::default(), "What is Rust?", None)
            .await
            .unwrap();
        assert!(!prompt.contains("Context:"));
        assert!(prompt.ends_with("What is Rust?"));
    }

    #[tokio::test]
    async fn rag_prompt_includes_question_and_passages() {
        let retriever = retriever_over(&["cats purr", "dogs bark"]);
        let prompt = build_prompt(&Templates::default(), "why do cats purr", Some(&retriever))
            .await
            .unwrap();
        assert!(prompt.contains("Question: why do cats purr"));
        assert!(prompt.contains("Context: "));
        assert!(prompt.contains("cats purr"));
        assert!(prompt.contains("\n\n"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn empty_retrieval_still_builds_valid_prompt() {
        let retriever = retriever_over(&[]);
        let prompt = build_prompt(&Templates::default(), "anything?", Some(&retriever))
            .await
            .unwrap();
        assert!(prompt.contains("Question: anything?\nContext: \nAnswer:"));
    }
}
