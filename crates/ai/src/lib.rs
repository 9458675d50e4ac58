//! AI completion collaborator.
//!
//! Consulted only when the rule engine fell through to the fallback reply
//! and the account's logic config opts in. Provider failures are the
//! caller's problem to degrade from; this crate never panics.

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

/// A text-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Produce a reply for `user_text` under `system_instruction`.
    async fn complete(&self, system_instruction: &str, user_text: &str)
    -> anyhow::Result<String>;
}

#[derive(Debug, serde::Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Completion provider for any OpenAI-compatible chat endpoint.
pub struct OpenAiCompatProvider {
    api_key: Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        system_instruction: &str,
        user_text: &str,
    ) -> anyhow::Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_instruction },
                { "role": "user", "content": user_text },
            ],
        });

        debug!(model = %self.model, "requesting completion");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("completion request failed: HTTP {status}: {body}");
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("completion response contained no text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_parses() {
        let json = r#"{
            "choices": [{ "message": { "role": "assistant", "content": "ola!" } }]
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("ola!")
        );
    }
}
