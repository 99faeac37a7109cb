//! Streaming chat-completion client

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use super::request::ChatRequest;
use super::sanitize::{extract_document, render_markdown};
use super::stream::EventStream;
use crate::channel::FeedRow;
use crate::config::LlmConfig;
use crate::settings::LlmCreds;
use crate::{Error, Result};

/// Receives the rendered partial output after every event
pub trait Renderer {
    fn render(&mut self, html: &str);
}

impl<F: FnMut(&str)> Renderer for F {
    fn render(&mut self, html: &str) {
        self(html)
    }
}

/// Finished completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Concatenated content fragments as received
    pub raw: String,
    /// Sanitised document extracted from `raw`
    pub html: String,
}

pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: Url,
    default_model: String,
}

impl CompletionClient {
    pub fn new(http: reqwest::Client, endpoint: Url, default_model: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            default_model: default_model.into(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &LlmConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        Ok(Self::new(http, endpoint, config.default_model.clone()))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the request for `rows` and open the event stream
    pub async fn stream(&self, rows: &[FeedRow], creds: &LlmCreds) -> Result<EventStream> {
        let key = creds
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("no API key stored".to_string()))?;
        let model = creds
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        let body = ChatRequest::for_rows(model, rows);

        tracing::info!("Requesting completion for {} rows with {}", rows.len(), model);
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(key)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(Error::NoStreamBody);
        }

        Ok(EventStream::from_response(response))
    }

    /// Stream a completion, re-rendering the accumulated output after every event
    ///
    /// On a stream failure the renderer keeps whatever partial output it was handed.
    pub async fn generate(
        &self,
        rows: &[FeedRow],
        creds: &LlmCreds,
        renderer: &mut dyn Renderer,
    ) -> Result<Generation> {
        let mut events = self.stream(rows, creds).await?;
        let mut raw = String::new();
        let mut count = 0usize;

        while let Some(event) = events.next_event().await? {
            raw.push_str(event.content());
            count += 1;
            renderer.render(&render_markdown(&raw));
        }

        tracing::debug!("Completion finished after {} events ({} bytes)", count, raw.len());
        let html = extract_document(&raw);
        Ok(Generation { raw, html })
    }
}
