//! Completion/analysis provider client
//!
//! Talks to the external text-completion service over HTTP. Chat
//! completions stream back as newline-delimited event frames; analysis is
//! a single structured judgement. Both calls are fallible and latent by
//! contract; the analysis path's failures are recovered upstream by the
//! heuristic fallback.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::analysis::{RawAnalysis, TranscriptAnalyzer};
use crate::errors::{MesmerError, Result};
use crate::streaming::parser::{FrameParser, StreamEvent};

/// Default provider endpoint
pub const DEFAULT_PROVIDER_URL: &str = "http://127.0.0.1:11434";

/// Default model
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Connect timeout for provider requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total timeout for the one-shot analysis call
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered events between the stream pump and the consumer
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// HTTP client for the completion/analysis provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    model: String,
}

impl ProviderClient {
    /// Create a client with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_PROVIDER_URL, DEFAULT_MODEL)
    }

    /// Create a client against a specific endpoint and model
    pub fn with_config(base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(MesmerError::HttpError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Start a streamed chat completion.
    ///
    /// Returns a channel of parsed stream events. A transport failure
    /// mid-stream, or the body ending without the completion marker,
    /// surfaces as a terminal `StreamEvent::Error`; deltas already
    /// delivered remain valid.
    pub async fn chat_stream(
        &self,
        system_text: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let url = format!("{}/v1/chat/stream", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            system: system_text,
            prompt,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MesmerError::ProviderError(format!("failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(MesmerError::ProviderError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut parser = FrameParser::new();
            let mut finished = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                let events = match parser.push(&chunk) {
                    Ok(events) => events,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                for event in events {
                    let done = event == StreamEvent::Done;
                    if tx.send(event).await.is_err() {
                        // Consumer hung up; nothing left to deliver.
                        return;
                    }
                    if done {
                        finished = true;
                        break;
                    }
                }
                if finished {
                    break;
                }
            }

            if !finished {
                let _ = tx
                    .send(StreamEvent::Error(
                        "stream ended before completion marker".to_string(),
                    ))
                    .await;
            }
        });

        Ok(rx)
    }

    /// Request one structured judgement for a finished transcript
    pub async fn analyze_transcript(
        &self,
        system_text: &str,
        transcript_text: &str,
    ) -> Result<RawAnalysis> {
        let url = format!("{}/v1/analyze", self.base_url);
        let request = AnalyzeRequest {
            model: &self.model,
            system: system_text,
            transcript: transcript_text,
        };

        let response = self
            .client
            .post(&url)
            .timeout(ANALYZE_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| MesmerError::AnalysisUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MesmerError::AnalysisUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let raw: RawAnalysis = response
            .json()
            .await
            .map_err(|e| MesmerError::AnalysisUnavailable(format!("unparsable judgement: {}", e)))?;

        debug!(sentiment = raw.sentiment, "analysis judgement received");
        Ok(raw)
    }

    /// Check whether the provider answers at all
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TranscriptAnalyzer for ProviderClient {
    async fn analyze(&self, system_text: &str, transcript_text: &str) -> Result<RawAnalysis> {
        self.analyze_transcript(system_text, transcript_text).await
    }
}

/// Streamed chat request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Analysis request body
#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    model: &'a str,
    system: &'a str,
    transcript: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ProviderClient::new().unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.base_url(), DEFAULT_PROVIDER_URL);
    }

    #[test]
    fn test_client_with_config_trims_trailing_slash() {
        let client = ProviderClient::with_config("http://localhost:9999/", "llama2:7b").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9999");
        assert_eq!(client.model(), "llama2:7b");
    }
}
