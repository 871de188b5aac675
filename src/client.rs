use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status} client error: {message}")]
    Http4xx { status: u16, message: String },

    #[error("HTTP {status} server error: {message}")]
    Http5xx { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server returned an empty response")]
    EmptyResponse,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl ClientError {
    fn from_status(status: u16, message: String) -> Self {
        match status {
            400..=499 => ClientError::Http4xx { status, message },
            500..=599 => ClientError::Http5xx { status, message },
            _ => ClientError::Other(format!("HTTP {}: {}", status, message)),
        }
    }
}

/// The protocol seam between the benchmark engine and the target server.
///
/// Every call takes the caller's cancellation token and must return
/// [`ClientError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Identifiers of the models served by the target.
    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError>;

    /// One non-streaming chat completion.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError>;

    /// One streaming chat completion, consumed to the end.
    async fn complete_streaming(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError>;
}

/// A finished exchange with the timestamps it was measured with.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_time: Instant,
    pub response_time: Instant,
    /// Time to the first non-empty content chunk (streaming only)
    pub ttft: Option<Duration>,
    pub usage: Usage,
    pub content: String,
}

impl Completion {
    pub fn latency(&self) -> Duration {
        self.response_time.saturating_duration_since(self.request_time)
    }
}

// Request types for OpenAI Chat Completions API
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

// Response types
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Usage {
    /// Rough usage for servers that report none: whitespace-separated words.
    pub fn estimate(prompt: &str, content: &str) -> Self {
        Self {
            prompt_tokens: prompt.split_whitespace().count() as u64,
            completion_tokens: content.split_whitespace().count() as u64,
        }
    }
}

// Streaming response types
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

// Models list response
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub owned_by: String,
}

/// Configuration for creating an OpenAI client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL as given by the user; normalized by [`OpenAIClient::new`]
    pub base_url: String,
    /// Optional API key for bearer authentication
    pub api_key: Option<String>,
    /// Request timeout duration
    pub timeout: Duration,
    /// `max_tokens` sent with every completion
    pub max_tokens: u32,
    /// `temperature` sent with every completion
    pub temperature: f32,
    /// Idle connections kept per host
    pub pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIClient {
    /// Creates a client with a pooled transport shared by all workers.
    ///
    /// Fails if the server URL cannot be normalized into a valid URL or the
    /// underlying reqwest client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = normalize_server_url(&config.base_url)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.filter(|key| !key.is_empty()),
            timeout: config.timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins an API path onto the base URL, adding `/v1` unless the base
    /// URL already carries a versioned path.
    fn endpoint(&self, path: &str) -> String {
        if self.base_url.contains("/v1") {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/v1/{}", self.base_url, path)
        }
    }

    pub fn create_request(&self, model: &str, prompt: &str, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = match &self.api_key {
            Some(api_key) => request.bearer_auth(api_key),
            None => request,
        };

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(ClientError::from_status(status.as_u16(), text))
    }

    async fn fetch_models(&self) -> Result<Vec<String>, ClientError> {
        let response = self.send(self.client.get(self.endpoint("models"))).await?;
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let models: ModelsResponse = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Parse(format!("failed to decode models response: {}", e)))?;
        Ok(models.data.into_iter().map(|model| model.id).collect())
    }

    async fn chat_completion(&self, model: &str, prompt: &str) -> Result<Completion, ClientError> {
        let request = self.create_request(model, prompt, false);
        let request_time = Instant::now();

        let response = self
            .send(self.client.post(self.endpoint("chat/completions")).json(&request))
            .await?;
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let response_time = Instant::now();

        let completion: ChatCompletionResponse = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Parse(format!("failed to decode response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let usage = completion
            .usage
            .unwrap_or_else(|| Usage::estimate(prompt, &content));

        Ok(Completion {
            request_time,
            response_time,
            ttft: None,
            usage,
            content,
        })
    }

    async fn chat_completion_stream(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError> {
        let request = self.create_request(model, prompt, true);
        let request_time = Instant::now();

        let mut response = self
            .send(
                self.client
                    .post(self.endpoint("chat/completions"))
                    .header(ACCEPT, "text/event-stream")
                    .json(&request),
            )
            .await?;

        let mut stream = StreamAccumulator::new(request_time);
        while let Some(bytes) = response.chunk().await.map_err(|e| self.classify(e))? {
            if stream.feed(&bytes, Instant::now())? {
                break;
            }
        }

        stream.finish(prompt, Instant::now())
    }

    fn classify(&self, error: reqwest::Error) -> ClientError {
        let message = describe(&error);
        if error.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else if error.is_connect() {
            ClientError::Connection(message)
        } else if error.is_decode() {
            ClientError::Parse(message)
        } else if error.is_request() || error.is_body() {
            let lower = message.to_lowercase();
            if lower.contains("connection closed")
                || lower.contains("connection reset")
                || lower.contains("broken pipe")
                || lower.contains("connection refused")
            {
                ClientError::Connection(message)
            } else {
                ClientError::Other(message)
            }
        } else {
            ClientError::Other(message)
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        cancellable(cancel, self.fetch_models()).await
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError> {
        cancellable(cancel, self.chat_completion(model, prompt)).await
    }

    async fn complete_streaming(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError> {
        cancellable(cancel, self.chat_completion_stream(model, prompt)).await
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = request => result,
    }
}

fn describe(error: &reqwest::Error) -> String {
    match std::error::Error::source(error) {
        Some(source) => format!("{}: {}", error, source),
        None => error.to_string(),
    }
}

/// Incremental parser for a server-sent-events chat completion body.
///
/// Lines may be split across network chunks, so bytes are buffered until a
/// newline arrives.
struct StreamAccumulator {
    request_time: Instant,
    pending: Vec<u8>,
    content: String,
    ttft: Option<Duration>,
    usage: Option<Usage>,
    chunks: usize,
    done: bool,
}

impl StreamAccumulator {
    fn new(request_time: Instant) -> Self {
        Self {
            request_time,
            pending: Vec::new(),
            content: String::new(),
            ttft: None,
            usage: None,
            chunks: 0,
            done: false,
        }
    }

    /// Consumes network bytes. Returns `true` once `[DONE]` was seen.
    fn feed(&mut self, bytes: &[u8], now: Instant) -> Result<bool, ClientError> {
        self.pending.extend_from_slice(bytes);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            self.process_line(line.trim_end_matches(|c: char| c == '\r' || c == '\n'), now)?;
            if self.done {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn process_line(&mut self, line: &str, now: Instant) -> Result<(), ClientError> {
        let Some(data) = line.strip_prefix("data:") else {
            // comments, event names, keep-alives
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|e| ClientError::Parse(format!("malformed stream chunk: {}", e)))?;
        self.chunks += 1;

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                if self.ttft.is_none() {
                    self.ttft = Some(now.saturating_duration_since(self.request_time));
                }
                self.content.push_str(&content);
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        Ok(())
    }

    fn finish(mut self, prompt: &str, response_time: Instant) -> Result<Completion, ClientError> {
        if !self.done && !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.process_line(line.trim(), response_time)?;
        }

        if self.chunks == 0 {
            return Err(ClientError::EmptyResponse);
        }

        let content = std::mem::take(&mut self.content);
        let usage = self
            .usage
            .unwrap_or_else(|| Usage::estimate(prompt, &content));

        Ok(Completion {
            request_time: self.request_time,
            response_time,
            ttft: self.ttft,
            usage,
            content,
        })
    }
}

/// Normalize a user-supplied server address into a base URL.
///
/// - Without a scheme, `http://` is assumed for localhost, `127.*` and IP
///   literals, and `https://` for everything else
/// - The trailing slash is removed
///
/// Examples:
/// - `localhost:8000` -> `http://localhost:8000`
/// - `10.0.0.5:8080/v1/` -> `http://10.0.0.5:8080/v1`
/// - `api.openai.com/v1` -> `https://api.openai.com/v1`
pub fn normalize_server_url(server_url: &str) -> Result<String> {
    let trimmed = server_url.trim();
    if trimmed.is_empty() {
        anyhow::bail!("server URL must not be empty");
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        let host = trimmed.split('/').next().unwrap_or(trimmed);
        if is_local_host(host) {
            format!("http://{}", trimmed)
        } else {
            format!("https://{}", trimmed)
        }
    };

    let url = Url::parse(&with_scheme)
        .with_context(|| format!("invalid server URL: {}", server_url))?;

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn is_local_host(host: &str) -> bool {
    host.contains("localhost")
        || host.starts_with("127.")
        || host.parse::<SocketAddr>().is_ok()
        || host.parse::<IpAddr>().is_ok()
}
