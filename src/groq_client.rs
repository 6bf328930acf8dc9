use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::sse::{SseDecoder, SseEvent};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1/";
const CHAT_ENDPOINT: &str = "chat/completions";

/// Response text fragments in the order the API produced them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("API request failed ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("the API returned an empty response")]
    EmptyResponse,
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = error_message(body);
        let code = status.as_u16();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
                status: code,
                message,
            },
            StatusCode::NOT_FOUND => ApiError::ModelNotFound(message),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(message),
            s if s.is_server_error() => ApiError::Server {
                status: code,
                message,
            },
            _ => ApiError::Status {
                status: code,
                message,
            },
        }
    }

    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_) | ApiError::Server { .. } | ApiError::Transport(_)
        )
    }
}

/// Pulls `error.message` out of an OpenAI-style error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "no details returned".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// One chat-completion call: model parameters plus the already windowed history.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ApiMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Messages actually sent, counting the system prompt.
    pub fn message_count(&self) -> usize {
        self.messages.len() + usize::from(self.system.is_some())
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl<'a> CompletionBody<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ApiMessage::new("system", system.as_str()));
        }
        messages.extend(request.messages.iter().cloned());

        Self {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// The seam between the chat loop and the completion API.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Requests the full response in one piece.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError>;

    /// Requests a streamed response.
    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, ApiError>;
}

/// Capped exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct GroqClient {
    api_key: String,
    endpoint: Url,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GroqClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(eyre!("Groq API key is empty"));
        }

        Ok(Self {
            api_key,
            endpoint: chat_endpoint(DEFAULT_BASE_URL)?,
            client: reqwest::Client::new(),
            retry: RetryPolicy::none(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.endpoint = chat_endpoint(base_url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ApiError> {
        let body = CompletionBody::new(request, stream);
        debug!(
            "Sending request to Groq API: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries = self.retry.retries,
                        "Transient API failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("API request failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(&self, body: &CompletionBody<'_>) -> Result<reqwest::Response, ApiError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            debug!("API returned {} with body: {}", status, error_text);
            return Err(ApiError::from_status(status, &error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatClient for GroqClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let response = self.send(request, false).await?;
        let text = response.text().await?;
        debug!("Received response from Groq API: {}", text);

        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(ApiError::EmptyResponse)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, ApiError> {
        let response = self.send(request, true).await?;
        Ok(decode_fragments(response.bytes_stream()))
    }
}

fn chat_endpoint(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(CHAT_ENDPOINT)
        .map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))
}

/// Parses one `data:` payload into the text fragment it carries, if any.
fn parse_chunk(data: &str) -> Result<Option<String>, ApiError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ApiError::Decode(format!("{}: {}", e, data)))?;

    if let Some(error) = chunk.error {
        return Err(ApiError::Stream(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ApiError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn push_events(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            match event {
                SseEvent::Done => {
                    debug!("Stream finished");
                    self.finished = true;
                    return;
                }
                SseEvent::Data(data) => match parse_chunk(&data) {
                    Ok(Some(fragment)) => self.pending.push_back(Ok(fragment)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                        return;
                    }
                },
            }
        }
    }
}

/// Turns an SSE byte stream into text fragments. The stream ends after
/// `[DONE]`, at end of body, or right after the first error.
pub fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.push_events(events);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e.into()));
                    state.finished = true;
                }
                None => {
                    let tail = state.decoder.finish();
                    state.push_events(tail);
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}
