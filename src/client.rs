use std::env;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use futures::stream::{self, StreamExt};
use reqwest::header::{self, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;
use url::Url;

use crate::decode::process_text;
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_RATE_LIMITED, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUEST_RETRIES,
    CLIENT_REQUESTS, STREAM_CHUNKS, STREAM_ERRORS,
};
use crate::sse::process_sse;
use crate::types::{ChatRequest, ChatResponse, Message, PlainTextRequest, StreamFrame};

const DEFAULT_BASE_URL: &str = "http://localhost:4000/";
const DEFAULT_STREAM_PATH: &str = "/api/chat/stream";
const DEFAULT_CHAT_PATH: &str = "/api/chat";
const DEFAULT_PLAIN_TEXT_PATH: &str = "/api/gemini/chat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "COACHLINE_BASE_URL";

/// A lazily evaluated, finite sequence of assistant text fragments.
///
/// Fragments arrive in order and concatenate to the full reply. The stream
/// ends normally on `[DONE]` or when the server closes the connection; it
/// ends with an error when the server sends an error frame.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// How the generation endpoint frames requests and replies.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// `{message, history}` in, `data: {...}` server-sent events out.
    #[default]
    EventStream,
    /// `{messages:[{role,text}]}` in, raw chunked UTF-8 out.
    PlainText,
}

impl WireFormat {
    /// Default number of prior turns sent as context.
    pub fn default_history_window(self) -> usize {
        match self {
            WireFormat::EventStream => 10,
            WireFormat::PlainText => 20,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::EventStream => write!(f, "event-stream"),
            WireFormat::PlainText => write!(f, "plain-text"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "event-stream" | "sse" => Ok(WireFormat::EventStream),
            "plain-text" | "text" => Ok(WireFormat::PlainText),
            other => Err(Error::validation(
                format!("unknown wire format {other:?}; expected event-stream or plain-text"),
                Some("wire_format".to_string()),
            )),
        }
    }
}

/// Connection settings for the generation endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root that endpoint paths are resolved against.
    pub base_url: String,
    /// Path of the event-stream endpoint.
    pub stream_path: String,
    /// Path of the single-shot JSON endpoint.
    pub chat_path: String,
    /// Path of the plain-text endpoint.
    pub plain_text_path: String,
    /// Framing used for streamed replies.
    pub wire_format: WireFormat,
    /// Timeout for single-shot requests and for connecting.
    pub timeout: Duration,
    /// Prior turns sent as context; `None` uses the wire format's default.
    pub history_window: Option<usize>,
    /// Extra attempts after a rate-limited request.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
}

impl ClientConfig {
    /// Create a new `ClientConfig` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the base URL taken from `COACHLINE_BASE_URL` when set.
    pub fn from_env() -> Self {
        let config = Self::default();
        match env::var(BASE_URL_ENV) {
            Ok(base_url) if !base_url.trim().is_empty() => config.with_base_url(base_url.trim()),
            _ => config,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn with_chat_path(mut self, path: impl Into<String>) -> Self {
        self.chat_path = path.into();
        self
    }

    pub fn with_plain_text_path(mut self, path: impl Into<String>) -> Self {
        self.plain_text_path = path.into();
        self
    }

    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = Some(window);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// The number of prior turns sent with each request.
    pub fn history_window(&self) -> usize {
        self.history_window
            .unwrap_or_else(|| self.wire_format.default_history_window())
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.base_url).map_err(|e| {
            Error::url(format!("invalid base URL {:?}: {e}", self.base_url), Some(e))
        })?;
        base.join(path)
            .map_err(|e| Error::url(format!("invalid endpoint path {path:?}: {e}"), Some(e)))
    }

    /// Backoff delays between attempts: base, 2 x base, 4 x base, ...
    pub fn retry_delays(&self) -> impl Iterator<Item = Duration> {
        let base_ms = self.retry_base_delay.as_millis().max(2) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .take(self.max_retries)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            plain_text_path: DEFAULT_PLAIN_TEXT_PATH.to_string(),
            wire_format: WireFormat::default(),
            timeout: DEFAULT_TIMEOUT,
            history_window: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

//////////////////////////////////////////// Backend ////////////////////////////////////////////

/// One attempt against the generation endpoint, without retries.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a streamed reply to `prompt`.
    async fn open_stream(&self, prompt: &str, history: &[Message]) -> Result<ChunkStream>;

    /// Fetch a complete reply to `prompt`.
    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String>;
}

/// [`Backend`] that talks HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: ReqwestClient,
    config: ClientConfig,
}

impl HttpBackend {
    /// Create a new `HttpBackend`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        // No overall timeout here: it would cut long streams short.
        let client = ReqwestClient::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { client, config })
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.config.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        accept: &'static str,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = self.config.endpoint(path)?;
        let mut request = self
            .client
            .post(url)
            .header(header::ACCEPT, HeaderValue::from_static(accept))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            self.request_error(e)
        })?;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(error_from_response(response).await);
        }
        debug!(path, status = response.status().as_u16(), "request accepted");
        Ok(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn open_stream(&self, prompt: &str, history: &[Message]) -> Result<ChunkStream> {
        match self.config.wire_format {
            WireFormat::EventStream => {
                let body = ChatRequest::new(prompt, history);
                let response = self
                    .post(&self.config.stream_path, &body, "text/event-stream", None)
                    .await?;
                let frames = process_sse(response.bytes_stream().map(transport_error));
                Ok(Box::pin(content_chunks(frames)))
            }
            WireFormat::PlainText => {
                let body = PlainTextRequest::new(prompt, history);
                let response = self
                    .post(&self.config.plain_text_path, &body, "text/plain", None)
                    .await?;
                let text = process_text(response.bytes_stream().map(transport_error))
                    .inspect(|chunk| {
                        if chunk.is_ok() {
                            STREAM_CHUNKS.click();
                        }
                    });
                Ok(Box::pin(text))
            }
        }
    }

    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String> {
        match self.config.wire_format {
            WireFormat::EventStream => {
                let body = ChatRequest::new(prompt, history);
                let response = self
                    .post(
                        &self.config.chat_path,
                        &body,
                        "application/json",
                        Some(self.config.timeout),
                    )
                    .await?;
                let reply = response.json::<ChatResponse>().await.map_err(|e| {
                    Error::serialization(
                        format!("Failed to parse response: {}", e),
                        Some(Box::new(e)),
                    )
                })?;
                Ok(reply.response)
            }
            // The plain-text endpoint only streams; collect it.
            WireFormat::PlainText => {
                let mut chunks = self.open_stream(prompt, history).await?;
                let mut reply = String::new();
                while let Some(chunk) = chunks.next().await {
                    reply.push_str(&chunk?);
                }
                Ok(reply)
            }
        }
    }
}

fn transport_error(
    result: std::result::Result<bytes::Bytes, reqwest::Error>,
) -> Result<bytes::Bytes> {
    result.map_err(|e| {
        Error::connection(
            format!("Error in HTTP stream: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Map a non-success response onto the error taxonomy.
async fn error_from_response(response: Response) -> Error {
    let status_code = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.trim().parse::<u64>().ok());

    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(
                format!("Failed to read error response: {}", e),
                Some(Box::new(e)),
            );
        }
    };
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.error)
        .unwrap_or(body);

    match status_code {
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500..=599 => Error::server(status_code, message),
        _ => Error::api(status_code, message),
    }
}

/// Reduce decoded frames to assistant text.
///
/// Empty content is dropped. `[DONE]` ends the stream; an error frame yields
/// one [`Error::Remote`] and then ends it.
pub(crate) fn content_chunks<S>(frames: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<StreamFrame>>,
{
    stream::unfold(
        (Box::pin(frames), false),
        |(mut frames, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match frames.next().await? {
                    Ok(StreamFrame::Content(text)) if text.is_empty() => continue,
                    Ok(StreamFrame::Content(text)) => {
                        STREAM_CHUNKS.click();
                        return Some((Ok(text), (frames, false)));
                    }
                    Ok(StreamFrame::Done) => return None,
                    Ok(StreamFrame::Error(message)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(Error::remote(message)), (frames, true)));
                    }
                    Err(err) => return Some((Err(err), (frames, true))),
                }
            }
        },
    )
}

/////////////////////////////////////////// ChatClient //////////////////////////////////////////

/// Client for the generation endpoint.
///
/// Rate-limited attempts are retried with exponential backoff; every other
/// failure is returned immediately.
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn Backend>,
    config: ClientConfig,
}

impl ChatClient {
    /// Create a new `ChatClient` speaking HTTP.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let backend = HttpBackend::new(config.clone())?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    /// Create a new `ChatClient` over a custom backend.
    pub fn with_backend(backend: Arc<dyn Backend>, config: ClientConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stream a reply to `prompt`, sending at most the configured window of
    /// `history` as context.
    pub async fn stream(&self, prompt: &str, history: &[Message]) -> Result<ChunkStream> {
        let history = self.window(history);
        let mut attempt = 0usize;
        RetryIf::start(
            self.config.retry_delays(),
            || {
                attempt += 1;
                self.log_attempt(attempt);
                self.backend.open_stream(prompt, history)
            },
            is_retryable,
        )
        .await
    }

    /// Fetch a complete reply to `prompt` in one response.
    pub async fn send(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let history = self.window(history);
        let mut attempt = 0usize;
        RetryIf::start(
            self.config.retry_delays(),
            || {
                attempt += 1;
                self.log_attempt(attempt);
                self.backend.complete(prompt, history)
            },
            is_retryable,
        )
        .await
    }

    fn window<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        let limit = self.config.history_window();
        &history[history.len().saturating_sub(limit)..]
    }

    fn log_attempt(&self, attempt: usize) {
        if attempt > 1 {
            CLIENT_REQUEST_RETRIES.click();
            debug!(attempt, max_retries = self.config.max_retries, "retrying after rate limit");
        }
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn is_retryable(err: &Error) -> bool {
    if err.is_rate_limit() {
        CLIENT_RATE_LIMITED.click();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedBackend {
        failures: Mutex<Vec<Error>>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedBackend {
        fn new(failures: Vec<Error>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn next_failure(&self, prompt: &str, history: &[Message]) -> Option<Error> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), history.len()));
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn open_stream(&self, prompt: &str, history: &[Message]) -> Result<ChunkStream> {
            if let Some(err) = self.next_failure(prompt, history) {
                return Err(err);
            }
            let chunks = vec![Ok("Hello".to_string()), Ok(" world".to_string())];
            Ok(Box::pin(stream::iter(chunks)))
        }

        async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String> {
            match self.next_failure(prompt, history) {
                Some(err) => Err(err),
                None => Ok("Hello world".to_string()),
            }
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> ChatClient {
        ChatClient::with_backend(backend, ClientConfig::new())
    }

    #[test]
    fn wire_format_parsing() {
        assert_eq!(
            "event-stream".parse::<WireFormat>().unwrap(),
            WireFormat::EventStream
        );
        assert_eq!(
            " plain-text ".parse::<WireFormat>().unwrap(),
            WireFormat::PlainText
        );
        assert!("xml".parse::<WireFormat>().unwrap_err().is_validation());
        assert_eq!(WireFormat::PlainText.to_string(), "plain-text");
    }

    #[test]
    fn history_window_follows_wire_format() {
        let config = ClientConfig::new();
        assert_eq!(config.history_window(), 10);
        let config = config.with_wire_format(WireFormat::PlainText);
        assert_eq!(config.history_window(), 20);
        assert_eq!(config.with_history_window(4).history_window(), 4);
    }

    #[test]
    fn endpoints_resolve_against_base() {
        let config = ClientConfig::new().with_base_url("http://127.0.0.1:9000");
        assert_eq!(
            config.endpoint(&config.stream_path).unwrap().as_str(),
            "http://127.0.0.1:9000/api/chat/stream"
        );
        let bad = ClientConfig::new().with_base_url("not a url");
        assert!(bad.endpoint("/api/chat").is_err());
    }

    #[test]
    fn retry_delays_double() {
        let delays: Vec<Duration> = ClientConfig::new().retry_delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        let none: Vec<Duration> = ClientConfig::new().with_max_retries(0).retry_delays().collect();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn frames_reduce_to_text() {
        let frames = stream::iter(vec![
            Ok(StreamFrame::Content("Hello".to_string())),
            Ok(StreamFrame::Content(String::new())),
            Ok(StreamFrame::Content(" world".to_string())),
            Ok(StreamFrame::Done),
            Ok(StreamFrame::Content("ignored".to_string())),
        ]);
        let chunks: Vec<String> = content_chunks(frames).map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn error_frame_ends_stream() {
        let frames = stream::iter(vec![
            Ok(StreamFrame::Content("Par".to_string())),
            Ok(StreamFrame::Error("model overloaded".to_string())),
            Ok(StreamFrame::Content("never".to_string())),
        ]);
        let items: Vec<Result<String>> = content_chunks(frames).collect().await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.user_message(), "model overloaded");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_stream_is_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Error::rate_limit("slow down", None),
            Error::rate_limit("slow down", None),
        ]));
        let client = client(Arc::clone(&backend));
        let start = tokio::time::Instant::now();
        let chunks: Vec<String> = client
            .stream("hi", &[])
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), "Hello world");
        assert_eq!(backend.calls.lock().unwrap().len(), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_gives_up_after_max_retries() {
        let failures = (0..4).map(|_| Error::rate_limit("quota", None)).collect();
        let backend = Arc::new(ScriptedBackend::new(failures));
        let err = client(Arc::clone(&backend)).send("hi", &[]).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(backend.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![Error::server(503, "down")]));
        let err = client(Arc::clone(&backend)).send("hi", &[]).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_windowed() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let history: Vec<Message> = (0..15).map(|i| Message::user(format!("q{i}"))).collect();
        let reply = client(Arc::clone(&backend)).send("next", &history).await.unwrap();
        assert_eq!(reply, "Hello world");
        assert_eq!(
            backend.calls.lock().unwrap()[0],
            ("next".to_string(), 10)
        );
    }
}
