//! HTTP transport for the chat-completions and context APIs.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatRequest, ChunkStream, CompletionTransport, CreateSessionRequest};
use crate::config::ConfabConfig;
use crate::error::{ConfabError, Result};
use crate::types::{ChatCompletion, ChatCompletionChunk};

/// Build default headers for a Bearer-token API.
pub(crate) fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]".
pub(crate) fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Splits a byte stream into SSE lines, decoding only complete lines so a
/// multi-byte character split across reads stays intact.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    /// Append `bytes` and return every line now terminated by `\n`.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line[..end]).trim().to_string());
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim().to_string())
    }
}

fn parse_sse_line(line: &str) -> Option<ChatCompletionChunk> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = parse_sse_data(line)?;
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            warn!(error = %err, "skipping unparseable stream chunk");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
}

/// `reqwest` transport speaking the OpenAI-style chat API plus the
/// `/context` endpoints for backend-held sessions.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ConfabConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| ConfabError::MissingCredential("CONFAB_API_KEY".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()?;
        Ok(Self {
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self, request: &ChatRequest) -> String {
        if request.context_id.is_some() {
            format!("{}/context/chat/completions", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    async fn post(&self, url: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .headers(bearer_headers(&self.api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConfabError::api(status, body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let url = self.chat_url(request);
        debug!(url = %url, model = %request.model, "chat request");
        let resp = self.post(&url, request).await?;
        Ok(resp.json::<ChatCompletion>().await?)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let url = self.chat_url(request);
        debug!(url = %url, model = %request.model, "chat stream request");
        let mut body = request.clone();
        body.stream = true;
        let resp = self.post(&url, &body).await?;
        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ConfabError::Network(e));
                        return;
                    }
                };

                for line in lines.feed(&bytes) {
                    if let Some(chunk) = parse_sse_line(&line) {
                        yield Ok(chunk);
                    }
                }
            }

            if let Some(chunk) = lines.finish().as_deref().and_then(parse_sse_line) {
                yield Ok(chunk);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        let url = format!("{}/context/create", self.base_url);
        debug!(url = %url, model = %request.model, mode = %request.mode, "creating session");
        let resp = self.post(&url, request).await?;
        let created = resp.json::<CreatedSession>().await?;
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_lines() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("data: [DONE]"), None);
        assert_eq!(parse_sse_data("event: ping"), None);
    }

    #[test]
    fn multibyte_character_split_across_reads_is_kept() {
        let line = "data: {\"text\":\"caf\u{e9}\"}\n";
        let bytes = line.as_bytes();
        let split = bytes.len() - 4;
        assert!(!line.is_char_boundary(split));

        let mut buffer = SseLineBuffer::default();
        assert!(buffer.feed(&bytes[..split]).is_empty());
        let lines = buffer.feed(&bytes[split..]);

        assert_eq!(lines, vec!["data: {\"text\":\"caf\u{e9}\"}".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn unterminated_last_line_is_flushed() {
        let mut buffer = SseLineBuffer::default();
        let lines = buffer.feed(b": keepalive\r\ndata: {}");
        assert_eq!(lines, vec![": keepalive".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("data: {}"));
    }

    #[test]
    fn context_requests_use_context_endpoint() {
        let transport = HttpTransport::new("https://example.test/api/v3/", "k");
        assert_eq!(transport.base_url(), "https://example.test/api/v3");

        let mut request = ChatRequest {
            model: "m".into(),
            context_id: None,
            messages: Vec::new(),
            tools: Vec::new(),
            parameters: Default::default(),
            stream: false,
        };
        assert_eq!(
            transport.chat_url(&request),
            "https://example.test/api/v3/chat/completions"
        );
        request.context_id = Some("ctx".into());
        assert_eq!(
            transport.chat_url(&request),
            "https://example.test/api/v3/context/chat/completions"
        );
    }

    #[test]
    fn from_config_requires_key() {
        let err = HttpTransport::from_config(&ConfabConfig::default()).expect_err("no key");
        assert!(matches!(err, ConfabError::MissingCredential(_)));
    }
}
