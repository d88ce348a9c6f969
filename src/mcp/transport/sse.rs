//! HTTP + Server-Sent Events transport.
//!
//! The client opens `GET <url>` as an event stream. The host's first event is
//! `endpoint`, whose data is the (relative) URL to POST client messages to.
//! Every later `message` event carries one server message.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::{Channel, InboundTx, Transport};
use crate::error::McpError;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream omits it.
    pub event: String,
    pub data: String,
}

/// Incremental event-stream decoder.
///
/// Bytes may arrive split anywhere; complete events are returned once their
/// terminating blank line has been seen. Comment lines (keep-alives) are
/// skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let newline = start + offset;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
            start = newline + 1;
        }

        self.buffer.drain(..start);
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: event.unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

/// Connects to a host's `/sse` endpoint.
#[derive(Debug, Clone)]
pub struct SseTransport {
    url: Url,
    http: reqwest::Client,
    connect_timeout: Duration,
}

impl SseTransport {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, McpError> {
        let url = Url::parse(url)
            .map_err(|err| McpError::Transport(format!("invalid SSE url `{url}`: {err}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| McpError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            url,
            http,
            connect_timeout,
        })
    }

    /// Resolve the advertised endpoint against the stream URL.
    ///
    /// The endpoint must stay on the stream's origin.
    pub fn resolve_endpoint(&self, endpoint: &str) -> Result<Url, McpError> {
        let resolved = self.url.join(endpoint).map_err(|err| {
            McpError::Handshake(format!("invalid endpoint `{endpoint}`: {err}"))
        })?;
        if resolved.origin() != self.url.origin() {
            return Err(McpError::Handshake(format!(
                "endpoint origin {} does not match {}",
                resolved.origin().ascii_serialization(),
                self.url.origin().ascii_serialization()
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn describe(&self) -> String {
        format!("sse:{}", self.url)
    }

    async fn connect(&self) -> Result<Channel, McpError> {
        let open = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.connect_timeout, open)
            .await
            .map_err(|_elapsed| McpError::Timeout(format!("event stream at {}", self.url)))?
            .map_err(|err| McpError::Transport(format!("failed to open event stream: {err}")))?
            .error_for_status()
            .map_err(|err| McpError::Transport(format!("event stream rejected: {err}")))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !is_event_stream_content_type(content_type) {
            return Err(McpError::Transport(format!(
                "expected text/event-stream, got `{content_type}`"
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump_events(response, endpoint_tx, in_tx.clone()));

        let endpoint = match tokio::time::timeout(self.connect_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_closed)) => {
                reader.abort();
                return Err(McpError::Transport(
                    "event stream ended before the endpoint event".to_string(),
                ));
            }
            Err(_elapsed) => {
                reader.abort();
                return Err(McpError::Timeout("SSE endpoint event".to_string()));
            }
        };
        let post_url = match self.resolve_endpoint(&endpoint) {
            Ok(url) => url,
            Err(err) => {
                reader.abort();
                return Err(err);
            }
        };
        tracing::debug!(endpoint = %post_url, "SSE session established");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let http = self.http.clone();
        let writer = tokio::spawn(async move {
            while let Some(body) = out_rx.recv().await {
                let sent = http
                    .post(post_url.clone())
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await;
                let failure = match sent {
                    Ok(resp) if resp.status().is_success() => continue,
                    Ok(resp) => format!("POST {post_url} returned {}", resp.status()),
                    Err(err) => format!("POST {post_url} failed: {err}"),
                };
                if in_tx.send(Err(McpError::Transport(failure))).is_err() {
                    break;
                }
            }
        });

        Ok(Channel::new(out_tx, in_rx)
            .with_task(reader)
            .with_task(writer))
    }
}

async fn pump_events(
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    in_tx: InboundTx,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = in_tx.send(Err(McpError::Transport(format!(
                    "event stream failed: {err}"
                ))));
                return;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => tracing::warn!("ignoring repeated endpoint event"),
                },
                "message" => {
                    if in_tx.send(Ok(event.data)).is_err() {
                        return;
                    }
                }
                other => tracing::debug!(event = other, "ignoring SSE event"),
            }
        }
    }

    let _ = in_tx.send(Err(McpError::Transport("event stream ended".to_string())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: endpoint\r\ndata: /messages/").is_empty());
        let events = decoder.push(b"?session_id=abc\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages/?session_id=abc".into(),
            }]
        );
    }

    #[test]
    fn skips_comments_and_defaults_event_name() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\n\ndata: {\"id\":1}\n\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"id\":1}");
        assert_eq!(events[1].data, "a\nb");
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type("text/event-stream; charset=utf-8"));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn endpoint_resolves_against_stream_url() {
        let transport =
            SseTransport::new("http://127.0.0.1:8000/sse", Duration::from_secs(1)).unwrap();
        let url = transport
            .resolve_endpoint("/messages/?session_id=abc")
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/messages/?session_id=abc");

        let err = transport
            .resolve_endpoint("http://evil.example/messages/")
            .unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
    }
}
