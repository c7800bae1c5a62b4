//! Incremental decoding of the newline-delimited chat stream and the
//! long-lived request that produces it.

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;

use crate::api::{with_bearer, ChatChunk, ChatStreamRequest, RawChunk};
use crate::auth::{AuthError, TokenManager};
use crate::utils::url::construct_api_url;

/// Events delivered to the session loop, tagged with their stream id so
/// stale streams can be ignored.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Chunk(ChatChunk),
    /// Transport-level failure. Terminal; `Done` will not follow.
    Error(String),
    /// The server closed the stream normally. Fires exactly once.
    Done,
}

/// Incremental line framer for the chat stream. Bytes may arrive split at
/// arbitrary boundaries, including mid-line and mid-codepoint; only complete
/// lines are decoded, and each line is decoded exactly once.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume newly arrived bytes, returning the chunks completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(line) => {
                    if let Some(chunk) = decode_line(line) {
                        chunks.push(chunk);
                    }
                }
                Err(err) => {
                    tracing::warn!("invalid UTF-8 in stream line: {err}");
                }
            }
            self.buffer.drain(..=newline_pos);
        }
        chunks
    }

    /// Decode a trailing line the server sent without a final newline.
    pub fn finish(&mut self) -> Option<ChatChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).to_string();
        self.buffer.clear();
        decode_line(&line)
    }
}

fn decode_line(line: &str) -> Option<ChatChunk> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<RawChunk>(trimmed) {
        Ok(raw) => ChatChunk::from_raw(raw),
        Err(err) => {
            tracing::warn!("skipping malformed stream line {trimmed:?}: {err}");
            None
        }
    }
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub tokens: TokenManager,
    pub request: ChatStreamRequest,
    pub stream_id: u64,
}

/// Spawns streaming chat requests and fans their events into one channel
/// consumed by the session loop.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Open the streaming exchange. A 401 on the initial response is
    /// recovered by one token refresh and one fresh request (inside
    /// [`TokenManager::send_authenticated`], which re-runs the builder);
    /// anything else terminal emits a single `Error` or `Done`.
    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                tokens,
                request,
                stream_id,
            } = params;

            let chat_url = construct_api_url(&base_url, "chat");
            let response = match tokens
                .send_authenticated(|token| with_bearer(client.post(&chat_url).json(&request), token))
                .await
            {
                Ok(response) => response,
                Err(AuthError::SessionExpired) => {
                    let _ = tx.send((
                        StreamEvent::Error("session expired, please log in again".to_string()),
                        stream_id,
                    ));
                    return;
                }
                Err(err) => {
                    let _ = tx.send((StreamEvent::Error(err.to_string()), stream_id));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<no body>".to_string());
                let _ = tx.send((
                    StreamEvent::Error(format!("chat request failed ({status}): {body}")),
                    stream_id,
                ));
                return;
            }

            let mut decoder = ChunkDecoder::new();
            let mut body = response.bytes_stream();
            while let Some(next) = body.next().await {
                match next {
                    Ok(bytes) => {
                        for chunk in decoder.feed(&bytes) {
                            let _ = tx.send((StreamEvent::Chunk(chunk), stream_id));
                        }
                    }
                    Err(err) => {
                        let _ = tx.send((StreamEvent::Error(err.to_string()), stream_id));
                        return;
                    }
                }
            }
            if let Some(chunk) = decoder.finish() {
                let _ = tx.send((StreamEvent::Chunk(chunk), stream_id));
            }
            let _ = tx.send((StreamEvent::Done, stream_id));
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::store::{MemoryStore, SecretStore};
    use crate::utils::test_server::{spawn, CannedReply};

    const WIRE: &str = concat!(
        r#"{"chat_id":"c1"}"#,
        "\n",
        r#"{"content":"Hel"}"#,
        "\n",
        r#"{"content":"lo"}"#,
        "\n",
    );

    fn decode_all(decoder: &mut ChunkDecoder, bytes: &[u8]) -> Vec<ChatChunk> {
        let mut chunks = decoder.feed(bytes);
        if let Some(chunk) = decoder.finish() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn whole_payload_decodes_in_order() {
        let mut decoder = ChunkDecoder::new();
        let chunks = decode_all(&mut decoder, WIRE.as_bytes());
        assert_eq!(
            chunks,
            vec![
                ChatChunk::ChatId("c1".to_string()),
                ChatChunk::Content("Hel".to_string()),
                ChatChunk::Content("lo".to_string()),
            ]
        );
    }

    #[test]
    fn byte_at_a_time_delivery_yields_the_same_sequence() {
        let mut whole = ChunkDecoder::new();
        let expected = decode_all(&mut whole, WIRE.as_bytes());

        let mut split = ChunkDecoder::new();
        let mut chunks = Vec::new();
        for byte in WIRE.as_bytes() {
            chunks.extend(split.feed(std::slice::from_ref(byte)));
        }
        if let Some(chunk) = split.finish() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, expected);
    }

    #[test]
    fn multibyte_codepoints_survive_arbitrary_split_points() {
        let wire = "{\"content\":\"héllo wörld\"}\n".as_bytes();
        for split_at in 0..wire.len() {
            let mut decoder = ChunkDecoder::new();
            let mut chunks = decoder.feed(&wire[..split_at]);
            chunks.extend(decoder.feed(&wire[split_at..]));
            assert_eq!(
                chunks,
                vec![ChatChunk::Content("héllo wörld".to_string())],
                "split at byte {split_at}"
            );
        }
    }

    #[test]
    fn a_malformed_line_is_skipped_without_affecting_neighbors() {
        let wire = concat!(
            r#"{"content":"a"}"#,
            "\n",
            "{not json}\n",
            r#"{"content":"b"}"#,
            "\n",
        );
        let mut decoder = ChunkDecoder::new();
        assert_eq!(
            decoder.feed(wire.as_bytes()),
            vec![
                ChatChunk::Content("a".to_string()),
                ChatChunk::Content("b".to_string()),
            ]
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.feed(b"\n\n  \n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn a_trailing_line_without_newline_is_flushed_by_finish() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.feed(br#"{"content":"tail"}"#).is_empty());
        assert_eq!(
            decoder.finish(),
            Some(ChatChunk::Content("tail".to_string()))
        );
        assert!(decoder.finish().is_none());
    }

    async fn authed_params(base_url: &str, stream_id: u64) -> StreamParams {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn SecretStore>;
        let client = reqwest::Client::new();
        let tokens = TokenManager::new(store, client.clone(), base_url.to_string());
        tokens.store_tokens("token", Some("refresh")).await.unwrap();
        StreamParams {
            client,
            base_url: base_url.to_string(),
            tokens,
            request: ChatStreamRequest {
                chat_id: None,
                configuration_id: None,
                content: "Hello".to_string(),
                attachment_ids: Vec::new(),
                think_model: false,
            },
            stream_id,
        }
    }

    #[tokio::test]
    async fn streamed_chunks_arrive_in_order_and_done_fires_once() {
        let base_url = spawn(|request| {
            assert_eq!(request.path, "/chat");
            CannedReply::Stream {
                pieces: WIRE
                    .as_bytes()
                    .chunks(7)
                    .map(<[u8]>::to_vec)
                    .collect(),
            }
        })
        .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(authed_params(&base_url, 1).await);

        let mut events = Vec::new();
        while let Some((event, id)) = rx.recv().await {
            assert_eq!(id, 1);
            let done = matches!(event, StreamEvent::Done);
            events.push(event);
            if done {
                break;
            }
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::Chunk(ChatChunk::ChatId(id)) if id == "c1"));
        assert!(matches!(&events[3], StreamEvent::Done));
        assert!(rx.try_recv().is_err(), "no events after done");
    }

    #[tokio::test]
    async fn a_401_stream_open_is_reissued_once_with_a_fresh_token() {
        let chat_calls = Arc::new(AtomicUsize::new(0));
        let chat_counter = Arc::clone(&chat_calls);
        let base_url = spawn(move |request| match request.path.as_str() {
            "/auth/refresh" => CannedReply::Json {
                status: 200,
                body: r#"{"access_token":"fresh"}"#.to_string(),
            },
            "/chat" => {
                chat_counter.fetch_add(1, Ordering::SeqCst);
                if request.authorization.as_deref() == Some("Bearer fresh") {
                    CannedReply::Stream {
                        pieces: vec![WIRE.as_bytes().to_vec()],
                    }
                } else {
                    CannedReply::Json {
                        status: 401,
                        body: "{}".to_string(),
                    }
                }
            }
            other => panic!("unexpected path {other}"),
        })
        .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(authed_params(&base_url, 7).await);

        let mut saw_done = false;
        let mut content = String::new();
        while let Some((event, _)) = rx.recv().await {
            match event {
                StreamEvent::Chunk(ChatChunk::Content(delta)) => content.push_str(&delta),
                StreamEvent::Chunk(_) => {}
                StreamEvent::Done => {
                    saw_done = true;
                    break;
                }
                StreamEvent::Error(err) => panic!("unexpected stream error: {err}"),
            }
        }
        assert!(saw_done);
        assert_eq!(content, "Hello");
        assert_eq!(chat_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_failed_request_emits_error_without_done() {
        let base_url = spawn(|_| CannedReply::Json {
            status: 500,
            body: "overloaded".to_string(),
        })
        .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(authed_params(&base_url, 3).await);

        let (event, id) = rx.recv().await.expect("one event");
        assert_eq!(id, 3);
        match event {
            StreamEvent::Error(message) => assert!(message.contains("overloaded")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "error must not be followed by done");
    }
}
