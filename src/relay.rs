//! Streaming relay: daemon JSON lines in, browser events out.
//!
//! The daemon answers a streaming generation with newline-delimited JSON
//! objects, each optionally carrying a `response` token and a `done` flag.
//! Body chunks do not respect line boundaries, so the body is framed with a
//! `Decoder` that buffers only up to the next newline. A line that fails to
//! decode is skipped.

use crate::daemon::DaemonClient;
use crate::error::RelayError;
use crate::observer::{RelayObserver, Route};
use crate::protocol::{GenerationChunk, RelayEvent};
use async_stream::stream;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;
use std::sync::Arc;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Longest daemon line kept in memory (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Newline-delimited JSON decoder for the daemon body.
///
/// Blank lines, lines that are not JSON objects, and lines longer than
/// `max_length` are skipped. An oversized line is discarded as it arrives, so
/// the read buffer never grows past `max_length`.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    max_length: usize,
    /// Where to resume the newline search in the read buffer.
    next_index: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = GenerationChunk;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + self.next_index);

            let Some(pos) = newline else {
                if self.discarding || src.len() > self.max_length {
                    if !self.discarding {
                        debug!("Discarding daemon line longer than {} bytes", self.max_length);
                    }
                    src.clear();
                    self.discarding = true;
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let line = src.split_to(pos);
            src.advance(1);
            self.next_index = 0;

            if std::mem::take(&mut self.discarding) || pos > self.max_length {
                continue;
            }
            if let Some(chunk) = GenerationChunk::from_json_line(&line) {
                return Ok(Some(chunk));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        let rest = src.split();
        self.next_index = 0;
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(GenerationChunk::from_json_line(&rest))
    }
}

/// Events for one decoded chunk, token first.
fn chunk_events(chunk: GenerationChunk) -> impl Iterator<Item = RelayEvent> {
    let done = chunk.done.then_some(RelayEvent::Done);
    chunk.response.map(RelayEvent::Token).into_iter().chain(done)
}

/// Translate a daemon body into relay events.
///
/// Yields `Ok(Token)` for every token in arrival order and `Ok(Done)` once the
/// daemon reports completion, after which the body is dropped without being
/// read further. A body error yields one `Err(Connection)` and ends the stream.
/// A body that ends without `done` ends the stream with no extra item.
pub fn relay_chunks<S, E>(body: S) -> impl Stream<Item = Result<RelayEvent, RelayError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let reader = StreamReader::new(body.map(|item| item.map_err(io::Error::other)));
    let frames = FramedRead::new(reader, ChunkCodec::new());

    stream! {
        let mut frames = std::pin::pin!(frames);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(chunk) => {
                    for event in chunk_events(chunk) {
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                }
                Err(err) => {
                    yield Err(RelayError::Connection(err.to_string()));
                    return;
                }
            }
        }
    }
}

/// Open a streaming generation and relay it.
///
/// Nothing happens until the returned stream is first polled. The stream owns
/// the daemon response; dropping it (for example when the browser goes away
/// and the SSE body is dropped) closes the daemon connection.
pub fn open_relay(
    client: DaemonClient,
    observer: Arc<dyn RelayObserver>,
    prompt: String,
) -> impl Stream<Item = RelayEvent> {
    stream! {
        observer.daemon_call_started(Route::StreamChat, client.base_url(), client.model());

        let response = match client.generate_stream(&prompt).await {
            Ok(response) => response,
            Err(err) => {
                observer.error_produced(Route::StreamChat, &err);
                yield RelayEvent::Error(err.to_string());
                return;
            }
        };

        let mut chars = 0;
        let mut finished = false;
        for await item in relay_chunks(response.bytes_stream()) {
            match item {
                Ok(RelayEvent::Token(token)) => {
                    chars += token.chars().count();
                    yield RelayEvent::Token(token);
                }
                Ok(event) => {
                    if event == RelayEvent::Done {
                        finished = true;
                        observer.response_produced(Route::StreamChat, chars);
                    }
                    yield event;
                }
                Err(err) => {
                    finished = true;
                    observer.error_produced(Route::StreamChat, &err);
                    yield RelayEvent::Error(err.to_string());
                }
            }
        }

        // The daemon closed the body without `done`.
        if !finished {
            observer.response_produced(Route::StreamChat, chars);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn body(parts: &[&str]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        let parts: Vec<_> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        futures::stream::iter(parts)
    }

    async fn collect<S, E>(body: S) -> Vec<Result<RelayEvent, RelayError>>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        relay_chunks(body).collect().await
    }

    fn token(t: &str) -> Result<RelayEvent, RelayError> {
        Ok(RelayEvent::Token(t.to_string()))
    }

    fn decode_all(codec: &mut ChunkCodec, buf: &mut BytesMut) -> Vec<GenerationChunk> {
        let mut out = Vec::new();
        while let Some(chunk) = codec.decode(buf).unwrap() {
            out.push(chunk);
        }
        out
    }

    fn chunk(response: &str) -> GenerationChunk {
        GenerationChunk {
            response: Some(response.to_string()),
            done: false,
        }
    }

    #[test]
    fn test_codec_frames_across_pushes() {
        let mut codec = ChunkCodec::new();
        let mut buf = BytesMut::from(&b"{\"resp"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"onse\":\"a\"}\r\n\n{bad}\n{\"done\"");
        assert_eq!(decode_all(&mut codec, &mut buf), vec![chunk("a")]);
        assert_eq!(&buf[..], b"{\"done\"");

        buf.extend_from_slice(b":true}");
        let last = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert!(last.done);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_discards_oversized_line() {
        let mut codec = ChunkCodec::with_max_length(24);
        let mut buf = BytesMut::from(&b"{\"response\":\"this line is far too long"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        assert!(buf.is_empty());

        buf.extend_from_slice(b" and still going");
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        assert!(buf.len() <= 24);

        buf.extend_from_slice(b"\"}\n{\"response\":\"ok\"}\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec![chunk("ok")]);
    }

    #[test]
    fn test_codec_skips_complete_oversized_line() {
        let mut codec = ChunkCodec::with_max_length(24);
        let mut buf = BytesMut::from(&b"{\"response\":\"much too long\"}\n{\"response\":\"ok\"}\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![chunk("ok")]);
    }

    #[tokio::test]
    async fn test_tokens_then_done() {
        let events = collect(body(&[
            "{\"response\":\"a\"}\n",
            "{\"response\":\"b\"}\n",
            "{\"done\":true}\n",
        ]))
        .await;
        assert_eq!(events, vec![token("a"), token("b"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_stops_after_done_even_with_more_bytes() {
        let events = collect(body(&[
            "{\"response\":\"a\"}\n{\"done\":true}\n{\"response\":\"late\"}\n",
            "{\"response\":\"later\"}\n",
        ]))
        .await;
        assert_eq!(events, vec![token("a"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_body_not_polled_after_done() {
        let tail = futures::stream::poll_fn(
            |_| -> std::task::Poll<Option<Result<Bytes, io::Error>>> {
                panic!("body polled after done")
            },
        );
        let source = body(&["{\"done\":true}\n"]).chain(tail);
        let events = collect(source).await;
        assert_eq!(events, vec![Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_token_and_done_in_one_chunk() {
        let events = collect(body(&["{\"response\":\"hello\",\"done\":true}\n"])).await;
        assert_eq!(events, vec![token("hello"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_malformed_line_skipped() {
        let events = collect(body(&[
            "{\"response\":\"a\"}\n",
            "{\"response\": broken\n",
            "\n",
            "{\"response\":\"b\"}\n{\"done\":true}\n",
        ]))
        .await;
        assert_eq!(events, vec![token("a"), token("b"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_token_kept_when_done_is_null() {
        let events = collect(body(&[
            "{\"response\":\"a\",\"done\":null}\n",
            "{\"response\":\"b\",\"done\":true}\n",
        ]))
        .await;
        assert_eq!(events, vec![token("a"), token("b"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_oversized_line_skipped() {
        let huge = format!("{{\"response\":\"{}\"}}\n", "x".repeat(MAX_LINE_LENGTH));
        let events = collect(body(&[
            "{\"response\":\"a\"}\n",
            huge.as_str(),
            "{\"response\":\"b\"}\n{\"done\":true}\n",
        ]))
        .await;
        assert_eq!(events, vec![token("a"), token("b"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_tokens_forwarded_verbatim() {
        let events = collect(body(&["{\"response\":\"  spaced \\n\"}\n"])).await;
        assert_eq!(events, vec![token("  spaced \n")]);
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let events = collect(body(&["{\"respo", "nse\":\"a\"}", "\n{\"done\":", "true}\n"])).await;
        assert_eq!(events, vec![token("a"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let events = collect(body(&["{\"response\":\"a\"}\n{\"response\":\"b\",\"done\":true}"])).await;
        assert_eq!(events, vec![token("a"), token("b"), Ok(RelayEvent::Done)]);
    }

    #[tokio::test]
    async fn test_body_ends_without_done() {
        let events = collect(body(&["{\"response\":\"a\"}\n"])).await;
        assert_eq!(events, vec![token("a")]);
    }

    #[tokio::test]
    async fn test_body_error_is_terminal() {
        let source = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from_static(b"{\"response\":\"b\"}\n")),
        ]);
        let events = collect(source).await;
        assert_eq!(
            events,
            vec![
                token("a"),
                Err(RelayError::Connection("reset by peer".to_string()))
            ]
        );
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_relay_releases_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(Arc::clone(&dropped));
        let source = body(&["{\"response\":\"a\"}\n"])
            .chain(futures::stream::pending())
            .map(move |item| {
                let _guard = &guard;
                item
            });

        let mut relay = Box::pin(relay_chunks(source));
        assert_eq!(relay.next().await, Some(token("a")));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(relay);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
