//! Decoder for newline-delimited JSON generation streams.
//!
//! Each line is one object: `{"response": "...", "done": false}`. The final
//! object carries `"done": true`. A backend failure mid-stream arrives as
//! `{"error": "..."}`.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Future, Stream, StreamExt};
use serde::Deserialize;

use ragstream_core::errors::GenerationError;
use ragstream_core::stream::GenerationFragment;

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a single NDJSON line into a fragment.
pub fn decode_line(line: &[u8]) -> Result<GenerationFragment, GenerationError> {
    let chunk: GenerateChunk = serde_json::from_slice(line).map_err(|e| {
        GenerationError::Decode(format!("{e}: {}", String::from_utf8_lossy(line)))
    })?;

    if let Some(error) = chunk.error {
        return Err(GenerationError::Backend(error));
    }

    Ok(GenerationFragment {
        text: chunk.response,
        done: chunk.done,
    })
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Wraps a response byte stream and yields fragments line by line.
///
/// Yields at most one `Err`, after which the stream is finished. Bytes are
/// buffered until a newline so multi-byte characters split across chunks
/// decode correctly.
pub struct NdjsonStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<GenerationFragment, GenerationError>>,
    finished: bool,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl NdjsonStream {
    pub fn new<E: Display>(
        byte_stream: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream.map(|r| r.map_err(|e| e.to_string()))),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    /// Move every complete line from the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        match decode_line(line) {
            Ok(fragment) => {
                let done = fragment.done;
                self.pending.push_back(Ok(fragment));
                if done {
                    self.finished = true;
                }
            }
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

impl Stream for NdjsonStream {
    type Item = Result<GenerationFragment, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.pending.pop_front() {
            return Poll::Ready(Some(item));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.drain_lines();

                    if let Some(item) = self.pending.pop_front() {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(GenerationError::StreamInterrupted(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // A last line without a trailing newline is still a line.
                    let rest = std::mem::take(&mut self.buffer);
                    self.push_line(&rest);
                    return Poll::Ready(self.pending.pop_front());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(GenerationError::StreamInterrupted(
                            format!("idle timeout after {}s", self.idle_duration.as_secs()),
                        ))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, String>> + Send + 'static {
        let owned: Vec<Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(stream: NdjsonStream) -> Vec<Result<GenerationFragment, GenerationError>> {
        stream.collect().await
    }

    #[test]
    fn decode_line_reads_response() {
        let f = decode_line(br#"{"model":"llama3.1","response":"Hi","done":false}"#).unwrap();
        assert_eq!(f, GenerationFragment::text("Hi"));
    }

    #[test]
    fn decode_line_backend_error() {
        let err = decode_line(br#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Backend(m) if m == "model not found"));
    }

    #[test]
    fn decode_line_malformed() {
        assert!(matches!(
            decode_line(b"{\"response\": "),
            Err(GenerationError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn yields_one_fragment_per_line() {
        let stream = NdjsonStream::new(
            chunks(&[
                "{\"response\":\"One should act \"}\n{\"response\":\"without attachment.\"}\n",
                "{\"response\":\"\",\"done\":true}\n",
            ]),
            Duration::from_secs(5),
        );
        let items = collect(stream).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap().text).collect();
        assert_eq!(texts, vec!["One should act ", "without attachment.", ""]);
    }

    #[tokio::test]
    async fn line_split_across_chunks() {
        let stream = NdjsonStream::new(
            chunks(&["{\"respo", "nse\":\"Yes.\"}\n{\"response\"", ":\"No.\"}\n"]),
            Duration::from_secs(5),
        );
        let texts: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|i| i.unwrap().text)
            .collect();
        assert_eq!(texts, vec!["Yes.", "No."]);
    }

    #[tokio::test]
    async fn multibyte_char_split_across_chunks() {
        let line = "{\"response\":\"Bhagavad-gītā.\"}\n".as_bytes().to_vec();
        let split = line.iter().position(|b| *b > 0x7f).unwrap() + 1;
        let parts: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::copy_from_slice(&line[..split])),
            Ok(Bytes::copy_from_slice(&line[split..])),
        ];
        let stream = NdjsonStream::new(futures::stream::iter(parts), Duration::from_secs(5));
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().text, "Bhagavad-gītā.");
    }

    #[tokio::test]
    async fn trailing_line_without_newline() {
        let stream = NdjsonStream::new(chunks(&["{\"response\":\"end.\"}"]), Duration::from_secs(5));
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().text, "end.");
    }

    #[tokio::test]
    async fn stops_after_done() {
        let stream = NdjsonStream::new(
            chunks(&["{\"response\":\"a.\",\"done\":true}\n{\"response\":\"ignored\"}\n"]),
            Duration::from_secs(5),
        );
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn malformed_line_ends_stream_with_error() {
        let stream = NdjsonStream::new(
            chunks(&["{\"response\":\"ok \"}\nnot-json\n{\"response\":\"never\"}\n"]),
            Duration::from_secs(5),
        );
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(GenerationError::Decode(_))));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from("{\"response\":\"partial \"}\n")),
            Err("connection reset".into()),
            Ok(Bytes::from("{\"response\":\"never\"}\n")),
        ];
        let stream = NdjsonStream::new(futures::stream::iter(parts), Duration::from_secs(5));
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(
            matches!(&items[1], Err(GenerationError::StreamInterrupted(m)) if m.contains("reset"))
        );
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let stream = NdjsonStream::new(
            chunks(&["\n\r\n{\"response\":\"x\"}\n\n"]),
            Duration::from_secs(5),
        );
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<Bytes, String>>();
        let mut stream = Box::pin(NdjsonStream::new(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(Err(GenerationError::StreamInterrupted(msg))) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, String>>(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut stream = Box::pin(NdjsonStream::new(rx_stream, Duration::from_secs(5)));

        tx.send(Ok(Bytes::from("{\"response\":\"a\"}\n"))).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        tokio::time::advance(Duration::from_secs(4)).await;

        tx.send(Ok(Bytes::from("{\"response\":\"b\"}\n"))).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        drop(tx);
        let event = stream.next().await;
        assert!(event.is_none(), "expected stream end, got: {event:?}");
    }
}
