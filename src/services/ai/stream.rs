use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::stream::{self, Stream, StreamExt};

use super::error::ChatError;
use super::types::{ByotChatCompletionStreamResponse, ChunkStream, StreamChunk};

struct DecodeState<S> {
    upstream: S,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn upstream SSE chunks into text deltas followed by one terminal chunk.
///
/// An upstream error ends the stream without the terminal chunk. Dropping
/// the returned stream drops the upstream and releases its connection.
pub(super) fn decode_stream<S, E>(upstream: S) -> ChunkStream
where
    S: Stream<Item = Result<ByotChatCompletionStreamResponse, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        upstream,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(StreamChunk::delta(text)), st));
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(chunk)) => st.pending.extend(chunk.deltas()),
                Some(Err(err)) => {
                    st.finished = true;
                    log::warn!("Stream error: {}", err);
                    return Some((
                        Err(ChatError::transport(format!(
                            "Failed to stream response: {err}"
                        ))),
                        st,
                    ));
                }
                None => {
                    st.finished = true;
                    return Some((Ok(StreamChunk::complete()), st));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> Result<ByotChatCompletionStreamResponse, String> {
        Ok(serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn test_deltas_then_sentinel() {
        let upstream = stream::iter(vec![
            chunk(json!({ "choices": [{ "delta": { "role": "assistant" } }] })),
            chunk(json!({ "choices": [{ "delta": { "content": "Hel" } }] })),
            chunk(json!({ "event": { "delta": { "text": "lo" } } })),
        ]);
        let items: Vec<_> = decode_stream(upstream).collect().await;
        assert_eq!(
            items,
            vec![
                Ok(StreamChunk::delta("Hel")),
                Ok(StreamChunk::delta("lo")),
                Ok(StreamChunk::complete()),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_ends_stream_without_sentinel() {
        let upstream = stream::iter(vec![
            chunk(json!({ "choices": [{ "delta": { "content": "par" } }] })),
            Err("connection reset".to_string()),
            chunk(json!({ "choices": [{ "delta": { "content": "never" } }] })),
        ]);
        let items: Vec<_> = decode_stream(upstream).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(StreamChunk::delta("par")));
        match &items[1] {
            Err(ChatError::Transport { message }) => {
                assert!(message.contains("connection reset"))
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
