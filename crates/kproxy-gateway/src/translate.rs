use std::io;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, warn};

use kproxy_core::GatewayError;
use kproxy_protocol::UpstreamFrame;
use kproxy_protocol::openai::{ChatCompletionChunk, ChatCompletionResponse};

use crate::transport::ChunkStream;

/// Marker the upstream occasionally echoes back ahead of the real reply.
pub const END_USER_MARKER: &str = "<|END_USER|>";

const DONE_EVENT: &[u8] = b"data: [DONE]\n\n";

/// Identity of one translated response: generated once per attempt, echoed on
/// every event that attempt emits.
pub struct ResponseTag {
    pub id: String,
    pub model: String,
    pub created: i64,
}

pub async fn next_frame(chunks: &mut ChunkStream) -> Option<Result<UpstreamFrame, io::Error>> {
    match chunks.next().await {
        Some(Ok(bytes)) => Some(Ok(UpstreamFrame::from_chunk(&bytes))),
        Some(Err(err)) => Some(Err(err)),
        None => None,
    }
}

/// Streaming mode: one outbound SSE chunk per non-empty content frame, then a
/// terminal `[DONE]` sentinel. An error frame observed after output started
/// cannot be retried; its raw payload is emitted verbatim as the final event.
pub fn stream_events(
    tag: ResponseTag,
    first: Option<UpstreamFrame>,
    mut chunks: ChunkStream,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
    async_stream::stream! {
        let mut pending = first;
        loop {
            let frame = match pending.take() {
                Some(frame) => Some(Ok(frame)),
                None => next_frame(&mut chunks).await,
            };
            match frame {
                Some(Ok(UpstreamFrame::Content(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    let chunk =
                        ChatCompletionChunk::content(&tag.id, &tag.model, tag.created, text);
                    if let Some(event) = sse_json_bytes(&chunk) {
                        yield Ok(event);
                    }
                }
                Some(Ok(UpstreamFrame::Error(payload))) => {
                    warn!(event = "stream_upstream_error", response_id = %tag.id);
                    if let Some(event) = sse_json_bytes(&payload) {
                        yield Ok(event);
                    }
                    return;
                }
                Some(Err(err)) => {
                    // Response already started; surface a generic inline error
                    // event and close rather than leaking transport detail.
                    error!(event = "stream_read_error", response_id = %tag.id, error = %err);
                    let payload =
                        serde_json::json!({ "error": { "message": "internal gateway error" } });
                    if let Some(event) = sse_json_bytes(&payload) {
                        yield Ok(event);
                    }
                    return;
                }
                None => {
                    yield Ok(Bytes::from_static(DONE_EVENT));
                    return;
                }
            }
        }
    }
}

/// Non-streaming mode: buffer content frames in arrival order and emit one
/// aggregated completion once the upstream closes.
pub async fn aggregate(
    tag: ResponseTag,
    first: Option<UpstreamFrame>,
    mut chunks: ChunkStream,
) -> Result<ChatCompletionResponse, GatewayError> {
    let mut buffer = String::new();
    let mut pending = first;
    loop {
        let frame = match pending.take() {
            Some(frame) => Some(Ok(frame)),
            None => next_frame(&mut chunks).await,
        };
        match frame {
            Some(Ok(UpstreamFrame::Content(text))) => buffer.push_str(&text),
            Some(Ok(UpstreamFrame::Error(payload))) => {
                // Too late to retry; the serialized envelope becomes the reply.
                warn!(event = "aggregate_upstream_error", response_id = %tag.id);
                let content = payload.to_string();
                return Ok(ChatCompletionResponse::assistant(
                    tag.id, tag.model, tag.created, content,
                ));
            }
            Some(Err(err)) => {
                return Err(GatewayError::Internal(
                    anyhow::Error::new(err).context("upstream stream read failed"),
                ));
            }
            None => break,
        }
    }
    let content = clean_completion_text(&buffer);
    Ok(ChatCompletionResponse::assistant(
        tag.id, tag.model, tag.created, content,
    ))
}

/// Cleanup applied to aggregated output only, reproducing the upstream's
/// formatting noise removal byte for byte: drop everything through the
/// `<|END_USER|>` marker if present, then one leading line break together with
/// a single letter artifact behind it, then surrounding whitespace.
pub fn clean_completion_text(buffer: &str) -> String {
    let mut text = buffer;
    if let Some(index) = text.find(END_USER_MARKER) {
        text = &text[index + END_USER_MARKER.len()..];
    }
    if let Some(rest) = text.strip_prefix('\n') {
        text = rest;
        if text
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
        {
            text = &text[1..];
        }
    }
    text.trim().to_string()
}

pub fn sse_json_bytes<T: Serialize>(value: &T) -> Option<Bytes> {
    let payload = serde_json::to_vec(value).ok()?;
    let mut data = Vec::with_capacity(payload.len() + 8);
    data.extend_from_slice(b"data: ");
    data.extend_from_slice(&payload);
    data.extend_from_slice(b"\n\n");
    Some(Bytes::from(data))
}
