// SPDX-License-Identifier: MIT OR Apache-2.0
//! Turns a [`rag_broker::StreamHandle`] into an Axum SSE response: the ring
//! snapshot first, then either a synthesized terminal frame (already
//! closed) or the live subscriber channel, with a periodic keep-alive
//! comment for idle connections.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use rag_broker::StreamHandle;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

type BoxedEventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>;

fn to_sse_event(value: serde_json::Value) -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default().data(value.to_string()))
}

/// Build the SSE response for a freshly opened stream subscription.
pub fn stream_handle_to_sse(handle: StreamHandle) -> Sse<BoxedEventStream> {
    let snapshot_stream = tokio_stream::iter(handle.snapshot.into_iter().map(to_sse_event));

    let combined: BoxedEventStream = if handle.closed {
        let done = json!({ "type": "done", "reason": handle.reason });
        Box::pin(snapshot_stream.chain(tokio_stream::once(to_sse_event(done))))
    } else {
        let live = UnboundedReceiverStream::new(handle.receiver).map(to_sse_event);
        Box::pin(snapshot_stream.chain(live))
    };

    Sse::new(combined).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keep-alive"))
}
