//! SSE response encoding
//!
//! Bridges a canonical event stream into an axum `text/event-stream`
//! response through the dialect stream encoder. Dropping the response body
//! (client disconnect) cancels the request context, which aborts the
//! upstream call and releases the credential lease.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use llm_mux_core::translator::{SseFrame, StreamEncoder};
use llm_mux_core::{Error, EventStream, StreamEvent};

pub fn sse_response(
    stream: EventStream,
    mut encoder: StreamEncoder,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = cancel.drop_guard();

    let events = async_stream::stream! {
        let _guard = guard;
        let mut inner = stream;

        while let Some(item) = inner.next().await {
            match item {
                Ok(event) => {
                    let done = matches!(event, StreamEvent::Done);
                    for frame in encoder.encode(&event) {
                        yield Ok::<Event, Infallible>(to_event(frame));
                    }
                    if done {
                        break;
                    }
                }
                Err(Error::Cancelled) => return,
                Err(err) => {
                    yield Ok(error_event(&err));
                    break;
                }
            }
        }

        for frame in encoder.finish() {
            yield Ok(to_event(frame));
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(frame: SseFrame) -> Event {
    match frame.event {
        Some(name) => Event::default().event(name).data(frame.data),
        None => Event::default().data(frame.data),
    }
}

fn error_event(err: &Error) -> Event {
    Event::default().data(
        json!({
            "error": { "type": err.kind(), "message": err.to_string() }
        })
        .to_string(),
    )
}
