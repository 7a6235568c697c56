//! Server-sent push of each result as it is recorded.
//!
//! Frames carry the result sequence as their id, so a reconnecting client that
//! sends `Last-Event-ID` gets the entries it missed from the log before the
//! live feed resumes.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream};
use futures::Stream;
use resizewatch_core::{ResultFrame, StatusReporter};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::infra::app_state::AppState;

pub const PROCESSING_STATUS_EVENT: &str = "updateProcessingStatus";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send + 'static>>;

pub async fn processing_events_sse_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<KeepAliveStream<EventStream>> {
    let last_sequence = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let stream = build_result_stream(Arc::clone(state.controller().reporter()), last_sequence);
    let until_shutdown: EventStream = Box::pin(futures::StreamExt::take_until(
        stream,
        state.shutdown.clone().cancelled_owned(),
    ));
    Sse::new(until_shutdown).keep_alive(default_keep_alive())
}

/// Replay frames newer than `last_sequence`, then follow the live channel.
pub fn build_result_stream(reporter: Arc<StatusReporter>, last_sequence: Option<u64>) -> EventStream {
    // Subscribe before reading the log so nothing falls between the two.
    let receiver = reporter.subscribe();

    let history: Vec<ResultFrame> = match last_sequence {
        Some(sequence) => reporter.frames_since(sequence),
        None => Vec::new(),
    };
    let initial_sequence = history
        .last()
        .map(|frame| frame.sequence)
        .or(last_sequence)
        .unwrap_or(0);
    let history_stream = tokio_stream::iter(
        history
            .into_iter()
            .filter_map(frame_to_event)
            .map(Ok::<Event, Infallible>)
            .collect::<Vec<_>>(),
    );

    let live_stream = async_stream::stream! {
        let mut live_receiver = BroadcastStream::new(receiver);
        let mut last_seen_sequence = initial_sequence;

        while let Some(frame_result) = live_receiver.next().await {
            match frame_result {
                Ok(frame) => {
                    if frame.sequence <= last_seen_sequence {
                        continue;
                    }
                    last_seen_sequence = frame.sequence;
                    if let Some(event) = frame_to_event(frame) {
                        yield Ok::<Event, Infallible>(event);
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "result push subscriber lagged; clients should poll get_status");
                }
            }
        }
    };

    Box::pin(history_stream.chain(live_stream))
}

fn frame_to_event(frame: ResultFrame) -> Option<Event> {
    serde_json::to_string(&frame.result)
        .map(|data| {
            Event::default()
                .event(PROCESSING_STATUS_EVENT)
                .id(frame.sequence.to_string())
                .data(data)
        })
        .map_err(|err| {
            warn!("failed to serialize processing result: {err}");
            err
        })
        .ok()
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use resizewatch_core::{ProcessingResult, ResizeError};

    fn failed(name: &str) -> ProcessingResult {
        ProcessingResult::failure(name, &ResizeError::Internal("boom".into()))
    }

    #[tokio::test]
    async fn replays_missed_frames_then_follows_live() {
        let reporter = Arc::new(StatusReporter::new(16));
        reporter.record(failed("a.png"));
        reporter.record(failed("b.png"));
        reporter.record(failed("c.png"));

        let mut stream = build_result_stream(Arc::clone(&reporter), Some(1));
        let replayed: Vec<_> = (&mut stream).take(2).collect().await;
        assert_eq!(replayed.len(), 2);

        reporter.record(failed("d.png"));
        let live = stream.next().await;
        assert!(live.is_some());
    }

    #[tokio::test]
    async fn fresh_subscriber_starts_live() {
        let reporter = Arc::new(StatusReporter::new(16));
        reporter.record(failed("old.png"));

        let mut stream = build_result_stream(Arc::clone(&reporter), None);
        reporter.record(failed("new.png"));
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_some());
    }
}
