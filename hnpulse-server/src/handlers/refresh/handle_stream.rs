use std::{convert::Infallible, pin::Pin, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::HeaderMap,
    response::{Sse, sse::Event},
};
use hnpulse_core::{RefreshEvent, RefreshGuard};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infra::{
    app_state::AppState,
    config::StreamConfig,
    refresh::{EventFrame, EventHub, Recv},
};

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub type RefreshEventStream =
    Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send + 'static>>;

pub async fn refresh_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<RefreshEventStream> {
    let last_sequence = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    Sse::new(build_refresh_stream(
        Arc::clone(&state.hub),
        &state.guard,
        &state.config.stream,
        last_sequence,
        state.shutdown.clone(),
    ))
}

/// Snapshot, then replay of the latest lifecycle, then live frames until a
/// terminal event or `shutdown`. Idle periods longer than `heartbeat`
/// produce a comment.
///
/// A reconnecting client passes its `Last-Event-ID` as `last_sequence` and
/// resumes with the frames it missed instead of the replay window. An id
/// from before a restart (ahead of the hub) falls back to the replay.
pub fn build_refresh_stream(
    hub: Arc<EventHub>,
    guard: &RefreshGuard,
    options: &StreamConfig,
    last_sequence: Option<u64>,
    shutdown: CancellationToken,
) -> RefreshEventStream {
    let subscription = match last_sequence {
        Some(sequence) if sequence <= hub.latest_sequence() => {
            hub.subscribe_since(sequence)
        }
        _ => hub.subscribe_with_replay(options.replay),
    };
    let snapshot = snapshot_event(guard.is_in_progress());
    let heartbeat = options.heartbeat.max(Duration::from_millis(10));
    let subscriber = subscription.id();
    debug!(subscriber, "refresh stream opened");

    let stream = async_stream::stream! {
        if let Some(event) = snapshot {
            yield Ok::<Event, Infallible>(event);
        }

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => None,
                received = subscription.recv_timeout(heartbeat) => Some(received),
            };
            let Some(received) = received else {
                break;
            };

            match received {
                Recv::Frame(frame) => {
                    let terminal = frame.event.is_terminal();
                    if let Some(event) = frame_to_event(&frame) {
                        yield Ok(event);
                    }
                    if terminal {
                        break;
                    }
                }
                Recv::TimedOut => yield Ok(Event::default().comment("heartbeat")),
            }
        }

        debug!(
            subscriber,
            dropped = subscription.dropped(),
            "refresh stream finished"
        );
    };

    Box::pin(stream)
}

fn snapshot_event(in_progress: bool) -> Option<Event> {
    let message = if in_progress {
        "Refresh in progress"
    } else {
        "No refresh running"
    };
    let event = RefreshEvent::status(in_progress, message);
    encode(&event).map(|data| {
        Event::default().event(event.kind.sse_event_name()).data(data)
    })
}

fn frame_to_event(frame: &EventFrame) -> Option<Event> {
    let name = frame.event.kind.sse_event_name();
    encode(&frame.event).map(|data| {
        Event::default()
            .event(name)
            .data(data)
            .id(frame.sequence.to_string())
    })
}

fn encode(event: &RefreshEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|err| {
            warn!("failed to serialize refresh event: {err}");
            err
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn guard() -> RefreshGuard {
        RefreshGuard::new(
            Arc::new(hnpulse_core::InMemoryCompletionLog::new()),
            Arc::new(hnpulse_core::SystemClock),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn late_subscriber_replays_and_terminates() {
        let hub = Arc::new(EventHub::default());
        hub.publish(RefreshEvent::status(true, "Refresh started"));
        hub.publish(RefreshEvent::info("Scraping"));
        hub.publish(RefreshEvent::done("Refresh complete"));

        let stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &StreamConfig::default(),
            None,
            CancellationToken::new(),
        );
        let events: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            stream.collect::<Vec<_>>(),
        )
        .await
        .expect("stream ends after the terminal event");

        // snapshot + three replayed frames
        assert_eq!(events.len(), 4);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_sends_heartbeats_until_done() {
        let hub = Arc::new(EventHub::default());
        let options = StreamConfig {
            heartbeat: Duration::from_secs(15),
            ..StreamConfig::default()
        };
        let mut stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &options,
            None,
            CancellationToken::new(),
        );

        assert!(stream.next().await.is_some(), "snapshot");
        assert_eq!(hub.subscriber_count(), 1);

        let publisher = Arc::clone(&hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            publisher.publish(RefreshEvent::done("Refresh complete"));
        });

        let mut remaining = 0;
        while stream.next().await.is_some() {
            remaining += 1;
        }
        // two heartbeats (15s, 30s) and the terminal frame at 40s
        assert_eq!(remaining, 3);
        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_idle_stream() {
        let hub = Arc::new(EventHub::default());
        let shutdown = CancellationToken::new();
        let mut stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &StreamConfig::default(),
            None,
            shutdown.clone(),
        );
        assert!(stream.next().await.is_some(), "snapshot");

        shutdown.cancel();
        let ended =
            tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        assert!(matches!(ended, Ok(None)));
    }

    #[tokio::test]
    async fn dropping_stream_unregisters_subscriber() {
        let hub = Arc::new(EventHub::default());
        let stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &StreamConfig::default(),
            None,
            CancellationToken::new(),
        );
        assert_eq!(hub.subscriber_count(), 1);
        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn reconnect_resumes_after_last_event_id() {
        let hub = Arc::new(EventHub::default());
        hub.publish(RefreshEvent::status(true, "Refresh started"));
        let seen = hub.publish(RefreshEvent::info("Scraping"));
        hub.publish(RefreshEvent::info("Summarizing"));
        hub.publish(RefreshEvent::done("Refresh complete"));

        let stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &StreamConfig::default(),
            Some(seen.sequence),
            CancellationToken::new(),
        );
        let events: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            stream.collect::<Vec<_>>(),
        )
        .await
        .expect("stream ends after the terminal event");

        // snapshot + the two frames after the last seen id
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn unknown_last_event_id_falls_back_to_replay() {
        let hub = Arc::new(EventHub::default());
        hub.publish(RefreshEvent::status(true, "Refresh started"));
        hub.publish(RefreshEvent::done("Refresh complete"));

        let stream = build_refresh_stream(
            Arc::clone(&hub),
            &guard(),
            &StreamConfig::default(),
            Some(9_000),
            CancellationToken::new(),
        );
        let events: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            stream.collect::<Vec<_>>(),
        )
        .await
        .expect("stream ends after the terminal event");

        assert_eq!(events.len(), 3);
    }
}
