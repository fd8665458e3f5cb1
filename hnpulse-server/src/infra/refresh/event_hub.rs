use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use hnpulse_core::RefreshEvent;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

pub const DEFAULT_HISTORY_CAPACITY: usize = 300;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 200;
pub const DEFAULT_REPLAY_WINDOW: usize = 50;

#[derive(Debug, Clone)]
pub struct EventFrame {
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: Arc<RefreshEvent>,
}

struct SubscriberQueue {
    frames: Mutex<VecDeque<EventFrame>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize, initial: VecDeque<EventFrame>) -> Self {
        Self {
            frames: Mutex::new(initial),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Never waits on the consumer. A full queue loses its oldest frame.
    fn offer(&self, frame: EventFrame) -> bool {
        let mut frames = self.frames.lock();
        let mut evicted = false;
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            evicted = true;
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<EventFrame> {
        self.frames.lock().pop_front()
    }
}

/// In-process fan-out of refresh events.
///
/// Publishing is serialized on the history lock, so every subscriber sees
/// frames in publish order. Each subscriber owns a bounded queue; a stalled
/// consumer only ever loses its own oldest frames.
pub struct EventHub {
    history: Mutex<VecDeque<EventFrame>>,
    subscribers: Mutex<HashMap<u64, Arc<SubscriberQueue>>>,
    history_capacity: usize,
    subscriber_capacity: usize,
    sequence: AtomicU64,
    next_subscriber_id: AtomicU64,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("history_capacity", &self.history_capacity)
            .field("subscriber_capacity", &self.subscriber_capacity)
            .field("subscribers", &self.subscriber_count())
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventHub {
    pub fn new(history_capacity: usize, subscriber_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        let subscriber_capacity = subscriber_capacity.max(1);
        Self {
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            subscribers: Mutex::new(HashMap::new()),
            history_capacity,
            subscriber_capacity,
            sequence: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn publish(&self, event: RefreshEvent) -> EventFrame {
        let mut history = self.history.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = EventFrame {
            sequence,
            emitted_at: Utc::now(),
            event: Arc::new(event),
        };

        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(frame.clone());

        let subscribers = self.subscribers.lock();
        for (id, queue) in subscribers.iter() {
            if queue.offer(frame.clone()) {
                trace!(
                    subscriber = id,
                    sequence,
                    "subscriber queue full; evicted oldest frame"
                );
            }
        }
        frame
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.subscribe_with_replay(0)
    }

    /// Registers a subscriber whose queue starts with up to `replay` recent
    /// frames of the latest job lifecycle.
    pub fn subscribe_with_replay(
        self: &Arc<Self>,
        replay: usize,
    ) -> Subscription {
        let history = self.history.lock();
        let initial =
            replay_window(&history, replay.min(self.subscriber_capacity));
        self.register(initial)
    }

    /// Registers a subscriber resuming after `sequence`: its queue starts
    /// with every retained frame published later, up to the queue capacity.
    pub fn subscribe_since(self: &Arc<Self>, sequence: u64) -> Subscription {
        let history = self.history.lock();
        let newer: Vec<&EventFrame> = history
            .iter()
            .filter(|frame| frame.sequence > sequence)
            .collect();
        let skip = newer.len().saturating_sub(self.subscriber_capacity);
        let initial = newer.into_iter().skip(skip).cloned().collect();
        self.register(initial)
    }

    /// Callers hold the history lock so no publish lands between the
    /// initial frames and registration.
    fn register(
        self: &Arc<Self>,
        initial: VecDeque<EventFrame>,
    ) -> Subscription {
        let replayed = initial.len();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue =
            Arc::new(SubscriberQueue::new(self.subscriber_capacity, initial));
        self.subscribers.lock().insert(id, Arc::clone(&queue));

        debug!(subscriber = id, replayed, "event subscriber registered");
        Subscription {
            id,
            hub: Arc::clone(self),
            queue,
        }
    }

    /// Idempotent; safe to race against [`Self::publish`].
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.lock().remove(&id);
        if let Some(queue) = &removed {
            debug!(
                subscriber = id,
                dropped = queue.dropped.load(Ordering::Relaxed),
                "event subscriber removed"
            );
        }
        removed.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Up to `limit` most recent frames, oldest first.
    pub fn history(&self, limit: usize) -> Vec<EventFrame> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

/// The last `limit` frames, minus anything before a terminal event that
/// newer frames follow.
fn replay_window(
    history: &VecDeque<EventFrame>,
    limit: usize,
) -> VecDeque<EventFrame> {
    let skip = history.len().saturating_sub(limit);
    let window: Vec<&EventFrame> = history.iter().skip(skip).collect();
    let stale = window
        .split_last()
        .and_then(|(_, earlier)| {
            earlier.iter().rposition(|frame| frame.event.is_terminal())
        })
        .map_or(0, |pos| pos + 1);
    window.into_iter().skip(stale).cloned().collect()
}

#[derive(Debug)]
pub enum Recv {
    Frame(EventFrame),
    TimedOut,
}

/// A registered subscriber. Dropping it unregisters from the hub.
pub struct Subscription {
    id: u64,
    hub: Arc<EventHub>,
    queue: Arc<SubscriberQueue>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<EventFrame> {
        self.queue.pop()
    }

    pub async fn recv(&self) -> EventFrame {
        loop {
            if let Some(frame) = self.queue.pop() {
                return frame;
            }
            self.queue.notify.notified().await;
        }
    }

    pub async fn recv_timeout(&self, wait: Duration) -> Recv {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(frame) => Recv::Frame(frame),
            Err(_) => Recv::TimedOut,
        }
    }

    /// Frames this subscriber lost to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
