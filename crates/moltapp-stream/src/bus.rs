use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moltapp_models::config::StreamConfig;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::{EventFilter, StreamEvent, StreamEventType};

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type EventCallback = Arc<dyn Fn(&StreamEvent) -> Result<(), CallbackError> + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub events_received: u64,
    pub delivery_failures: u64,
    pub filter: EventFilter,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamMetrics {
    pub subscriber_count: usize,
    pub total_events_emitted: u64,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub uptime_seconds: u64,
    pub heartbeat_active: bool,
    pub subscribers: Vec<SubscriberInfo>,
}

struct Subscriber {
    callback: EventCallback,
    filter: EventFilter,
    events_received: u64,
    delivery_failures: u64,
    subscribed_at: DateTime<Utc>,
}

struct BusState {
    next_event_id: u64,
    next_subscriber_id: u64,
    buffer: VecDeque<StreamEvent>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    total_events: u64,
    heartbeat: Option<CancellationToken>,
    /// Emitted events awaiting delivery, in id order.
    outbox: VecDeque<Delivery>,
    /// Set while some caller is draining `outbox`.
    delivering: bool,
}

struct Delivery {
    event: StreamEvent,
    targets: Vec<(SubscriberId, EventCallback)>,
}

struct BusInner {
    capacity: usize,
    heartbeat_interval: Duration,
    started: Instant,
    state: Mutex<BusState>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = state.heartbeat.take() {
            token.cancel();
        }
    }
}

/// Pub/sub bus with a bounded replay buffer and an idle heartbeat.
///
/// Cheap to clone; clones share the same subscribers and buffer. `emit`,
/// `subscribe` and `unsubscribe` never suspend. Callbacks run after the bus
/// lock is released, so a callback may itself subscribe, unsubscribe or emit.
///
/// Every subscriber sees events in id order. One emitter at a time drains
/// the delivery queue; an `emit` made while another delivery is in progress
/// (from another task, or from inside a callback) is queued and delivered by
/// that drainer before it returns.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: config.buffer_capacity.max(1),
                heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds.max(1)),
                started: Instant::now(),
                state: Mutex::new(BusState {
                    next_event_id: 1,
                    next_subscriber_id: 1,
                    buffer: VecDeque::with_capacity(config.buffer_capacity.max(1)),
                    subscribers: BTreeMap::new(),
                    total_events: 0,
                    heartbeat: None,
                    outbox: VecDeque::new(),
                    delivering: false,
                }),
            }),
        }
    }

    /// Register `callback` for every future event matching `filter`.
    ///
    /// The first subscription starts the heartbeat (when called inside a Tokio runtime).
    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> SubscriberId
    where
        F: Fn(&StreamEvent) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = SubscriberId(state.next_subscriber_id);
        state.next_subscriber_id += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                callback: Arc::new(callback),
                filter,
                events_received: 0,
                delivery_failures: 0,
                subscribed_at: Utc::now(),
            },
        );

        if state.heartbeat.is_none() {
            state.heartbeat = start_heartbeat(&self.inner);
        }

        info!(subscriber = %id, subscribers = state.subscribers.len(), "Stream subscriber added");
        id
    }

    /// Subscribe through an unbounded channel, for transports that push events
    /// from their own task (e.g. an SSE response). Unsubscribe when the receiver
    /// is dropped.
    pub fn subscribe_channel(
        &self,
        filter: EventFilter,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(filter, move |event| {
            tx.send(event.clone())
                .map_err(|_| CallbackError::from("subscriber channel closed"))
        });
        (id, rx)
    }

    /// Remove a subscriber. Returns whether one was removed. The last removal stops the heartbeat.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.lock();
        let removed = state.subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, subscribers = state.subscribers.len(), "Stream subscriber removed");
            if state.subscribers.is_empty() {
                if let Some(token) = state.heartbeat.take() {
                    token.cancel();
                    debug!("Heartbeat stopped");
                }
            }
        }
        removed
    }

    /// Record an event and deliver it to every matching subscriber.
    pub fn emit(&self, event_type: StreamEventType, data: serde_json::Value) -> StreamEvent {
        let event = {
            let mut state = self.lock();
            let event = StreamEvent {
                id: state.next_event_id,
                event_type,
                timestamp: Utc::now(),
                data,
            };
            state.next_event_id += 1;
            state.total_events += 1;

            if state.buffer.len() >= self.inner.capacity {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());

            let targets: Vec<(SubscriberId, EventCallback)> = state
                .subscribers
                .iter_mut()
                .filter(|(_, sub)| sub.filter.matches(&event))
                .map(|(id, sub)| {
                    sub.events_received += 1;
                    (*id, sub.callback.clone())
                })
                .collect();
            state.outbox.push_back(Delivery {
                event: event.clone(),
                targets,
            });

            if state.delivering {
                return event;
            }
            state.delivering = true;
            event
        };

        self.drain_outbox();
        event
    }

    fn drain_outbox(&self) {
        loop {
            let delivery = {
                let mut state = self.lock();
                match state.outbox.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            self.deliver(delivery);
        }
    }

    fn deliver(&self, delivery: Delivery) {
        let Delivery { event, targets } = delivery;
        let mut failed = Vec::new();
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subscriber = %id, event_id = event.id, error = %e, "Subscriber callback failed");
                    failed.push(id);
                }
                Err(_) => {
                    error!(subscriber = %id, event_id = event.id, "Subscriber callback panicked");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut state = self.lock();
            for id in failed {
                if let Some(sub) = state.subscribers.get_mut(&id) {
                    sub.delivery_failures += 1;
                }
            }
        }
    }

    /// Buffered events, oldest first: those newer than `since` and of one of
    /// `types`, at most `limit` of the most recent.
    pub fn recent_events(
        &self,
        since: Option<DateTime<Utc>>,
        types: Option<&[StreamEventType]>,
        limit: usize,
    ) -> Vec<StreamEvent> {
        let state = self.lock();
        let matching: Vec<&StreamEvent> = state
            .buffer
            .iter()
            .filter(|e| since.map_or(true, |t| e.timestamp > t))
            .filter(|e| types.map_or(true, |ts| ts.contains(&e.event_type)))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn metrics(&self) -> StreamMetrics {
        let state = self.lock();
        StreamMetrics {
            subscriber_count: state.subscribers.len(),
            total_events_emitted: state.total_events,
            buffer_size: state.buffer.len(),
            buffer_capacity: self.inner.capacity,
            uptime_seconds: self.inner.started.elapsed().as_secs(),
            heartbeat_active: state.heartbeat.is_some(),
            subscribers: state
                .subscribers
                .iter()
                .map(|(id, sub)| SubscriberInfo {
                    id: *id,
                    events_received: sub.events_received,
                    delivery_failures: sub.delivery_failures,
                    filter: sub.filter.clone(),
                    subscribed_at: sub.subscribed_at,
                })
                .collect(),
        }
    }

    fn emit_heartbeat(&self) {
        let (subscribers, total_events) = {
            let state = self.lock();
            (state.subscribers.len(), state.total_events)
        };
        self.emit(
            StreamEventType::Heartbeat,
            serde_json::json!({
                "subscribers": subscribers,
                "uptime_seconds": self.inner.started.elapsed().as_secs(),
                "total_events": total_events,
            }),
        );
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn start_heartbeat(inner: &Arc<BusInner>) -> Option<CancellationToken> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("No Tokio runtime, heartbeat disabled");
        return None;
    };

    let token = CancellationToken::new();
    let cancel = token.clone();
    let weak: Weak<BusInner> = Arc::downgrade(inner);
    let period = inner.heartbeat_interval;

    handle.spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    EventBus { inner }.emit_heartbeat();
                }
            }
        }
    });
    debug!(interval_secs = period.as_secs(), "Heartbeat started");
    Some(token)
}
