//! # Tide Event Schedule
//!
//! Bookkeeping for high and low water instants delivered by the event feed.
//!
//! Two views are kept over each fetch:
//! - **All events**: every validated extremum, past and future. Used for the
//!   "is it high/low tide now" proximity questions.
//! - **Pending events**: the subset that was still in the future when the feed was
//!   ingested. Each one moves `Scheduled -> Fired` exactly once, on the first tick at
//!   or after its timestamp, and that transition broadcasts one [`TideNotification`].
//!
//! Both views are replaced wholesale on every successful event fetch. Event identity
//! does not survive a refresh: a fired event that reappears in the next fetch is a
//! new, scheduled event.

use crate::{EventKind, TideEvent};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Half-width of the "tide is high/low now" window
pub const PROXIMITY_WINDOW_MINUTES: i64 = 90;

/// Buffered notifications per subscriber before the oldest are dropped
const NOTIFY_CAPACITY: usize = 16;

/// Stable identity of an event inside one fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl From<&TideEvent> for EventKey {
    fn from(event: &TideEvent) -> Self {
        EventKey {
            timestamp: event.timestamp,
            kind: event.kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventState {
    Scheduled,
    Fired,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingEvent {
    pub event: TideEvent,
    pub state: EventState,
}

impl PendingEvent {
    pub fn is_fired(&self) -> bool {
        self.state == EventState::Fired
    }
}

/// Sent once per pending event when its time arrives.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TideNotification {
    pub kind: EventKind,
    pub level: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct EventSchedule {
    all: Option<BTreeMap<EventKey, TideEvent>>,
    pending: BTreeMap<EventKey, PendingEvent>,
    notifier: broadcast::Sender<TideNotification>,
}

impl Default for EventSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSchedule {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        EventSchedule {
            all: None,
            pending: BTreeMap::new(),
            notifier,
        }
    }

    /// Register a listener for fired events.
    pub fn subscribe(&self) -> broadcast::Receiver<TideNotification> {
        self.notifier.subscribe()
    }

    /// Replace both views with a freshly validated batch.
    ///
    /// Returns the number of events that were scheduled.
    pub fn replace(&mut self, events: Vec<TideEvent>, now: DateTime<Utc>) -> usize {
        let mut all = BTreeMap::new();
        let mut pending = BTreeMap::new();

        for event in events {
            let key = EventKey::from(&event);
            if event.timestamp > now {
                pending.insert(
                    key,
                    PendingEvent {
                        event,
                        state: EventState::Scheduled,
                    },
                );
            }
            all.insert(key, event);
        }

        self.all = Some(all);
        self.pending = pending;
        self.pending.len()
    }

    /// Fire every scheduled event that is due.
    ///
    /// Fired events stay in the pending set so later ticks see them as done.
    /// Delivery is fire-and-forget: a send with no live subscriber is dropped.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TideNotification> {
        let mut fired = Vec::new();

        for pending in self.pending.values_mut() {
            if pending.state == EventState::Scheduled && pending.event.timestamp <= now {
                pending.state = EventState::Fired;
                let notification = TideNotification {
                    kind: pending.event.kind,
                    level: pending.event.level,
                    timestamp: pending.event.timestamp,
                };
                let _ = self.notifier.send(notification);
                fired.push(notification);
            }
        }

        fired
    }

    /// True once any event batch has been installed, even an empty one.
    pub fn is_loaded(&self) -> bool {
        self.all.is_some()
    }

    pub fn all_events(&self) -> impl Iterator<Item = &TideEvent> {
        self.all.iter().flat_map(|all| all.values())
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &PendingEvent> {
        self.pending.values()
    }

    pub fn pending(&self, key: &EventKey) -> Option<&PendingEvent> {
        self.pending.get(key)
    }

    /// Earliest known event strictly after `now`.
    pub fn next_event(&self, now: DateTime<Utc>) -> Option<&TideEvent> {
        self.all_events().find(|event| event.timestamp > now)
    }

    /// Whether an event of `kind` lies strictly inside `now ± window`.
    pub fn is_event_within(&self, kind: EventKind, now: DateTime<Utc>, window: Duration) -> bool {
        let from = now - window;
        let to = now + window;
        self.all_events()
            .any(|event| event.kind == kind && from < event.timestamp && event.timestamp < to)
    }
}
