//! Observer bus
//!
//! Topic-based fan-out of result codes and payloads. The orchestrator and
//! the store publish; the CLI (or any other front end) subscribes.
//!
//! The bus is an ordinary value shared through `Arc`. Observers are called
//! synchronously on the publishing thread, outside the registry lock, so an
//! observer may register or unregister others while being notified.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use notesync_core::observer::{Notification, ObserverBus, Payload, ResultCode, Topic};
//!
//! let bus = ObserverBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! bus.register(&[Topic::Sync], "counter", move |_: &Notification| -> anyhow::Result<()> {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! bus.notify(Topic::Sync, ResultCode::SyncStart, Payload::None);
//! bus.notify(Topic::Entry, ResultCode::EntryAdded, Payload::None);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ledger::SyncRecord;
use crate::models::{ContentField, EntryContent};
use crate::sync::CycleReport;

/// Notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    Common,
    FileExport,
    FileImport,
    ColorPicker,
    Entry,
    EntriesMock,
    ListFilter,
    Sync,
    Users,
    Conflict,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::Common,
        Topic::FileExport,
        Topic::FileImport,
        Topic::ColorPicker,
        Topic::Entry,
        Topic::EntriesMock,
        Topic::ListFilter,
        Topic::Sync,
        Topic::Users,
        Topic::Conflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Common => "COMMON",
            Topic::FileExport => "FILE_EXPORT",
            Topic::FileImport => "FILE_IMPORT",
            Topic::ColorPicker => "COLOR_PICKER",
            Topic::Entry => "ENTRY",
            Topic::EntriesMock => "ENTRIES_MOCK",
            Topic::ListFilter => "LIST_FILTER",
            Topic::Sync => "SYNC",
            Topic::Users => "USERS",
            Topic::Conflict => "CONFLICT",
        }
    }

    /// Parse a topic name as printed by [`Topic::as_str`]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result codes, grouped by hundreds per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ResultCode {
    // 0xx: common
    StorageFailure = 1,

    // 1xx: file export/import
    ExportSucceeded = 100,
    ExportFailed = 101,
    ImportSucceeded = 110,
    ImportFailed = 111,

    // 2xx: color picker
    ColorSelected = 200,
    ColorRejected = 201,

    // 3xx: entry lifecycle
    EntryAdded = 300,
    EntryUpdated = 301,
    EntryDeleted = 302,
    EntryViewed = 303,
    EntryMoved = 304,

    // 4xx: mock entries
    MockGenerated = 400,
    MockCleared = 401,

    // 5xx: list filter
    FilterApplied = 500,
    FilterRejected = 501,

    // 6xx: sync phases
    SyncPendingStart = 600,
    SyncStart = 601,
    SyncSuccess = 602,
    SyncFailed = 603,

    // 7xx: users
    UserChanged = 700,

    // 8xx: conflicts
    ConflictDetected = 800,
    ConflictResolved = 801,
}

impl ResultCode {
    /// Numeric value of the code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Topic the code belongs to by default
    pub fn topic(self) -> Topic {
        match self.code() / 100 {
            1 if self.code() < 110 => Topic::FileExport,
            1 => Topic::FileImport,
            2 => Topic::ColorPicker,
            3 => Topic::Entry,
            4 => Topic::EntriesMock,
            5 => Topic::ListFilter,
            6 => Topic::Sync,
            7 => Topic::Users,
            8 => Topic::Conflict,
            _ => Topic::Common,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Data carried by a notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    None,
    Message {
        text: String,
    },
    Entry {
        id: Uuid,
    },
    Count {
        amount: usize,
    },
    Color {
        id: Uuid,
        color: String,
    },
    User {
        user_id: Option<String>,
    },
    Conflict {
        entry_id: Uuid,
        local: EntryContent,
        remote: EntryContent,
        fields: Vec<ContentField>,
    },
    Record(SyncRecord),
    Report(CycleReport),
}

impl Payload {
    pub fn message(text: impl Into<String>) -> Self {
        Payload::Message { text: text.into() }
    }
}

/// One delivered notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub topic: Topic,
    pub code: ResultCode,
    pub payload: Payload,
}

/// Receives notifications for the topics it was registered on
pub trait Observer: Send + Sync {
    fn on_notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

impl<F> Observer for F
where
    F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync,
{
    fn on_notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self(notification)
    }
}

type Registry = HashMap<Topic, HashMap<String, Arc<dyn Observer>>>;

/// Topic to named-observer registry
pub struct ObserverBus {
    registry: RwLock<Registry>,
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverBus {
    /// Create a bus with the `COMMON` topic in place
    pub fn new() -> Self {
        let mut registry = Registry::new();
        registry.insert(Topic::Common, HashMap::new());
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Register `observer` under `name` on each topic, replacing an earlier
    /// registration with the same name
    pub fn register<O>(&self, topics: &[Topic], name: &str, observer: O)
    where
        O: Observer + 'static,
    {
        self.register_arc(topics, name, Arc::new(observer));
    }

    /// Register an already shared observer
    pub fn register_arc(&self, topics: &[Topic], name: &str, observer: Arc<dyn Observer>) {
        let mut registry = self.write();
        for topic in topics {
            registry
                .entry(*topic)
                .or_default()
                .insert(name.to_string(), observer.clone());
        }
        debug!(name, topics = ?topics, "Registered observer");
    }

    /// Remove `name` from each topic; absent registrations are ignored
    pub fn unregister(&self, topics: &[Topic], name: &str) {
        let mut registry = self.write();
        for topic in topics {
            if let Some(observers) = registry.get_mut(topic) {
                observers.remove(name);
            }
        }
    }

    /// Deliver to every observer of `topic`
    ///
    /// Returns the number of observers that accepted the notification.
    pub fn notify(&self, topic: Topic, code: ResultCode, payload: Payload) -> usize {
        let observers: Vec<(String, Arc<dyn Observer>)> = {
            let registry = self.read();
            registry
                .get(&topic)
                .map(|observers| {
                    observers
                        .iter()
                        .map(|(name, o)| (name.clone(), o.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let notification = Notification {
            topic,
            code,
            payload,
        };
        deliver(&observers, &notification)
    }

    /// Deliver to every observer of every topic
    ///
    /// An observer registered on several topics is called once per topic.
    pub fn notify_all(&self, code: ResultCode, payload: Payload) -> usize {
        let topics: Vec<Topic> = self.read().keys().copied().collect();
        topics
            .into_iter()
            .map(|topic| self.notify(topic, code, payload.clone()))
            .sum()
    }

    /// Whether `name` is registered on `topic`
    pub fn is_registered(&self, topic: Topic, name: &str) -> bool {
        self.read()
            .get(&topic)
            .is_some_and(|observers| observers.contains_key(name))
    }

    /// Number of observers on `topic`
    pub fn observer_count(&self, topic: Topic) -> usize {
        self.read().get(&topic).map_or(0, HashMap::len)
    }

    // A panicking observer runs outside the lock, so poisoning can only come
    // from a panic inside this module; the map is still consistent then.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn deliver(observers: &[(String, Arc<dyn Observer>)], notification: &Notification) -> usize {
    let mut delivered = 0;
    for (name, observer) in observers {
        let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_notify(notification)));
        match result {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => {
                warn!(
                    observer = %name,
                    topic = %notification.topic,
                    code = %notification.code,
                    "Observer failed: {:#}",
                    e
                );
            }
            Err(_) => {
                error!(
                    observer = %name,
                    topic = %notification.topic,
                    code = %notification.code,
                    "Observer panicked"
                );
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Notification>>>, impl Observer + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = move |n: &Notification| -> anyhow::Result<()> {
            sink.lock().unwrap().push(n.clone());
            Ok(())
        };
        (seen, observer)
    }

    #[test]
    fn test_common_topic_exists() {
        let bus = ObserverBus::new();
        assert_eq!(bus.observer_count(Topic::Common), 0);
        assert!(bus.read().contains_key(&Topic::Common));
    }

    #[test]
    fn test_delivers_once_to_registered_topic() {
        let bus = ObserverBus::new();
        let (seen, observer) = recorder();
        bus.register(&[Topic::Sync], "ui", observer);

        let delivered = bus.notify(Topic::Sync, ResultCode::SyncStart, Payload::None);
        assert_eq!(delivered, 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, Topic::Sync);
        assert_eq!(seen[0].code, ResultCode::SyncStart);
    }

    #[test]
    fn test_other_topic_not_delivered() {
        let bus = ObserverBus::new();
        let (seen, observer) = recorder();
        bus.register(&[Topic::Sync], "ui", observer);

        bus.notify(Topic::Entry, ResultCode::EntryAdded, Payload::None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let bus = ObserverBus::new();
        let (seen, observer) = recorder();
        bus.register(&[Topic::Sync, Topic::Entry], "ui", observer);
        bus.unregister(&[Topic::Sync], "ui");

        bus.notify(Topic::Sync, ResultCode::SyncSuccess, Payload::None);
        assert!(seen.lock().unwrap().is_empty());
        assert!(bus.is_registered(Topic::Entry, "ui"));

        // Unregistering twice is a no-op
        bus.unregister(&[Topic::Sync, Topic::Users], "ui");
    }

    #[test]
    fn test_register_is_idempotent_per_name() {
        let bus = ObserverBus::new();
        let (first, observer) = recorder();
        bus.register(&[Topic::Conflict], "dialog", observer);
        let (second, observer) = recorder();
        bus.register(&[Topic::Conflict], "dialog", observer);

        assert_eq!(bus.observer_count(Topic::Conflict), 1);
        bus.notify(Topic::Conflict, ResultCode::ConflictDetected, Payload::None);
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let bus = ObserverBus::new();
        bus.register(&[Topic::Sync], "broken", |_: &Notification| -> anyhow::Result<()> {
            anyhow::bail!("observer is broken")
        });
        bus.register(&[Topic::Sync], "panicky", |_: &Notification| -> anyhow::Result<()> {
            panic!("observer exploded")
        });
        let (seen, observer) = recorder();
        bus.register(&[Topic::Sync], "healthy", observer);

        let delivered = bus.notify(Topic::Sync, ResultCode::SyncFailed, Payload::None);
        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);

        // The bus stays usable after a panic
        bus.notify(Topic::Sync, ResultCode::SyncFailed, Payload::None);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_notify_all_reaches_every_topic() {
        let bus = ObserverBus::new();
        let (seen, observer) = recorder();
        let observer: Arc<dyn Observer> = Arc::new(observer);
        bus.register_arc(&[Topic::Common], "a", observer.clone());
        bus.register_arc(&[Topic::Users], "b", observer);

        let delivered = bus.notify_all(ResultCode::StorageFailure, Payload::message("disk"));
        assert_eq!(delivered, 2);

        let mut topics: Vec<Topic> = seen.lock().unwrap().iter().map(|n| n.topic).collect();
        topics.sort_by_key(|t| t.as_str());
        assert_eq!(topics, vec![Topic::Common, Topic::Users]);
    }

    #[test]
    fn test_observer_may_unregister_itself() {
        let bus = Arc::new(ObserverBus::new());
        let handle = bus.clone();
        bus.register(&[Topic::Entry], "once", move |_: &Notification| -> anyhow::Result<()> {
            handle.unregister(&[Topic::Entry], "once");
            Ok(())
        });

        assert_eq!(bus.notify(Topic::Entry, ResultCode::EntryAdded, Payload::None), 1);
        assert_eq!(bus.notify(Topic::Entry, ResultCode::EntryAdded, Payload::None), 0);
    }

    #[test]
    fn test_result_code_grouping() {
        assert_eq!(ResultCode::SyncPendingStart.code(), 600);
        assert_eq!(ResultCode::SyncPendingStart.topic(), Topic::Sync);
        assert_eq!(ResultCode::ExportFailed.topic(), Topic::FileExport);
        assert_eq!(ResultCode::ImportSucceeded.topic(), Topic::FileImport);
        assert_eq!(ResultCode::ColorRejected.topic(), Topic::ColorPicker);
        assert_eq!(ResultCode::StorageFailure.topic(), Topic::Common);
        assert_eq!(ResultCode::ConflictDetected.topic(), Topic::Conflict);
    }

    #[test]
    fn test_topic_parse() {
        assert_eq!(Topic::parse("sync"), Some(Topic::Sync));
        assert_eq!(Topic::parse("ENTRIES_MOCK"), Some(Topic::EntriesMock));
        assert_eq!(Topic::parse("nope"), None);
    }
}
