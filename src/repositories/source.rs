//! Realtime key-value store boundary: typed paths and snapshot subscriptions.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppResult;

/// Value delivered by a subscription. `None` means the path holds no data.
pub type Snapshot = Option<Value>;

/// The two record families the store exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Presence,
    Typing,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Presence => "presence",
            Family::Typing => "typing",
        }
    }
}

/// A watched location: either a family root (`presence`) holding
/// `{uid: record}` or a single user's record (`presence/{uid}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatePath {
    Root(Family),
    User(Family, String),
}

impl StatePath {
    pub fn root(family: Family) -> Self {
        StatePath::Root(family)
    }

    pub fn user(family: Family, uid: impl Into<String>) -> Self {
        StatePath::User(family, uid.into())
    }

    pub fn family(&self) -> Family {
        match self {
            StatePath::Root(family) | StatePath::User(family, _) => *family,
        }
    }
}

impl std::fmt::Display for StatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatePath::Root(family) => write!(f, "{}", family.as_str()),
            StatePath::User(family, uid) => write!(f, "{}/{}", family.as_str(), uid),
        }
    }
}

/// Live subscription to one path. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { rx, task: None }
    }

    /// Attach the background task feeding this subscription; it is aborted on drop.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next snapshot, or `None` once the source closed the subscription.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Realtime key-value pub/sub store.
///
/// A successful subscribe delivers the current value first, then every change.
/// Access policy may deny aggregate roots while allowing single-user paths;
/// that surfaces as `AppError::SubscriptionDenied`.
#[async_trait]
pub trait RemoteStateSource: Send + Sync + 'static {
    async fn subscribe(&self, path: &StatePath) -> AppResult<Subscription>;
}
