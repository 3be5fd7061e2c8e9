//! Redis-backed realtime store: one JSON key per user record, change
//! notifications on a pub/sub channel named after the key.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::source::{Family, RemoteStateSource, Snapshot, StatePath, Subscription};
use crate::error::AppError;

/// Map a Redis failure on `path` to an application error, recognising ACL denials.
fn map_redis_err(err: redis::RedisError, path: &StatePath) -> AppError {
    let denied = matches!(err.code(), Some("NOPERM") | Some("NOAUTH"))
        || err.kind() == redis::ErrorKind::AuthenticationFailed;
    if denied {
        AppError::SubscriptionDenied(path.to_string())
    } else {
        AppError::Redis(err)
    }
}

/// Decode a stored or published payload. Empty means the record was removed;
/// unparsable text is kept as `null` so it classifies as stale.
fn decode_payload(raw: &str) -> Snapshot {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "malformed record payload");
            Some(Value::Null)
        }
    }
}

/// Redis-backed [`RemoteStateSource`].
#[derive(Clone)]
pub struct RedisSource {
    client: Arc<redis::Client>,
    key_prefix: String,
}

impl RedisSource {
    /// Create source from Redis URL. Every key and channel is namespaced by `key_prefix`.
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Get a multiplexed connection for reads.
    pub async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    fn family_prefix(&self, family: Family) -> String {
        format!("{}{}:", self.key_prefix, family.as_str())
    }

    /// Redis key (and channel) for one user's record.
    pub fn key_for(&self, family: Family, uid: &str) -> String {
        format!("{}{}", self.family_prefix(family), uid)
    }

    /// Read every record of a family into `{uid: record}`.
    async fn load_family(&self, family: Family) -> Result<Map<String, Value>, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let prefix = self.family_prefix(family);
        let pattern = format!("{}*", prefix);

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut records = Map::new();
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            if let (Some(uid), Some(raw)) = (key.strip_prefix(&prefix), raw) {
                if let Some(value) = decode_payload(&raw) {
                    records.insert(uid.to_string(), value);
                }
            }
        }
        Ok(records)
    }

    /// Root subscription: pattern-subscribe to the family, load the initial
    /// map, then maintain it incrementally and emit the whole root per change.
    async fn subscribe_root(&self, family: Family) -> Result<Subscription, AppError> {
        let path = StatePath::root(family);
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| map_redis_err(e, &path))?;
        let mut pubsub = conn.into_pubsub();
        let prefix = self.family_prefix(family);
        pubsub
            .psubscribe(format!("{}*", prefix))
            .await
            .map_err(|e| map_redis_err(e, &path))?;
        let initial = self
            .load_family(family)
            .await
            .map_err(|e| map_redis_err(e, &path))?;
        info!(path = %path, records = initial.len(), "subscribed to redis root");

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Some(Value::Object(initial.clone())));

        let task_path = path.clone();
        let task = tokio::spawn(async move {
            let mut records = initial;
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let Some(uid) = msg.get_channel_name().strip_prefix(&prefix) else {
                    continue;
                };
                let uid = uid.to_string();
                let payload: String = msg.get_payload().unwrap_or_default();
                match decode_payload(&payload) {
                    Some(value) => {
                        records.insert(uid, value);
                    }
                    None => {
                        records.remove(&uid);
                    }
                }
                if tx.send(Some(Value::Object(records.clone()))).is_err() {
                    break;
                }
            }
            debug!(path = %task_path, "redis root stream ended");
        });

        Ok(Subscription::new(rx).with_task(task))
    }

    /// Per-user subscription: subscribe to the record's channel, then read its current value.
    async fn subscribe_user(&self, family: Family, uid: &str) -> Result<Subscription, AppError> {
        let path = StatePath::user(family, uid);
        let key = self.key_for(family, uid);

        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| map_redis_err(e, &path))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(&key)
            .await
            .map_err(|e| map_redis_err(e, &path))?;

        let mut reader = self.connection().await?;
        let current: Option<String> = reader
            .get(&key)
            .await
            .map_err(|e| map_redis_err(e, &path))?;
        debug!(path = %path, "subscribed to redis record");

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(current.as_deref().and_then(decode_payload));

        let task = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = msg.get_payload().unwrap_or_default();
                if tx.send(decode_payload(&payload)).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx).with_task(task))
    }
}

#[async_trait]
impl RemoteStateSource for RedisSource {
    async fn subscribe(&self, path: &StatePath) -> Result<Subscription, AppError> {
        match path {
            StatePath::Root(family) => self.subscribe_root(*family).await,
            StatePath::User(family, uid) => self.subscribe_user(*family, uid).await,
        }
    }
}
