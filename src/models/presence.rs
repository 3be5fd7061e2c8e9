//! Presence classification: raw online/lastSeen data to online, away or offline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tri-state presence as observed by other clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Away,
    #[default]
    Offline,
}

impl PresenceState {
    /// Classify from the online flag and the age of the last heartbeat.
    ///
    /// An online user goes away once the heartbeat is older than the threshold.
    /// An offline user stays away for a grace period of one threshold after
    /// their last heartbeat, then goes offline.
    pub fn derive(online: bool, last_seen: i64, now: i64, away_after_seconds: u64) -> Self {
        let age = now.saturating_sub(last_seen);
        let threshold = i64::try_from(away_after_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        match (online, age) {
            (true, age) if age <= threshold => Self::Online,
            (true, _) => Self::Away,
            (false, age) if age < threshold => Self::Away,
            (false, _) => Self::Offline,
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Writer-side record as stored under `presence/{uid}`, after coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawPresence {
    pub online: bool,
    /// Milliseconds since the Unix epoch.
    pub last_seen: i64,
}

impl RawPresence {
    /// Lenient read of `{online, lastSeen}`. Missing or mistyped fields become
    /// `false` / `0`, which classifies as maximally stale.
    pub fn from_value(value: &Value) -> Self {
        let online = value.get("online").and_then(Value::as_bool).unwrap_or(false);
        let last_seen = value
            .get("lastSeen")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0);
        Self { online, last_seen }
    }
}

/// One entry of the presence map: raw data plus its derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub uid: String,
    pub last_seen: i64,
    pub online: bool,
    pub state: PresenceState,
}

impl PresenceRecord {
    pub fn derive(uid: impl Into<String>, raw: RawPresence, now: i64, away_after_seconds: u64) -> Self {
        Self {
            uid: uid.into(),
            last_seen: raw.last_seen,
            online: raw.online,
            state: PresenceState::derive(raw.online, raw.last_seen, now, away_after_seconds),
        }
    }

    /// Same record re-classified at `now`.
    pub fn rederive(&self, now: i64, away_after_seconds: u64) -> Self {
        Self {
            state: PresenceState::derive(self.online, self.last_seen, now, away_after_seconds),
            ..self.clone()
        }
    }
}

/// Presence as handed to consumers. Always an owned copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub state: PresenceState,
    pub last_seen: i64,
    pub online: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub typing: bool,
}

impl Presence {
    /// Zero value: offline, never seen.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Synthesized record for the session's own user before their write round-trips.
    pub fn online_at(now: i64) -> Self {
        Self {
            state: PresenceState::Online,
            last_seen: now,
            online: true,
            typing: false,
        }
    }
}

impl From<&PresenceRecord> for Presence {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            state: record.state,
            last_seen: record.last_seen,
            online: record.online,
            typing: false,
        }
    }
}

/// Fold the typing signal into a base presence. Typing implies online,
/// whatever the raw flag says.
pub fn derive_presence(base: Presence, typing: bool) -> Presence {
    if typing {
        Presence {
            state: PresenceState::Online,
            typing: true,
            ..base
        }
    } else {
        Presence { typing: false, ..base }
    }
}
