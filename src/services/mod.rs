//! Presence and typing aggregation, fallback watches, decay and queries.

pub mod clock;
pub mod decay;
pub mod engine;
pub mod fallback;
pub mod presence;
pub mod query;
pub mod state;
pub mod typing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decay::DecayTimer;
pub use engine::PresenceEngine;
pub use fallback::{FallbackWatcher, WatchGuard};
pub use presence::PresenceAggregator;
pub use query::PresenceQuery;
pub use state::SharedState;
pub use typing::TypingAggregator;
