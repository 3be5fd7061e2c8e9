//! Realtime store implementations behind [`RemoteStateSource`].

pub mod memory;
pub mod redis_repo;
pub mod source;

pub use memory::MemorySource;
pub use redis_repo::RedisSource;
pub use source::{Family, RemoteStateSource, Snapshot, StatePath, Subscription};
