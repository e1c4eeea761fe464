//! Redis-backed [`StateStore`](refundry_state::StateStore) and
//! [`DistributedLock`](refundry_state::DistributedLock) backends.
//!
//! Uses a `deadpool-redis` pool and Lua scripts for the operations that must
//! be atomic (check-and-set, compare-and-swap, lock acquire/extend/release).
//! The deadline index is a sorted set scored by Unix-millisecond deadlines.

mod config;
mod key_render;
mod lock;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use lock::{RedisDistributedLock, RedisLockGuard};
pub use store::RedisStateStore;
