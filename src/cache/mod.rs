//! Key/value cache access over redis.

pub mod connection;
pub mod manager;

pub use connection::{CacheConnectionManager, CacheOperation};
pub use manager::CacheManager;
