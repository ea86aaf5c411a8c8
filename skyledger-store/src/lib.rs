pub mod app_config;
pub mod database;
pub mod events;
pub mod redis_repo;

pub use app_config::Config;
pub use database::{DbClient, MemoryStore, SnapshotStore, StoreError};
pub use events::EventProducer;
pub use redis_repo::RedisClient;
