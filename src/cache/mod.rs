// 缓存模块
// 包含计数键、计数模型和计数存储

pub mod keys;
pub mod models;
pub mod operations;

// 重新导出常用类型，方便其他模块使用
pub use keys::CounterKey;
pub use models::CachedCounter;
pub use operations::{CounterStore, MemoryCounterStore, RedisCounterStore};
