/// 缓存操作
/// 提供计数存储的实现

// 计数存储接口及 Redis 实现
pub mod counter;

// 进程内计数存储
pub mod memory;

// 重新导出常用操作
pub use counter::{CounterStore, RedisCounterStore};
pub use memory::MemoryCounterStore;
