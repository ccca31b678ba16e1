/// 缓存数据模型
pub mod counter;

pub use counter::CachedCounter;
