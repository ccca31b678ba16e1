/// 缓存键模块
/// 提供计数器键类型

// 规则计数键模块
pub mod rule_keys;

// 重新导出计数键
pub use rule_keys::CounterKey;
