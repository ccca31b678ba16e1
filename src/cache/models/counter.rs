use serde::Serialize;

/// 计数器当前状态
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CachedCounter {
    pub key: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// 距离窗口重置的剩余秒数，计数器不存在时为空
    pub ttl_secs: Option<i64>,
}
