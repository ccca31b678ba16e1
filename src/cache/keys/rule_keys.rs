use std::fmt;

/// 规则计数键
///
/// 每个 (用户, 组织, 规则) 对应一个计数器，键格式需与其他服务保持一致：
/// `user:<user_id>:org:<org_id>:rule:<rule_id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub user_id: String,
    pub org_id: String,
    pub rule_id: String,
}

impl CounterKey {
    pub fn new(user_id: &str, org_id: &str, rule_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            rule_id: rule_id.to_string(),
        }
    }

    /// 按等级拆分的计数器，等级拼接在规则 ID 之后
    pub fn with_tier(&self, tier: &str) -> Self {
        Self {
            rule_id: format!("{}:{}", self.rule_id, tier),
            ..self.clone()
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user:{}:org:{}:rule:{}",
            self.user_id, self.org_id, self.rule_id
        )
    }
}
