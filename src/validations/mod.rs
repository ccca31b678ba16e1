//! 规则校验
//!
//! 规则配置经 [`PolicyResolver`] 解析为具体的 [`Policy`]，策略在计数闸门之上
//! 叠加各自的资格检查（端点限制、模型白名单、标准/高级分档）。

pub mod condition;
pub mod feature;
pub mod gate;
pub mod model;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{CachedCounter, CounterKey};
use crate::error::QuotaError;

pub use condition::{ConditionData, RuleConfig};
pub use feature::FeatureAccessPolicy;
pub use gate::{GateOutcome, GateStrategy, QuotaGate};
pub use model::{ModelAccessPolicy, ModelTier};
pub use resolver::{PolicyConstructor, PolicyResolver};

/// 单次请求的上下文，每次调用都重新传入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub endpoint: Option<String>,
    pub model_used: Option<String>,
}

impl RequestContext {
    pub fn new(user_id: &str, org_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            org_id: Some(org_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model_used = Some(model.to_string());
        self
    }

    /// 空字符串与缺失同样处理
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "user_id" => self.user_id.as_deref(),
            "org_id" => self.org_id.as_deref(),
            "endpoint" => self.endpoint.as_deref(),
            "model_used" => self.model_used.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn require(&self, fields: &[&'static str]) -> Result<(), QuotaError> {
        let missing: Vec<&'static str> = fields
            .iter()
            .copied()
            .filter(|name| self.field(name).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QuotaError::ContractViolation { missing })
        }
    }

    pub(crate) fn counter_key(&self, rule_id: &str) -> CounterKey {
        CounterKey::new(
            self.field("user_id").unwrap_or_default(),
            self.field("org_id").unwrap_or_default(),
            rule_id,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Success,
    FeatureRequestLimitReached,
    FeatureRestricted,
    FeatureNotAllowed,
    ModelRequestLimitReached,
    ModelNotAllowed,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Success => "SUCCESS",
            ReasonCode::FeatureRequestLimitReached => "FEATURE_REQUEST_LIMIT_REACHED",
            ReasonCode::FeatureRestricted => "FEATURE_RESTRICTED",
            ReasonCode::FeatureNotAllowed => "FEATURE_NOT_ALLOWED",
            ReasonCode::ModelRequestLimitReached => "MODEL_REQUEST_LIMIT_REACHED",
            ReasonCode::ModelNotAllowed => "MODEL_NOT_ALLOWED",
        }
    }
}

/// 校验结果，拒绝也是正常结果而不是错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub metadata: Map<String, Value>,
    pub reason_code: ReasonCode,
}

impl Decision {
    /// 规则不适用于该请求
    pub fn pass_through() -> Self {
        Self {
            allowed: true,
            metadata: Map::new(),
            reason_code: ReasonCode::Success,
        }
    }

    pub fn deny(reason_code: ReasonCode) -> Self {
        Self {
            allowed: false,
            metadata: Map::new(),
            reason_code,
        }
    }

    pub(crate) fn counted(key: &CounterKey, count: i64) -> Self {
        let mut metadata = Map::new();
        metadata.insert("key".into(), Value::from(key.to_string()));
        metadata.insert("count".into(), Value::from(count));
        Self {
            allowed: true,
            metadata,
            reason_code: ReasonCode::Success,
        }
    }

    pub(crate) fn with_meta(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }
}

/// 解析后的规则策略
pub enum Policy {
    Feature(FeatureAccessPolicy),
    Model(ModelAccessPolicy),
}

impl Policy {
    pub fn rule_id(&self) -> &str {
        match self {
            Policy::Feature(policy) => policy.rule_id(),
            Policy::Model(policy) => policy.rule_id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Policy::Feature(_) => "feature",
            Policy::Model(_) => "model",
        }
    }

    pub async fn validate(&self, context: &RequestContext) -> Result<Decision, QuotaError> {
        match self {
            Policy::Feature(policy) => policy.validate(context).await,
            Policy::Model(policy) => policy.validate(context).await,
        }
    }

    /// 该策略拥有的全部计数器（分档策略每档一个）的当前用量
    pub async fn usage(&self, context: &RequestContext) -> Result<Vec<CachedCounter>, QuotaError> {
        context.require(&["user_id", "org_id"])?;
        let mut counters = Vec::new();
        for (tier, key) in self.counter_keys(context) {
            counters.push(self.gate().usage(&key, tier.map(|t| t.as_str())).await?);
        }
        Ok(counters)
    }

    /// 管理操作：删除该用户在此规则下的全部计数器
    pub async fn reset(&self, context: &RequestContext) -> Result<Vec<String>, QuotaError> {
        context.require(&["user_id", "org_id"])?;
        let mut removed = Vec::new();
        for (_, key) in self.counter_keys(context) {
            removed.push(self.gate().reset(&key).await?);
        }
        Ok(removed)
    }

    fn gate(&self) -> &QuotaGate {
        match self {
            Policy::Feature(policy) => policy.gate(),
            Policy::Model(policy) => policy.gate(),
        }
    }

    fn counter_keys(&self, context: &RequestContext) -> Vec<(Option<ModelTier>, CounterKey)> {
        match self {
            Policy::Feature(policy) => vec![(None, context.counter_key(policy.rule_id()))],
            Policy::Model(policy) => policy.counter_keys(context),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use redis::{ErrorKind, RedisError, RedisResult};

    use super::{GateStrategy, QuotaGate};
    use crate::cache::{CounterStore, MemoryCounterStore};

    /// 所有操作都返回连接错误的存储
    pub struct UnavailableStore;

    fn refused<T>() -> RedisResult<T> {
        Err(RedisError::from((ErrorKind::IoError, "connection refused")))
    }

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn increment(&self, _key: &str, _expiry_secs: i64) -> RedisResult<i64> {
            refused()
        }

        async fn read(&self, _key: &str) -> RedisResult<i64> {
            refused()
        }

        async fn increment_within(
            &self,
            _key: &str,
            _limit: i64,
            _expiry_secs: i64,
        ) -> RedisResult<(bool, i64)> {
            refused()
        }

        async fn ttl(&self, _key: &str) -> RedisResult<Option<i64>> {
            refused()
        }

        async fn delete(&self, _key: &str) -> RedisResult<()> {
            refused()
        }

        fn backend(&self) -> &'static str {
            "unavailable"
        }
    }

    pub fn memory_gate() -> (Arc<MemoryCounterStore>, QuotaGate) {
        let store = Arc::new(MemoryCounterStore::new());
        (store.clone(), QuotaGate::new(store, GateStrategy::Loose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_count_as_missing() {
        let context = RequestContext {
            user_id: Some(String::new()),
            org_id: Some("org-1".into()),
            endpoint: None,
            model_used: Some("gpt-4o".into()),
        };

        match context.require(&["user_id", "org_id", "endpoint"]) {
            Err(QuotaError::ContractViolation { missing }) => {
                assert_eq!(missing, vec!["user_id", "endpoint"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn reason_codes_serialize_as_constants() {
        for code in [
            ReasonCode::Success,
            ReasonCode::FeatureRequestLimitReached,
            ReasonCode::FeatureRestricted,
            ReasonCode::FeatureNotAllowed,
            ReasonCode::ModelRequestLimitReached,
            ReasonCode::ModelNotAllowed,
        ] {
            assert_eq!(
                serde_json::to_value(code).unwrap(),
                Value::from(code.as_str())
            );
        }
    }

    #[test]
    fn pass_through_carries_no_metadata() {
        let decision = Decision::pass_through();
        assert!(decision.allowed);
        assert!(decision.metadata.is_empty());
        assert_eq!(decision.reason_code, ReasonCode::Success);
    }
}
