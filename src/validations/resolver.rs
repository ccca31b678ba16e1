use std::collections::HashMap;
use std::sync::Arc;

use super::condition::{ConditionData, set_of};
use super::{
    FeatureAccessPolicy, GateStrategy, ModelAccessPolicy, Policy, QuotaGate, RuleConfig,
};
use crate::cache::CounterStore;
use crate::error::QuotaError;
use crate::utils::window::ResetPeriod;

/// 由规则 ID、条件数据和计数闸门构造策略，构造过程不做 I/O
pub type PolicyConstructor = fn(&str, ConditionData, QuotaGate) -> Result<Policy, QuotaError>;

const STANDARD_MODELS: [&str; 2] = ["gpt-4o", "gpt-4o-mini"];
const PREMIUM_MODELS: [&str; 4] = ["o1-preview", "o1-mini", "Claude 3.5 Sonnet", "3 Opus"];

/// 策略解析器
///
/// 注册表在启动时一次性建好，之后只读；每次解析都构造新的策略实例。
pub struct PolicyResolver {
    gate: QuotaGate,
    registry: HashMap<&'static str, PolicyConstructor>,
}

impl PolicyResolver {
    /// 注册全部内置策略
    pub fn new(store: Arc<dyn CounterStore>, strategy: GateStrategy) -> Self {
        Self::empty(store, strategy)
            .register("FeatureAccessPolicy", feature_access)
            .register("ModelAccessPolicy", model_access)
            .register("FreePlanRestrictedEndpoints", feature_access)
            .register("FreePlanModelValidation", free_plan_models)
            .register("PremiumPlanModelValidation", premium_plan_models)
    }

    pub fn empty(store: Arc<dyn CounterStore>, strategy: GateStrategy) -> Self {
        Self {
            gate: QuotaGate::new(store, strategy),
            registry: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        policy_class_id: &'static str,
        constructor: PolicyConstructor,
    ) -> Self {
        self.registry.insert(policy_class_id, constructor);
        self
    }

    pub fn policy_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.registry.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    pub fn resolve(&self, config: &RuleConfig) -> Result<Policy, QuotaError> {
        let Some(constructor) = self.registry.get(config.policy_class_id.as_str()) else {
            tracing::warn!(
                "Unknown policy class {} for rule {}",
                config.policy_class_id,
                config.rule_id
            );
            return Err(QuotaError::configuration(format!(
                "policy class '{}' is not recognized",
                config.policy_class_id
            )));
        };

        if config.rule_id.trim().is_empty() {
            return Err(QuotaError::configuration(format!(
                "rule for policy class '{}' has no rule_id",
                config.policy_class_id
            )));
        }

        let condition = config.condition()?;
        let policy = constructor(&config.rule_id, condition, self.gate.clone())?;
        tracing::debug!(
            "Resolved rule {} to {} policy {}",
            config.rule_id,
            policy.kind(),
            config.policy_class_id
        );
        Ok(policy)
    }
}

fn feature_access(
    rule_id: &str,
    condition: ConditionData,
    gate: QuotaGate,
) -> Result<Policy, QuotaError> {
    FeatureAccessPolicy::from_condition(rule_id, condition, gate).map(Policy::Feature)
}

fn model_access(
    rule_id: &str,
    condition: ConditionData,
    gate: QuotaGate,
) -> Result<Policy, QuotaError> {
    ModelAccessPolicy::from_condition(rule_id, condition, gate).map(Policy::Model)
}

// 免费套餐：标准模型每月 200 次
fn free_plan_models(
    rule_id: &str,
    condition: ConditionData,
    gate: QuotaGate,
) -> Result<Policy, QuotaError> {
    let defaults = ConditionData {
        allowed_models: Some(set_of(&STANDARD_MODELS)),
        request_limit: Some(200),
        reset_period: Some(ResetPeriod::Monthly),
        ..Default::default()
    };
    model_access(rule_id, condition.or(defaults), gate)
}

// 高级套餐：标准模型每月 500 次，高级模型每天 10 次
fn premium_plan_models(
    rule_id: &str,
    condition: ConditionData,
    gate: QuotaGate,
) -> Result<Policy, QuotaError> {
    let defaults = ConditionData {
        allowed_standard_models: Some(set_of(&STANDARD_MODELS)),
        allowed_premium_models: Some(set_of(&PREMIUM_MODELS)),
        standard_models_limit: Some(500),
        premium_models_limit: Some(10),
        standard_limit_time_period: Some(ResetPeriod::Monthly),
        premium_limit_time_period: Some(ResetPeriod::Daily),
        ..Default::default()
    };
    model_access(rule_id, condition.or(defaults), gate)
}
