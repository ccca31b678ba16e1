use chrono::Local;

use super::condition::{ConditionData, EndpointSet, ModelSet};
use super::{Decision, QuotaGate, ReasonCode, RequestContext};
use crate::cache::CounterKey;
use crate::error::QuotaError;
use crate::utils::window::{ResetPeriod, expiry_seconds};

const REQUIRED_FIELDS: [&str; 3] = ["user_id", "org_id", "model_used"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Standard,
    Premium,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        }
    }
}

#[derive(Debug, Clone)]
struct TierLimit {
    models: ModelSet,
    limit: i64,
    reset_period: ResetPeriod,
}

#[derive(Debug, Clone)]
enum ModelLimits {
    /// 所有允许的模型共用一个计数器
    Flat(TierLimit),
    /// 标准/高级模型各自计数，计数键带档位后缀
    Tiered {
        standard: Option<TierLimit>,
        premium: Option<TierLimit>,
    },
}

/// 模型访问策略
pub struct ModelAccessPolicy {
    rule_id: String,
    governed: EndpointSet,
    limits: ModelLimits,
    gate: QuotaGate,
}

impl ModelAccessPolicy {
    pub fn from_condition(
        rule_id: &str,
        condition: ConditionData,
        gate: QuotaGate,
    ) -> Result<Self, QuotaError> {
        let standard_models = condition.allowed_standard_models.unwrap_or_default();
        let premium_models = condition.allowed_premium_models.unwrap_or_default();

        let limits = if !standard_models.is_empty() || !premium_models.is_empty() {
            let standard = tier_limit(
                rule_id,
                "standard_models_limit",
                standard_models,
                condition.standard_models_limit,
                condition
                    .standard_limit_time_period
                    .unwrap_or(ResetPeriod::Monthly),
            )?;
            let premium = tier_limit(
                rule_id,
                "premium_models_limit",
                premium_models,
                condition.premium_models_limit,
                condition
                    .premium_limit_time_period
                    .unwrap_or(ResetPeriod::Daily),
            )?;
            ModelLimits::Tiered { standard, premium }
        } else {
            let models = condition
                .allowed_models
                .filter(|models| !models.is_empty())
                .ok_or_else(|| {
                    QuotaError::configuration(format!(
                        "rule '{rule_id}' configures no allowed models"
                    ))
                })?;
            let limit = condition.request_limit.ok_or_else(|| {
                QuotaError::configuration(format!("rule '{rule_id}' is missing request_limit"))
            })?;
            ModelLimits::Flat(TierLimit {
                models,
                limit,
                reset_period: condition.reset_period.unwrap_or(ResetPeriod::Monthly),
            })
        };

        Ok(Self {
            rule_id: rule_id.to_string(),
            governed: condition.condition_endpoints.unwrap_or_default(),
            limits,
            gate,
        })
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub(crate) fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    /// 未限定端点时作用于所有端点，请求也不必携带 endpoint
    pub fn governs(&self, endpoint: Option<&str>) -> bool {
        if self.governed.is_empty() {
            return true;
        }
        endpoint.is_some_and(|endpoint| self.governed.contains(endpoint))
    }

    /// 返回模型所属档位及其限额，不允许的模型返回 `None`
    fn classify(&self, model: &str) -> Option<(Option<ModelTier>, &TierLimit)> {
        match &self.limits {
            ModelLimits::Flat(limit) => limit.models.contains(model).then_some((None, limit)),
            ModelLimits::Tiered { standard, premium } => {
                let standard = standard
                    .as_ref()
                    .filter(|tier| tier.models.contains(model))
                    .map(|tier| (Some(ModelTier::Standard), tier));
                standard.or_else(|| {
                    premium
                        .as_ref()
                        .filter(|tier| tier.models.contains(model))
                        .map(|tier| (Some(ModelTier::Premium), tier))
                })
            }
        }
    }

    fn key_for(&self, context: &RequestContext, tier: Option<ModelTier>) -> CounterKey {
        let key = context.counter_key(&self.rule_id);
        match tier {
            Some(tier) => key.with_tier(tier.as_str()),
            None => key,
        }
    }

    pub(crate) fn counter_keys(
        &self,
        context: &RequestContext,
    ) -> Vec<(Option<ModelTier>, CounterKey)> {
        let tiers = match &self.limits {
            ModelLimits::Flat(_) => vec![None],
            ModelLimits::Tiered { standard, premium } => {
                let mut tiers = Vec::new();
                if standard.is_some() {
                    tiers.push(Some(ModelTier::Standard));
                }
                if premium.is_some() {
                    tiers.push(Some(ModelTier::Premium));
                }
                tiers
            }
        };
        tiers
            .into_iter()
            .map(|tier| (tier, self.key_for(context, tier)))
            .collect()
    }

    pub async fn validate(&self, context: &RequestContext) -> Result<Decision, QuotaError> {
        context.require(&REQUIRED_FIELDS)?;

        if !self.governs(context.field("endpoint")) {
            return Ok(Decision::pass_through());
        }

        let model = context.field("model_used").unwrap_or_default();
        let Some((tier, tier_limit)) = self.classify(model) else {
            tracing::info!("Rule {} does not allow model {}", self.rule_id, model);
            return Ok(Decision::deny(ReasonCode::ModelNotAllowed));
        };

        let key = self.key_for(context, tier);
        let period = tier_limit.reset_period;
        let outcome = self
            .gate
            .check(&key, tier_limit.limit, move || {
                expiry_seconds(period, &Local::now())
            })
            .await?;

        if !outcome.allowed {
            return Ok(Decision::deny(ReasonCode::ModelRequestLimitReached));
        }
        let decision = Decision::counted(&key, outcome.count);
        Ok(match tier {
            Some(tier) => decision.with_meta("tier", tier.as_str()),
            None => decision,
        })
    }
}

fn tier_limit(
    rule_id: &str,
    limit_field: &str,
    models: ModelSet,
    limit: Option<i64>,
    reset_period: ResetPeriod,
) -> Result<Option<TierLimit>, QuotaError> {
    if models.is_empty() {
        return Ok(None);
    }
    let limit = limit.ok_or_else(|| {
        QuotaError::configuration(format!("rule '{rule_id}' is missing {limit_field}"))
    })?;
    Ok(Some(TierLimit {
        models,
        limit,
        reset_period,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::CounterStore;
    use crate::validations::RuleConfig;
    use crate::validations::testing::memory_gate;

    fn policy(
        condition: serde_json::Value,
        gate: QuotaGate,
    ) -> Result<ModelAccessPolicy, QuotaError> {
        let condition = RuleConfig::new("ModelAccessPolicy", "models", condition).condition()?;
        ModelAccessPolicy::from_condition("models", condition, gate)
    }

    fn request(model: &str) -> RequestContext {
        RequestContext::new("u-1", "org-1").with_model(model)
    }

    #[tokio::test]
    async fn tiers_are_counted_separately() {
        let (store, gate) = memory_gate();
        let policy = policy(
            json!({
                "allowed_standard_models": ["gpt-4o"],
                "allowed_premium_models": ["o1-preview"],
                "standard_models_limit": 1,
                "premium_models_limit": 1,
            }),
            gate,
        )
        .unwrap();

        let mut allowed = Vec::new();
        for model in ["gpt-4o", "o1-preview", "gpt-4o"] {
            allowed.push(policy.validate(&request(model)).await.unwrap().allowed);
        }
        assert_eq!(allowed, [true, true, false]);

        assert_eq!(store.read("user:u-1:org:org-1:rule:models:standard").await.unwrap(), 1);
        assert_eq!(store.read("user:u-1:org:org-1:rule:models:premium").await.unwrap(), 1);

        let denied = policy.validate(&request("o1-preview")).await.unwrap();
        assert_eq!(denied.reason_code, ReasonCode::ModelRequestLimitReached);
    }

    #[tokio::test]
    async fn tiered_allow_reports_tier() {
        let (_, gate) = memory_gate();
        let policy = policy(
            json!({
                "allowed_premium_models": "[\"o1-mini\"]",
                "premium_models_limit": "3",
            }),
            gate,
        )
        .unwrap();

        let decision = policy.validate(&request("o1-mini")).await.unwrap();
        assert_eq!(decision.metadata["tier"], json!("premium"));
        assert_eq!(decision.metadata["key"], json!("user:u-1:org:org-1:rule:models:premium"));
    }

    #[tokio::test]
    async fn tier_periods_have_defaults() {
        let (store, gate) = memory_gate();
        let policy = policy(
            json!({
                "allowed_standard_models": ["gpt-4o"],
                "allowed_premium_models": ["o1-preview"],
                "standard_models_limit": 5,
                "premium_models_limit": 5,
                "premium_limit_time_period": "hourly",
            }),
            gate,
        )
        .unwrap();

        policy.validate(&request("o1-preview")).await.unwrap();
        let ttl = store
            .ttl("user:u-1:org:org-1:rule:models:premium")
            .await
            .unwrap()
            .unwrap();
        assert!((1..=3600).contains(&ttl));
    }

    #[tokio::test]
    async fn unknown_model_is_denied_without_counting() {
        let (store, gate) = memory_gate();
        let policy = policy(
            json!({ "allowed_models": ["gpt-4o", "gpt-4o-mini"], "request_limit": 10 }),
            gate,
        )
        .unwrap();

        let decision = policy.validate(&request("llama-3")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason_code, ReasonCode::ModelNotAllowed);
        assert_eq!(store.read("user:u-1:org:org-1:rule:models").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flat_limit_shares_one_counter() {
        let (store, gate) = memory_gate();
        let policy = policy(
            json!({ "allowed_models": ["gpt-4o", "gpt-4o-mini"], "request_limit": 2 }),
            gate,
        )
        .unwrap();

        assert!(policy.validate(&request("gpt-4o")).await.unwrap().allowed);
        assert!(policy.validate(&request("gpt-4o-mini")).await.unwrap().allowed);
        let denied = policy.validate(&request("gpt-4o")).await.unwrap();
        assert_eq!(denied.reason_code, ReasonCode::ModelRequestLimitReached);
        assert_eq!(store.read("user:u-1:org:org-1:rule:models").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scoped_rule_passes_through_other_endpoints() {
        let (store, gate) = memory_gate();
        let policy = policy(
            json!({
                "allowed_models": ["gpt-4o"],
                "request_limit": 1,
                "condition_endpoints": ["/chat"],
            }),
            gate,
        )
        .unwrap();

        let elsewhere = request("gpt-4o").with_endpoint("/embeddings");
        assert_eq!(policy.validate(&elsewhere).await.unwrap(), Decision::pass_through());
        assert_eq!(policy.validate(&request("gpt-4o")).await.unwrap(), Decision::pass_through());

        let chat = request("gpt-4o").with_endpoint("/chat");
        assert!(policy.validate(&chat).await.unwrap().allowed);
        assert!(!policy.validate(&chat).await.unwrap().allowed);
        assert_eq!(store.read("user:u-1:org:org-1:rule:models").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_model_is_a_contract_violation() {
        let (_, gate) = memory_gate();
        let policy = policy(json!({ "allowed_models": ["gpt-4o"], "request_limit": 1 }), gate)
            .unwrap();

        let err = policy
            .validate(&RequestContext::new("u-1", ""))
            .await
            .unwrap_err();
        match err {
            QuotaError::ContractViolation { missing } => {
                assert_eq!(missing, vec!["org_id", "model_used"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn incomplete_configurations_are_rejected() {
        let cases = [
            json!({}),
            json!({ "allowed_models": ["gpt-4o"] }),
            json!({ "request_limit": 3 }),
            json!({ "allowed_premium_models": ["o1-preview"] }),
            json!({
                "allowed_standard_models": ["gpt-4o"],
                "standard_models_limit": 1,
                "allowed_premium_models": ["o1-preview"],
            }),
        ];

        for condition in cases {
            let (_, gate) = memory_gate();
            let result = policy(condition.clone(), gate);
            assert!(
                matches!(result, Err(QuotaError::Configuration(_))),
                "accepted {condition}"
            );
        }
    }

    #[test]
    fn standard_tier_wins_on_overlap() {
        let (_, gate) = memory_gate();
        let policy = policy(
            json!({
                "allowed_standard_models": ["gpt-4o"],
                "allowed_premium_models": ["gpt-4o"],
                "standard_models_limit": 1,
                "premium_models_limit": 1,
            }),
            gate,
        )
        .unwrap();

        assert!(matches!(policy.limits, ModelLimits::Tiered { .. }));
        let (tier, _) = policy.classify("gpt-4o").unwrap();
        assert_eq!(tier, Some(ModelTier::Standard));
    }
}
