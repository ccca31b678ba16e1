use chrono::Local;

use super::condition::{ConditionData, EndpointSet};
use super::{Decision, QuotaGate, ReasonCode, RequestContext};
use crate::error::QuotaError;
use crate::utils::window::{ResetPeriod, expiry_seconds};

const REQUIRED_FIELDS: [&str; 3] = ["user_id", "org_id", "endpoint"];

/// 功能访问策略：按端点计数，并支持端点白名单/黑名单
pub struct FeatureAccessPolicy {
    rule_id: String,
    limit: i64,
    reset_period: ResetPeriod,
    governed: EndpointSet,
    allowed: EndpointSet,
    restricted: EndpointSet,
    gate: QuotaGate,
}

impl FeatureAccessPolicy {
    pub fn from_condition(
        rule_id: &str,
        condition: ConditionData,
        gate: QuotaGate,
    ) -> Result<Self, QuotaError> {
        let limit = condition.request_limit.ok_or_else(|| {
            QuotaError::configuration(format!("rule '{rule_id}' is missing request_limit"))
        })?;
        let allowed = condition.allowed_endpoints.unwrap_or_default();
        let restricted = condition.restricted_endpoints.unwrap_or_default();

        // 未单独配置作用范围时，白名单和黑名单里的端点即为受管端点
        let governed = match condition.condition_endpoints {
            Some(endpoints) if !endpoints.is_empty() => endpoints,
            _ => allowed.union(&restricted).cloned().collect(),
        };

        Ok(Self {
            rule_id: rule_id.to_string(),
            limit,
            reset_period: condition.reset_period.unwrap_or(ResetPeriod::Monthly),
            governed,
            allowed,
            restricted,
            gate,
        })
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub(crate) fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    /// 受管端点为空时规则作用于所有端点
    pub fn governs(&self, endpoint: &str) -> bool {
        self.governed.is_empty() || self.governed.contains(endpoint)
    }

    fn eligibility(&self, endpoint: &str) -> Option<ReasonCode> {
        if self.restricted.contains(endpoint) {
            return Some(ReasonCode::FeatureRestricted);
        }
        if !self.allowed.is_empty() && !self.allowed.contains(endpoint) {
            return Some(ReasonCode::FeatureNotAllowed);
        }
        None
    }

    pub async fn validate(&self, context: &RequestContext) -> Result<Decision, QuotaError> {
        context.require(&REQUIRED_FIELDS)?;
        let endpoint = context.field("endpoint").unwrap_or_default();

        if !self.governs(endpoint) {
            tracing::debug!("Rule {} does not govern {}", self.rule_id, endpoint);
            return Ok(Decision::pass_through());
        }

        if let Some(reason) = self.eligibility(endpoint) {
            tracing::info!("Rule {} denied {}: {}", self.rule_id, endpoint, reason.as_str());
            return Ok(Decision::deny(reason));
        }

        let key = context.counter_key(&self.rule_id);
        let period = self.reset_period;
        let outcome = self
            .gate
            .check(&key, self.limit, move || expiry_seconds(period, &Local::now()))
            .await?;

        if outcome.allowed {
            Ok(Decision::counted(&key, outcome.count))
        } else {
            Ok(Decision::deny(ReasonCode::FeatureRequestLimitReached))
        }
    }
}
