use serde::{Deserialize, Serialize};

use crate::cache::CachedCounter;
use crate::validations::{RequestContext, RuleConfig};

#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub rule: RuleConfig,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub rule_id: String,
    pub counters: Vec<CachedCounter>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub rule_id: String,
    pub reset: Vec<String>,
}
