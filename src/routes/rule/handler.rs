use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use super::model::{ResetResponse, RuleRequest, UsageResponse};
use crate::AppState;
use crate::error::AppError;
use crate::result::ApiResult;
use crate::utils::success_to_api_response;
use crate::validations::{Decision, Policy};

fn parse(
    state: &AppState,
    payload: Result<Json<RuleRequest>, JsonRejection>,
) -> Result<(Policy, RuleRequest), AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let policy = state.resolver.resolve(&req.rule)?;
    Ok((policy, req))
}

#[axum::debug_handler]
pub async fn validate_rule(
    State(state): State<AppState>,
    payload: Result<Json<RuleRequest>, JsonRejection>,
) -> Result<Json<ApiResult<Decision>>, AppError> {
    let (policy, req) = parse(&state, payload)?;
    let decision = policy.validate(&req.context).await?;
    if !decision.allowed {
        tracing::info!(
            "Rule {} denied user {:?}: {}",
            policy.rule_id(),
            req.context.user_id,
            decision.reason_code.as_str()
        );
    }
    Ok(success_to_api_response(decision))
}

#[axum::debug_handler]
pub async fn rule_usage(
    State(state): State<AppState>,
    payload: Result<Json<RuleRequest>, JsonRejection>,
) -> Result<Json<ApiResult<UsageResponse>>, AppError> {
    let (policy, req) = parse(&state, payload)?;
    let counters = policy.usage(&req.context).await?;
    Ok(success_to_api_response(UsageResponse {
        rule_id: policy.rule_id().to_string(),
        counters,
    }))
}

#[axum::debug_handler]
pub async fn reset_usage(
    State(state): State<AppState>,
    payload: Result<Json<RuleRequest>, JsonRejection>,
) -> Result<Json<ApiResult<ResetResponse>>, AppError> {
    let (policy, req) = parse(&state, payload)?;
    let reset = policy.reset(&req.context).await?;
    tracing::info!(
        "Reset {} counters of rule {} for user {:?}",
        reset.len(),
        policy.rule_id(),
        req.context.user_id
    );
    Ok(success_to_api_response(ResetResponse {
        rule_id: policy.rule_id().to_string(),
        reset,
    }))
}
