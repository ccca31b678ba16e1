//! 规则配置记录及条件数据解析
//!
//! 条件数据来自外部规则系统，列表字段只接受字符串数组或内容为 JSON 数组的字符串，
//! 不对配置内容做任何表达式求值。

use std::collections::BTreeSet;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::QuotaError;
use crate::utils::window::ResetPeriod;

/// 规则配置记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub policy_class_id: String,
    pub rule_id: String,
    #[serde(default)]
    pub condition_data: Map<String, Value>,
}

impl RuleConfig {
    pub fn new(policy_class_id: &str, rule_id: &str, condition_data: Value) -> Self {
        let condition_data = match condition_data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            policy_class_id: policy_class_id.to_string(),
            rule_id: rule_id.to_string(),
            condition_data,
        }
    }

    pub fn condition(&self) -> Result<ConditionData, QuotaError> {
        ConditionData::from_map(&self.condition_data).map_err(|e| {
            QuotaError::configuration(format!(
                "invalid condition data for rule '{}': {}",
                self.rule_id, e
            ))
        })
    }
}

pub type EndpointSet = BTreeSet<String>;
pub type ModelSet = BTreeSet<String>;

/// 条件参数，未出现的字段为 `None`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConditionData {
    #[serde(default, deserialize_with = "non_negative_int")]
    pub request_limit: Option<i64>,
    #[serde(default)]
    pub reset_period: Option<ResetPeriod>,
    #[serde(default, deserialize_with = "string_set")]
    pub condition_endpoints: Option<EndpointSet>,
    #[serde(default, deserialize_with = "string_set")]
    pub allowed_endpoints: Option<EndpointSet>,
    #[serde(default, deserialize_with = "string_set")]
    pub restricted_endpoints: Option<EndpointSet>,
    #[serde(default, deserialize_with = "string_set")]
    pub allowed_models: Option<ModelSet>,
    #[serde(default, deserialize_with = "string_set")]
    pub allowed_standard_models: Option<ModelSet>,
    #[serde(default, deserialize_with = "string_set")]
    pub allowed_premium_models: Option<ModelSet>,
    #[serde(default, deserialize_with = "non_negative_int")]
    pub standard_models_limit: Option<i64>,
    #[serde(default, deserialize_with = "non_negative_int")]
    pub premium_models_limit: Option<i64>,
    #[serde(default)]
    pub standard_limit_time_period: Option<ResetPeriod>,
    #[serde(default)]
    pub premium_limit_time_period: Option<ResetPeriod>,
}

impl ConditionData {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map.clone()))
    }

    /// 用 `defaults` 补齐未配置的字段
    pub fn or(self, defaults: ConditionData) -> ConditionData {
        ConditionData {
            request_limit: self.request_limit.or(defaults.request_limit),
            reset_period: self.reset_period.or(defaults.reset_period),
            condition_endpoints: self.condition_endpoints.or(defaults.condition_endpoints),
            allowed_endpoints: self.allowed_endpoints.or(defaults.allowed_endpoints),
            restricted_endpoints: self.restricted_endpoints.or(defaults.restricted_endpoints),
            allowed_models: self.allowed_models.or(defaults.allowed_models),
            allowed_standard_models: self
                .allowed_standard_models
                .or(defaults.allowed_standard_models),
            allowed_premium_models: self
                .allowed_premium_models
                .or(defaults.allowed_premium_models),
            standard_models_limit: self.standard_models_limit.or(defaults.standard_models_limit),
            premium_models_limit: self.premium_models_limit.or(defaults.premium_models_limit),
            standard_limit_time_period: self
                .standard_limit_time_period
                .or(defaults.standard_limit_time_period),
            premium_limit_time_period: self
                .premium_limit_time_period
                .or(defaults.premium_limit_time_period),
        }
    }
}

pub(crate) fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListField {
    List(Vec<String>),
    Encoded(String),
}

fn string_set<'de, D>(deserializer: D) -> Result<Option<BTreeSet<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<ListField>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(ListField::List(items)) => items,
        Some(ListField::Encoded(raw)) => serde_json::from_str::<Vec<String>>(&raw).map_err(|e| {
            D::Error::custom(format!("expected a JSON list of strings, got {raw:?}: {e}"))
        })?,
    };
    Ok(Some(items.into_iter().collect()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntField {
    Number(i64),
    Text(String),
}

fn non_negative_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<IntField>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(IntField::Number(value)) => value,
        Some(IntField::Text(raw)) => raw
            .trim()
            .parse::<i64>()
            .map_err(|e| D::Error::custom(format!("expected an integer, got {raw:?}: {e}")))?,
    };
    if value < 0 {
        return Err(D::Error::custom(format!("limit must not be negative, got {value}")));
    }
    Ok(Some(value))
}
