// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain records persisted by the sync core.
//!
//! Each record type implements [`Record`], which is what the repository, the
//! divergence monitor and the recovery service are generic over. The key
//! method is [`Record::repair_entry`]: it turns *any* JSON value into a
//! well-formed record, filling type-correct defaults for whatever is missing.

mod budget;
mod campaign;
mod derived;

pub use budget::{Budget, BudgetUtilization, ProgramCost};
pub use campaign::{Campaign, CampaignStatus, IN_ACCOUNT_EVENTS};
pub use derived::DerivedMetrics;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Budget for '{owner}' is locked at {locked_value}")]
    BudgetLocked { owner: String, locked_value: f64 },
    #[error("{field} must not be negative (got {value})")]
    NegativeValue { field: &'static str, value: f64 },
}

/// Result of coercing one raw entry into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<R> {
    pub record: R,
    /// Number of fields that had to be defaulted or coerced
    pub fixes: usize,
}

/// A persisted domain record.
pub trait Record:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Short name used in logs and metrics
    const KIND: &'static str;
    /// JSON field carrying the record identity
    const ID_FIELD: &'static str;

    fn id(&self) -> &str;

    /// Coerce an arbitrary JSON value into a well-formed record. Never fails.
    fn repair_entry(raw: &Value) -> Repaired<Self>;

    /// Split a stored collection into raw entries, or `None` if the value is
    /// not a recognised collection layout.
    fn entries_from_value(raw: &Value) -> Option<Vec<Value>> {
        raw.as_array().cloned()
    }
}

/// Field extraction helpers shared by the record repair routines.
///
/// Each helper bumps `fixes` when it had to default or coerce the value.
pub(crate) mod coerce {
    use serde_json::{Map, Value};

    pub fn string(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> String {
        match obj.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => {
                *fixes += 1;
                n.to_string()
            }
            _ => {
                *fixes += 1;
                String::new()
            }
        }
    }

    pub fn opt_string(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> Option<String> {
        match obj.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                *fixes += 1;
                None
            }
        }
    }

    /// Non-negative number; numeric strings (CSV imports) are accepted.
    pub fn non_negative(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> f64 {
        match opt_number(obj, field, fixes) {
            Some(n) if n >= 0.0 => n,
            Some(_) => {
                *fixes += 1;
                0.0
            }
            None => {
                *fixes += 1;
                0.0
            }
        }
    }

    pub fn opt_number(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> Option<f64> {
        match obj.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()),
            Some(Value::String(s)) => {
                *fixes += 1;
                s.trim().replace(',', "").parse::<f64>().ok().filter(|f| f.is_finite())
            }
            Some(_) => {
                *fixes += 1;
                None
            }
        }
    }

    pub fn bool(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> bool {
        match obj.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => {
                *fixes += 1;
                true
            }
            None => false,
            Some(_) => {
                *fixes += 1;
                false
            }
        }
    }

    pub fn string_list(obj: &Map<String, Value>, field: &str, fixes: &mut usize) -> Vec<String> {
        match obj.get(field) {
            Some(Value::Array(items)) => {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                if strings.len() != items.len() {
                    *fixes += 1;
                }
                strings
            }
            Some(Value::String(s)) => {
                *fixes += 1;
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            }
            _ => {
                *fixes += 1;
                Vec::new()
            }
        }
    }

    pub fn id(obj: &Map<String, Value>, field: &str, prefix: &str, fixes: &mut usize) -> String {
        match obj.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => {
                *fixes += 1;
                n.to_string()
            }
            _ => {
                *fixes += 1;
                format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::coerce;
    use serde_json::json;

    #[test]
    fn test_coerce_numeric_strings() {
        let obj = json!({"cost": "1,250.5", "bad": "abc", "neg": -3});
        let obj = obj.as_object().unwrap();
        let mut fixes = 0;
        assert_eq!(coerce::non_negative(obj, "cost", &mut fixes), 1250.5);
        assert_eq!(coerce::non_negative(obj, "bad", &mut fixes), 0.0);
        assert_eq!(coerce::non_negative(obj, "neg", &mut fixes), 0.0);
        assert_eq!(coerce::non_negative(obj, "missing", &mut fixes), 0.0);
        assert_eq!(fixes, 5);
    }

    #[test]
    fn test_coerce_string_list_from_csv_cell() {
        let obj = json!({"pillars": "Brand, Pipeline ,"});
        let mut fixes = 0;
        let list = coerce::string_list(obj.as_object().unwrap(), "pillars", &mut fixes);
        assert_eq!(list, vec!["Brand".to_string(), "Pipeline".to_string()]);
        assert_eq!(fixes, 1);
    }

    #[test]
    fn test_coerce_id_generates_when_missing() {
        let obj = json!({"id": "  "});
        let mut fixes = 0;
        let id = coerce::id(obj.as_object().unwrap(), "id", "campaign", &mut fixes);
        assert!(id.starts_with("campaign_"));
        assert_eq!(fixes, 1);
    }
}
