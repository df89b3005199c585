// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Budget record, one per owner/region.
//!
//! Invariant: when `locked_by_owner` is set, `assigned_budget == Some(locked_value)`.
//! The lock fields are private and only change through [`Budget::lock`] and
//! [`Budget::unlock`], so the invariant cannot be broken from outside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{coerce, ModelError, Record, Repaired};

/// A program cost line counted against a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramCost {
    pub id: String,
    pub forecasted_cost: f64,
    pub actual_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    owner: String,
    assigned_budget: Option<f64>,
    locked_by_owner: bool,
    locked_value: Option<f64>,
    locked_by: Option<String>,
    pub programs: Vec<ProgramCost>,
}

/// Spend against an assigned budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetUtilization {
    pub assigned: Option<f64>,
    pub forecasted: f64,
    pub actual: f64,
    /// `forecasted / assigned`, when a non-zero budget is assigned
    pub forecasted_ratio: Option<f64>,
}

impl Budget {
    pub fn new(owner: impl Into<String>, assigned_budget: Option<f64>) -> Self {
        Self {
            owner: owner.into(),
            assigned_budget,
            locked_by_owner: false,
            locked_value: None,
            locked_by: None,
            programs: Vec::new(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn assigned_budget(&self) -> Option<f64> {
        self.assigned_budget
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_by_owner
    }

    #[must_use]
    pub fn locked_by(&self) -> Option<&str> {
        self.locked_by.as_deref()
    }

    /// Change the assigned budget. Fails while an administrator lock is held.
    pub fn set_assigned_budget(&mut self, value: Option<f64>) -> Result<(), ModelError> {
        if let (true, Some(locked_value)) = (self.locked_by_owner, self.locked_value) {
            return Err(ModelError::BudgetLocked { owner: self.owner.clone(), locked_value });
        }
        if let Some(v) = value {
            if v < 0.0 {
                return Err(ModelError::NegativeValue { field: "assignedBudget", value: v });
            }
        }
        self.assigned_budget = value;
        Ok(())
    }

    /// Lock the budget at `value`, recording who locked it.
    pub fn lock(&mut self, value: f64, locked_by: impl Into<String>) -> Result<(), ModelError> {
        if value < 0.0 {
            return Err(ModelError::NegativeValue { field: "lockedValue", value });
        }
        self.locked_by_owner = true;
        self.locked_value = Some(value);
        self.locked_by = Some(locked_by.into());
        self.assigned_budget = Some(value);
        Ok(())
    }

    /// Release the lock; the assigned budget keeps its locked value.
    pub fn unlock(&mut self) {
        self.locked_by_owner = false;
        self.locked_value = None;
        self.locked_by = None;
    }

    #[must_use]
    pub fn utilization(&self) -> BudgetUtilization {
        let forecasted: f64 = self.programs.iter().map(|p| p.forecasted_cost).sum();
        let actual: f64 = self.programs.iter().map(|p| p.actual_cost).sum();
        let forecasted_ratio = self
            .assigned_budget
            .filter(|a| *a > 0.0)
            .map(|a| forecasted / a);
        BudgetUtilization { assigned: self.assigned_budget, forecasted, actual, forecasted_ratio }
    }
}

fn repair_program(raw: &Value, fixes: &mut usize) -> Option<ProgramCost> {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => {
            *fixes += 1;
            return None;
        }
    };
    Some(ProgramCost {
        id: coerce::id(obj, "id", "program", fixes),
        forecasted_cost: coerce::non_negative(obj, "forecastedCost", fixes),
        actual_cost: coerce::non_negative(obj, "actualCost", fixes),
    })
}

impl Record for Budget {
    const KIND: &'static str = "budget";
    const ID_FIELD: &'static str = "owner";

    fn id(&self) -> &str {
        &self.owner
    }

    fn repair_entry(raw: &Value) -> Repaired<Self> {
        let empty = serde_json::Map::new();
        let mut fixes = 0;
        let obj = match raw.as_object() {
            Some(obj) => obj,
            None => {
                fixes += 1;
                &empty
            }
        };

        let owner = coerce::id(obj, "owner", "owner", &mut fixes);
        let mut assigned_budget = coerce::opt_number(obj, "assignedBudget", &mut fixes);
        if assigned_budget.is_some_and(|v| v < 0.0) {
            fixes += 1;
            assigned_budget = None;
        }
        let mut locked_by_owner = coerce::bool(obj, "lockedByOwner", &mut fixes);
        let mut locked_value = coerce::opt_number(obj, "lockedValue", &mut fixes);
        if locked_value.is_some_and(|v| v < 0.0) {
            fixes += 1;
            locked_value = None;
        }
        let mut locked_by = coerce::opt_string(obj, "lockedBy", &mut fixes);

        if locked_by_owner {
            match (locked_value, assigned_budget) {
                (Some(v), a) if a != Some(v) => {
                    fixes += 1;
                    assigned_budget = Some(v);
                }
                (None, Some(a)) => {
                    fixes += 1;
                    locked_value = Some(a);
                }
                (None, None) => {
                    fixes += 1;
                    locked_by_owner = false;
                    locked_by = None;
                }
                _ => {}
            }
        } else if locked_value.is_some() || locked_by.is_some() {
            fixes += 1;
            locked_value = None;
            locked_by = None;
        }

        let programs = match obj.get("programs") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|p| repair_program(p, &mut fixes))
                .collect(),
            None | Some(Value::Null) => {
                fixes += 1;
                Vec::new()
            }
            Some(_) => {
                fixes += 1;
                Vec::new()
            }
        };

        Repaired {
            record: Self { owner, assigned_budget, locked_by_owner, locked_value, locked_by, programs },
            fixes,
        }
    }

    /// Accepts the array layout and the legacy `{owner: {...}}` map layout.
    fn entries_from_value(raw: &Value) -> Option<Vec<Value>> {
        match raw {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => Some(
                map.iter()
                    .map(|(owner, entry)| {
                        let mut entry = entry.clone();
                        if let Value::Object(fields) = &mut entry {
                            fields
                                .entry("owner")
                                .or_insert_with(|| Value::String(owner.clone()));
                        }
                        entry
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}
