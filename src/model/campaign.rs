// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Campaign record.
//!
//! Planning inputs (forecasted cost, expected leads, campaign type) are private
//! so the derived metrics cannot drift from them: every setter recomputes.
//!
//! # Example
//!
//! ```
//! use campaign_sync::model::{Campaign, CampaignStatus};
//!
//! let mut campaign = Campaign::new("Webinars", 100.0, 10_000.0);
//! assert!(!campaign.id().is_empty());
//! assert_eq!(campaign.derived().pipeline_forecast, 250_000.0);
//!
//! campaign.set_expected_leads(200.0).unwrap();
//! assert_eq!(campaign.derived().mql, 20);
//! assert_eq!(campaign.status, CampaignStatus::Planning);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::derived::DerivedMetrics;
use super::{coerce, ModelError, Record, Repaired};

/// Campaign type whose pipeline is a multiple of cost rather than of opportunities.
pub const IN_ACCOUNT_EVENTS: &str = "In-Account Events (1:1)";

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CampaignStatus {
    #[default]
    Planning,
    OnTrack,
    Shipped,
    Cancelled,
}

impl CampaignStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "Planning",
            Self::OnTrack => "On Track",
            Self::Shipped => "Shipped",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Lenient parse: case, spacing and separators are ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "planning" => Some(Self::Planning),
            "ontrack" => Some(Self::OnTrack),
            "shipped" => Some(Self::Shipped),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CampaignStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CampaignStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown campaign status '{}'", raw)))
    }
}

/// A marketing campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    id: String,
    campaign_type: String,
    pub strategic_pillars: Vec<String>,
    pub revenue_play: String,
    pub fiscal_year: String,
    pub quarter_month: String,
    pub region: String,
    pub country: String,
    pub owner: String,
    pub description: String,
    forecasted_cost: f64,
    expected_leads: f64,
    #[serde(flatten)]
    derived: DerivedMetrics,
    pub status: CampaignStatus,
    pub actual_cost: Option<f64>,
    pub actual_leads: Option<f64>,
    pub actual_mqls: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a campaign with a fresh id and creation timestamp.
    pub fn new(campaign_type: impl Into<String>, expected_leads: f64, forecasted_cost: f64) -> Self {
        let mut campaign = Self {
            id: format!("campaign_{}", uuid::Uuid::new_v4().simple()),
            campaign_type: campaign_type.into(),
            strategic_pillars: Vec::new(),
            revenue_play: String::new(),
            fiscal_year: String::new(),
            quarter_month: String::new(),
            region: String::new(),
            country: String::new(),
            owner: String::new(),
            description: String::new(),
            forecasted_cost: forecasted_cost.max(0.0),
            expected_leads: expected_leads.max(0.0),
            derived: DerivedMetrics::default(),
            status: CampaignStatus::Planning,
            actual_cost: None,
            actual_leads: None,
            actual_mqls: None,
            created_at: Some(Utc::now()),
        };
        campaign.recompute();
        campaign
    }

    /// Same as [`Campaign::new`] with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, campaign_type: impl Into<String>, expected_leads: f64, forecasted_cost: f64) -> Self {
        let mut campaign = Self::new(campaign_type, expected_leads, forecasted_cost);
        campaign.id = id.into();
        campaign
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn campaign_type(&self) -> &str {
        &self.campaign_type
    }

    #[must_use]
    pub fn forecasted_cost(&self) -> f64 {
        self.forecasted_cost
    }

    #[must_use]
    pub fn expected_leads(&self) -> f64 {
        self.expected_leads
    }

    #[must_use]
    pub fn derived(&self) -> &DerivedMetrics {
        &self.derived
    }

    pub fn set_campaign_type(&mut self, campaign_type: impl Into<String>) {
        self.campaign_type = campaign_type.into();
        self.recompute();
    }

    pub fn set_forecasted_cost(&mut self, cost: f64) -> Result<(), ModelError> {
        if cost < 0.0 {
            return Err(ModelError::NegativeValue { field: "forecastedCost", value: cost });
        }
        self.forecasted_cost = cost;
        self.recompute();
        Ok(())
    }

    pub fn set_expected_leads(&mut self, leads: f64) -> Result<(), ModelError> {
        if leads < 0.0 {
            return Err(ModelError::NegativeValue { field: "expectedLeads", value: leads });
        }
        self.expected_leads = leads;
        self.recompute();
        Ok(())
    }

    /// Record execution results.
    pub fn record_actuals(&mut self, cost: Option<f64>, leads: Option<f64>, mqls: Option<f64>) {
        self.actual_cost = cost;
        self.actual_leads = leads;
        self.actual_mqls = mqls;
    }

    fn recompute(&mut self) {
        self.derived = DerivedMetrics::compute(self.expected_leads, self.forecasted_cost, &self.campaign_type);
    }
}

impl Record for Campaign {
    const KIND: &'static str = "campaign";
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> &str {
        &self.id
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

        let status = match obj.get("status").and_then(Value::as_str) {
            Some(s) => match CampaignStatus::parse(s) {
                Some(parsed) => {
                    if parsed.as_str() != s {
                        fixes += 1;
                    }
                    parsed
                }
                None => {
                    fixes += 1;
                    CampaignStatus::Planning
                }
            },
            None => {
                fixes += 1;
                CampaignStatus::Planning
            }
        };

        let created_at = match obj.get("createdAt") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => {
                    fixes += 1;
                    None
                }
            },
            Some(_) => {
                fixes += 1;
                None
            }
        };

        let mut record = Self {
            id: coerce::id(obj, "id", "campaign", &mut fixes),
            campaign_type: coerce::string(obj, "campaignType", &mut fixes),
            strategic_pillars: coerce::string_list(obj, "strategicPillars", &mut fixes),
            revenue_play: coerce::string(obj, "revenuePlay", &mut fixes),
            fiscal_year: coerce::string(obj, "fiscalYear", &mut fixes),
            quarter_month: coerce::string(obj, "quarterMonth", &mut fixes),
            region: coerce::string(obj, "region", &mut fixes),
            country: coerce::string(obj, "country", &mut fixes),
            owner: coerce::string(obj, "owner", &mut fixes),
            description: coerce::string(obj, "description", &mut fixes),
            forecasted_cost: coerce::non_negative(obj, "forecastedCost", &mut fixes),
            expected_leads: coerce::non_negative(obj, "expectedLeads", &mut fixes),
            derived: DerivedMetrics::default(),
            status,
            actual_cost: coerce::opt_number(obj, "actualCost", &mut fixes),
            actual_leads: coerce::opt_number(obj, "actualLeads", &mut fixes),
            actual_mqls: coerce::opt_number(obj, "actualMqls", &mut fixes),
            created_at,
        };
        record.recompute();

        Repaired { record, fixes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_campaign_has_id_and_metrics() {
        let c = Campaign::new("Webinars", 100.0, 10_000.0);
        assert!(c.id().starts_with("campaign_"));
        assert!(c.created_at.is_some());
        assert_eq!(c.derived().opportunities, 5);
    }

    #[test]
    fn test_setters_recompute() {
        let mut c = Campaign::new("Webinars", 0.0, 10_000.0);
        assert_eq!(c.derived().pipeline_forecast, 0.0);
        c.set_campaign_type(IN_ACCOUNT_EVENTS);
        assert_eq!(c.derived().pipeline_forecast, 200_000.0);
        c.set_forecasted_cost(5_000.0).unwrap();
        assert_eq!(c.derived().pipeline_forecast, 100_000.0);
    }

    #[test]
    fn test_negative_setter_rejected() {
        let mut c = Campaign::new("Webinars", 10.0, 10.0);
        let err = c.set_expected_leads(-1.0).unwrap_err();
        assert!(matches!(err, ModelError::NegativeValue { field: "expectedLeads", .. }));
        assert_eq!(c.expected_leads(), 10.0);
    }

    #[test]
    fn test_status_wire_format() {
        let c = Campaign::with_id("c1", "Webinars", 1.0, 1.0);
        let mut value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["status"], "Planning");
        value["status"] = json!("On Track");
        let parsed: Campaign = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.status, CampaignStatus::OnTrack);
    }

    #[test]
    fn test_serializes_flat_camel_case() {
        let c = Campaign::with_id("c1", "Webinars", 100.0, 10_000.0);
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["id"], "c1");
        assert_eq!(value["campaignType"], "Webinars");
        assert_eq!(value["mql"], 10);
        assert_eq!(value["pipelineForecast"], 250_000.0);
    }

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!(CampaignStatus::parse("on-track"), Some(CampaignStatus::OnTrack));
        assert_eq!(CampaignStatus::parse("CANCELED"), Some(CampaignStatus::Cancelled));
        assert_eq!(CampaignStatus::parse("done"), None);
    }

    #[test]
    fn test_repair_well_formed_entry_needs_no_fixes() {
        let c = Campaign::with_id("c1", "Webinars", 100.0, 10_000.0);
        let repaired = Campaign::repair_entry(&serde_json::to_value(&c).unwrap());
        assert_eq!(repaired.fixes, 0);
        assert_eq!(repaired.record, c);
    }

    #[test]
    fn test_repair_recomputes_tampered_metrics() {
        let raw = json!({
            "id": "c1", "campaignType": "Webinars",
            "expectedLeads": 100, "forecastedCost": "10000",
            "mql": 999, "pipelineForecast": 1
        });
        let repaired = Campaign::repair_entry(&raw);
        assert_eq!(repaired.record.derived().mql, 10);
        assert_eq!(repaired.record.derived().pipeline_forecast, 250_000.0);
        assert_eq!(repaired.record.forecasted_cost(), 10_000.0);
    }

    #[test]
    fn test_repair_non_object_gives_defaults() {
        let repaired = Campaign::repair_entry(&json!(42));
        assert!(repaired.fixes > 0);
        assert!(!repaired.record.id().is_empty());
        assert_eq!(repaired.record.status, CampaignStatus::Planning);
        assert_eq!(repaired.record.forecasted_cost(), 0.0);
        assert!(repaired.record.strategic_pillars.is_empty());
    }
}
