// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};

use super::campaign::IN_ACCOUNT_EVENTS;

const MQL_RATE: f64 = 0.10;
const SQL_RATE: f64 = 0.06;
const OPPORTUNITY_RATE: f64 = 0.80;
const PIPELINE_PER_OPPORTUNITY: f64 = 50_000.0;
const IN_ACCOUNT_PIPELINE_MULTIPLIER: f64 = 20.0;

/// Metrics derived from a campaign's planning inputs.
///
/// Always a pure function of (expected leads, forecasted cost, campaign type).
///
/// ```
/// use campaign_sync::model::DerivedMetrics;
///
/// let m = DerivedMetrics::compute(100.0, 10_000.0, "Webinars");
/// assert_eq!((m.mql, m.sql, m.opportunities), (10, 6, 5));
/// assert_eq!(m.pipeline_forecast, 250_000.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub mql: u64,
    pub sql: u64,
    pub opportunities: u64,
    pub pipeline_forecast: f64,
}

impl DerivedMetrics {
    #[must_use]
    pub fn compute(expected_leads: f64, forecasted_cost: f64, campaign_type: &str) -> Self {
        let leads = expected_leads.max(0.0);
        let cost = forecasted_cost.max(0.0);

        let mql = round_count(leads * MQL_RATE);
        // SQL is taken from leads, not MQL; see DESIGN.md.
        let sql = round_count(leads * SQL_RATE);
        let opportunities = round_count(sql as f64 * OPPORTUNITY_RATE);

        let pipeline_forecast = if campaign_type == IN_ACCOUNT_EVENTS {
            cost * IN_ACCOUNT_PIPELINE_MULTIPLIER
        } else {
            opportunities as f64 * PIPELINE_PER_OPPORTUNITY
        };

        Self { mql, sql, opportunities, pipeline_forecast }
    }
}

/// Half-up rounding for non-negative inputs.
fn round_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webinar_scenario() {
        let m = DerivedMetrics::compute(100.0, 10_000.0, "Webinars");
        assert_eq!(m.mql, 10);
        assert_eq!(m.sql, 6);
        assert_eq!(m.opportunities, 5);
        assert_eq!(m.pipeline_forecast, 250_000.0);
    }

    #[test]
    fn test_in_account_special_case() {
        let m = DerivedMetrics::compute(0.0, 10_000.0, IN_ACCOUNT_EVENTS);
        assert_eq!(m.mql, 0);
        assert_eq!(m.sql, 0);
        assert_eq!(m.opportunities, 0);
        assert_eq!(m.pipeline_forecast, 200_000.0);
    }

    #[test]
    fn test_in_account_ignores_leads_for_pipeline() {
        let m = DerivedMetrics::compute(500.0, 1_000.0, IN_ACCOUNT_EVENTS);
        assert_eq!(m.mql, 50);
        assert_eq!(m.pipeline_forecast, 20_000.0);
    }

    #[test]
    fn test_zero_inputs() {
        assert_eq!(DerivedMetrics::compute(0.0, 0.0, "Webinars"), DerivedMetrics::default());
    }

    #[test]
    fn test_negative_inputs_clamped() {
        assert_eq!(DerivedMetrics::compute(-50.0, -1.0, "Webinars"), DerivedMetrics::default());
    }

    #[test]
    fn test_half_rounds_up() {
        // 25 leads -> 2.5 MQL -> 3, 1.5 SQL -> 2, 1.6 opps -> 2
        let m = DerivedMetrics::compute(25.0, 0.0, "Webinars");
        assert_eq!(m.mql, 3);
        assert_eq!(m.sql, 2);
        assert_eq!(m.opportunities, 2);
        assert_eq!(m.pipeline_forecast, 100_000.0);
    }
}
