//! # Transaction Scoring
//!
//! The full "how many points does this purchase earn" pipeline:
//!
//! ```text
//! ScoringInput ─┬─> ConversionRuleResolver ─> multiplier, monthly cap ─┐
//!               └─> CampaignResolver       ─> extra, point cap ────────┴─> PointsCalculator ─> ScoreOutcome
//! ```
//!
//! The two resolvers run independently. Scoring is a pure read; crediting
//! the result is `Ledger::accrue`'s job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::{
    Calculation, CampaignBonus, CampaignResolver, ConversionRule, ConversionRuleResolver,
    PointsCalculator, RuleQuery, RuleSet,
};

/// A card transaction as seen by scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringInput {
    pub mcc: Option<String>,
    pub category: Option<String>,
    pub partner_id: Option<u64>,
    pub value: Option<Decimal>,
    pub as_of: DateTime<Utc>,
    /// The cardholder's segment, for campaign targeting.
    #[serde(default)]
    pub segment: Option<String>,
    /// Points already accrued this month, for the monthly cap.
    #[serde(default)]
    pub month_to_date: i64,
}

impl ScoringInput {
    pub fn new(value: Decimal, as_of: DateTime<Utc>) -> Self {
        Self {
            mcc: None,
            category: None,
            partner_id: None,
            value: Some(value),
            as_of,
            segment: None,
            month_to_date: 0,
        }
    }

    fn rule_query(&self) -> RuleQuery {
        RuleQuery {
            mcc: self.mcc.clone(),
            category: self.category.clone(),
            partner_id: self.partner_id,
            at: self.as_of,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub conversion_rule_id: Option<u64>,
    pub campaign_id: Option<u64>,
    pub points_awarded: i64,
}

/// Scores transactions against a fixed rule and campaign set.
#[derive(Debug, Clone, Default)]
pub struct TransactionScorer {
    rules: ConversionRuleResolver,
    campaigns: CampaignResolver,
}

impl TransactionScorer {
    pub fn new(rules: Vec<ConversionRule>, campaigns: Vec<CampaignBonus>) -> Self {
        Self {
            rules: ConversionRuleResolver::new(rules),
            campaigns: CampaignResolver::new(campaigns),
        }
    }

    pub fn from_rule_set(set: RuleSet) -> Self {
        Self::new(set.conversion_rules, set.campaigns)
    }

    pub fn rules(&self) -> &ConversionRuleResolver {
        &self.rules
    }

    pub fn campaigns(&self) -> &CampaignResolver {
        &self.campaigns
    }

    /// Score plus the calculation details.
    pub fn explain(&self, input: &ScoringInput) -> (ScoreOutcome, Calculation) {
        let rule = self.rules.resolve(&input.rule_query());
        let campaign = self
            .campaigns
            .resolve(input.segment.as_deref(), input.as_of.date_naive());

        let calculation = PointsCalculator::new(input.value)
            .multiplier(rule.map(|r| r.multiplier))
            .extra_multiplier(campaign.map(|c| c.extra_multiplier))
            .campaign_cap(campaign.and_then(CampaignBonus::effective_cap))
            .monthly_cap(rule.and_then(|r| r.monthly_cap), input.month_to_date)
            .calculate();

        let outcome = ScoreOutcome {
            conversion_rule_id: rule.map(|r| r.id),
            campaign_id: campaign.map(|c| c.id),
            points_awarded: calculation.points,
        };
        debug!(
            rule = ?outcome.conversion_rule_id,
            campaign = ?outcome.campaign_id,
            points = outcome.points_awarded,
            clamped = ?calculation.clamped_by,
            "transaction scored"
        );
        (outcome, calculation)
    }

    pub fn score(&self, input: &ScoringInput) -> ScoreOutcome {
        self.explain(input).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 30, 0).unwrap()
    }

    fn scorer() -> TransactionScorer {
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let travel = ConversionRule {
            category: Some("travel".into()),
            priority: 1,
            monthly_cap: Some(5_000),
            ..ConversionRule::general(10, "travel x2", dec!(2.0), since)
        };
        let promo = CampaignBonus {
            segment: Some("gold".into()),
            ..CampaignBonus::new(
                20,
                "gold summer",
                dec!(0.5),
                NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            )
        };
        TransactionScorer::new(vec![travel], vec![promo])
    }

    #[test]
    fn rule_and_campaign_both_apply() {
        let input = ScoringInput {
            category: Some("Travel".into()),
            segment: Some("gold".into()),
            ..ScoringInput::new(dec!(100.00), at())
        };
        let outcome = scorer().score(&input);
        assert_eq!(
            outcome,
            ScoreOutcome {
                conversion_rule_id: Some(10),
                campaign_id: Some(20),
                points_awarded: 300,
            }
        );
    }

    #[test]
    fn nothing_resolved_uses_defaults() {
        let outcome = scorer().score(&ScoringInput::new(dec!(42.90), at()));
        assert_eq!(outcome.conversion_rule_id, None);
        assert_eq!(outcome.campaign_id, None);
        assert_eq!(outcome.points_awarded, 42);
    }

    #[test]
    fn monthly_cap_uses_month_to_date() {
        let input = ScoringInput {
            category: Some("travel".into()),
            month_to_date: 4_900,
            ..ScoringInput::new(dec!(100.00), at())
        };
        let (outcome, calc) = scorer().explain(&input);
        assert_eq!(calc.base_points, 200);
        assert_eq!(outcome.points_awarded, 100);
    }

    #[test]
    fn missing_value_scores_zero() {
        let input = ScoringInput {
            value: None,
            ..ScoringInput::new(dec!(1), at())
        };
        assert_eq!(scorer().score(&input).points_awarded, 0);
    }
}
