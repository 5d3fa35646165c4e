//! # Rules
//!
//! Everything that decides how many points a purchase earns.
//!
//! ```text
//! conversion.rs - ConversionRule + resolver (priority, specificity, id)
//! campaign.rs   - CampaignBonus + resolver (priority, start date, id)
//! calculator.rs - trunc(value × multiplier × (1 + extra)), then caps
//! ```
//!
//! The resolvers are pure selections over a candidate set loaded up front.
//! They never touch the ledger.

pub mod calculator;
pub mod campaign;
pub mod conversion;

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MULTIPLIER_SCALE;
use crate::error::{Classify, ErrorKind};

pub use calculator::{Calculation, Clamp, PointsCalculator};
pub use campaign::{CampaignBonus, CampaignPhase, CampaignResolver};
pub use conversion::{ConversionRule, ConversionRuleResolver, RuleQuery, Specificity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("{0}: name must not be blank")]
    MissingName(String),

    #[error("{rule}: multiplier must not be negative, got {multiplier}")]
    NegativeMultiplier { rule: String, multiplier: Decimal },

    #[error("{rule}: priority must not be negative, got {priority}")]
    NegativePriority { rule: String, priority: i32 },

    #[error("{rule}: cap must be positive when set, got {cap}")]
    NonPositiveCap { rule: String, cap: i64 },

    #[error("{rule}: validity ends ({until}) before it starts ({from})")]
    InvertedWindow {
        rule: String,
        from: String,
        until: String,
    },

    #[error("{rule}: invalid MCC pattern {pattern:?}: {reason}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        reason: String,
    },

    #[error("duplicate id {id} among {what}")]
    DuplicateId { what: &'static str, id: u64 },
}

impl Classify for RuleError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// The candidate set handed to the resolvers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub conversion_rules: Vec<ConversionRule>,
    #[serde(default)]
    pub campaigns: Vec<CampaignBonus>,
}

impl RuleSet {
    /// Checks every definition and id uniqueness. Stops at the first
    /// problem.
    pub fn validate(&self) -> Result<(), RuleError> {
        let mut seen = HashSet::new();
        for rule in &self.conversion_rules {
            rule.validate()?;
            if !seen.insert(rule.id) {
                return Err(RuleError::DuplicateId {
                    what: "conversion rules",
                    id: rule.id,
                });
            }
        }

        let mut seen = HashSet::new();
        for campaign in &self.campaigns {
            campaign.validate()?;
            if !seen.insert(campaign.id) {
                return Err(RuleError::DuplicateId {
                    what: "campaigns",
                    id: campaign.id,
                });
            }
        }
        Ok(())
    }

    /// Rounds every multiplier to the supported scale.
    pub fn normalize(mut self) -> Self {
        for rule in &mut self.conversion_rules {
            rule.multiplier = rule.multiplier.round_dp(MULTIPLIER_SCALE);
        }
        for campaign in &mut self.campaigns {
            campaign.extra_multiplier = campaign.extra_multiplier.round_dp(MULTIPLIER_SCALE);
        }
        self
    }
}
