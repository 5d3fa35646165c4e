//! # Campaign Bonus Resolver
//!
//! Campaigns layer an extra multiplier on top of whatever conversion rule
//! applied: the total factor is `1 + extra_multiplier`. Resolution is
//! independent of the conversion rule and only looks at the user's segment
//! and the date.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RuleError;
use crate::config::CAMPAIGN_ENDING_SOON_DAYS;

/// Where a campaign stands relative to a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Upcoming,
    Active,
    /// Active, with at most [`CAMPAIGN_ENDING_SOON_DAYS`] days left.
    EndingSoon,
    Expired,
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignPhase::Upcoming => write!(f, "upcoming"),
            CampaignPhase::Active => write!(f, "active"),
            CampaignPhase::EndingSoon => write!(f, "ending_soon"),
            CampaignPhase::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBonus {
    pub id: u64,
    pub name: String,
    pub extra_multiplier: Decimal,
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    /// Unset or blank applies to every segment.
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Ceiling on the points a single transaction can earn while this
    /// campaign applies.
    #[serde(default)]
    pub point_cap: Option<i64>,
}

impl CampaignBonus {
    pub fn new(id: u64, name: impl Into<String>, extra_multiplier: Decimal, valid_from: NaiveDate) -> Self {
        Self {
            id,
            name: name.into(),
            extra_multiplier,
            valid_from,
            valid_until: None,
            segment: None,
            priority: 0,
            point_cap: None,
        }
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && self.valid_until.map_or(true, |until| date <= until)
    }

    pub fn applies_to_segment(&self, segment: Option<&str>) -> bool {
        match self.segment.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(wanted) => segment.is_some_and(|s| s.trim().eq_ignore_ascii_case(wanted)),
        }
    }

    pub fn total_factor(&self) -> Decimal {
        Decimal::ONE + self.extra_multiplier
    }

    /// A cap of zero or less means no cap.
    pub fn effective_cap(&self) -> Option<i64> {
        self.point_cap.filter(|cap| *cap > 0)
    }

    pub fn phase(&self, date: NaiveDate) -> CampaignPhase {
        if date < self.valid_from {
            return CampaignPhase::Upcoming;
        }
        match self.valid_until {
            Some(until) if date > until => CampaignPhase::Expired,
            Some(until)
                if until
                    .checked_sub_signed(Duration::days(CAMPAIGN_ENDING_SOON_DAYS))
                    .is_some_and(|limit| date >= limit) =>
            {
                CampaignPhase::EndingSoon
            }
            _ => CampaignPhase::Active,
        }
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        let rule = format!("campaign {}", self.id);
        if self.name.trim().is_empty() {
            return Err(RuleError::MissingName(rule));
        }
        if self.extra_multiplier < Decimal::ZERO {
            return Err(RuleError::NegativeMultiplier {
                rule,
                multiplier: self.extra_multiplier,
            });
        }
        if self.priority < 0 {
            return Err(RuleError::NegativePriority {
                rule,
                priority: self.priority,
            });
        }
        if let Some(cap) = self.point_cap.filter(|cap| *cap <= 0) {
            return Err(RuleError::NonPositiveCap { rule, cap });
        }
        if let Some(until) = self.valid_until.filter(|until| *until < self.valid_from) {
            return Err(RuleError::InvertedWindow {
                rule,
                from: self.valid_from.to_string(),
                until: until.to_string(),
            });
        }
        Ok(())
    }
}

/// Priority descending, then most recently started, then lowest id.
fn precedence(a: &CampaignBonus, b: &CampaignBonus) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.valid_from.cmp(&a.valid_from))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Default)]
pub struct CampaignResolver {
    campaigns: Vec<CampaignBonus>,
}

impl CampaignResolver {
    pub fn new(mut campaigns: Vec<CampaignBonus>) -> Self {
        campaigns.sort_by(precedence);
        Self { campaigns }
    }

    pub fn resolve(&self, segment: Option<&str>, date: NaiveDate) -> Option<&CampaignBonus> {
        self.campaigns
            .iter()
            .find(|c| c.is_active_on(date) && c.applies_to_segment(segment))
    }

    /// Campaigns running on `date`, in precedence order, regardless of
    /// segment.
    pub fn active_on(&self, date: NaiveDate) -> Vec<&CampaignBonus> {
        self.campaigns.iter().filter(|c| c.is_active_on(date)).collect()
    }

    pub fn campaigns(&self) -> &[CampaignBonus] {
        &self.campaigns
    }
}
