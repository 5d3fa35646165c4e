//! # Conversion Rule Resolver
//!
//! Picks the single conversion rule that applies to a card transaction.
//!
//! ## Selection
//!
//! 1. **Filter**: active, `valid_from ≤ at ≤ valid_until` (open end means
//!    no end), and every scope the rule sets must match the transaction.
//!    An unset scope matches anything.
//! 2. **Order**: priority descending, then [`Specificity`] descending,
//!    then id ascending.
//! 3. **Pick** the head, if any.
//!
//! MCC patterns are compiled once when the resolver is built. A pattern
//! that does not compile is logged and never matches; it is not an error
//! at resolution time.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::RuleError;

// ---------------------------------------------------------------------------
// Specificity
// ---------------------------------------------------------------------------

/// How narrowly a rule is scoped. Breaks priority ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Specificity {
    General = 1,
    Mcc = 2,
    Category = 3,
    Partner = 4,
}

impl Specificity {
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specificity::General => write!(f, "general"),
            Specificity::Mcc => write!(f, "mcc"),
            Specificity::Category => write!(f, "category"),
            Specificity::Partner => write!(f, "partner"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversionRule
// ---------------------------------------------------------------------------

fn default_active() -> bool {
    true
}

/// Maps transaction attributes to a points-per-currency multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    pub id: u64,
    pub name: String,
    pub multiplier: Decimal,
    #[serde(default)]
    pub mcc_pattern: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub partner_id: Option<u64>,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i32,
    /// Maximum points this rule may award per user and card per month.
    #[serde(default)]
    pub monthly_cap: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ConversionRule {
    /// A general, always-active rule. Mostly for tests and seeding.
    pub fn general(id: u64, name: impl Into<String>, multiplier: Decimal, valid_from: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            multiplier,
            mcc_pattern: None,
            category: None,
            partner_id: None,
            valid_from,
            valid_until: None,
            priority: 0,
            monthly_cap: None,
            active: true,
        }
    }

    pub fn mcc_pattern(&self) -> Option<&str> {
        non_blank(&self.mcc_pattern)
    }

    pub fn category(&self) -> Option<&str> {
        non_blank(&self.category)
    }

    /// The narrowest scope this rule sets.
    pub fn specificity(&self) -> Specificity {
        if self.partner_id.is_some() {
            Specificity::Partner
        } else if self.category().is_some() {
            Specificity::Category
        } else if self.mcc_pattern().is_some() {
            Specificity::Mcc
        } else {
            Specificity::General
        }
    }

    /// Inclusive on both ends.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.map_or(true, |until| at <= until)
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        let rule = format!("conversion rule {}", self.id);
        if self.name.trim().is_empty() {
            return Err(RuleError::MissingName(rule));
        }
        if self.multiplier < Decimal::ZERO {
            return Err(RuleError::NegativeMultiplier {
                rule,
                multiplier: self.multiplier,
            });
        }
        if self.priority < 0 {
            return Err(RuleError::NegativePriority {
                rule,
                priority: self.priority,
            });
        }
        if let Some(cap) = self.monthly_cap.filter(|cap| *cap <= 0) {
            return Err(RuleError::NonPositiveCap { rule, cap });
        }
        if let Some(until) = self.valid_until.filter(|until| *until < self.valid_from) {
            return Err(RuleError::InvertedWindow {
                rule,
                from: self.valid_from.to_rfc3339(),
                until: until.to_rfc3339(),
            });
        }
        if let Some(pattern) = self.mcc_pattern() {
            anchored(pattern).map_err(|e| RuleError::InvalidPattern {
                rule,
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// The transaction attributes a rule can be scoped on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQuery {
    pub mcc: Option<String>,
    pub category: Option<String>,
    pub partner_id: Option<u64>,
    pub at: DateTime<Utc>,
}

impl RuleQuery {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            mcc: None,
            category: None,
            partner_id: None,
            at,
        }
    }

    pub fn mcc(mut self, mcc: impl Into<String>) -> Self {
        self.mcc = Some(mcc.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn partner(mut self, partner_id: u64) -> Self {
        self.partner_id = Some(partner_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Candidate {
    rule: ConversionRule,
    /// `None` when the rule has no pattern; `Some(None)` when it has one
    /// that failed to compile.
    pattern: Option<Option<Regex>>,
    category: Option<String>,
}

impl Candidate {
    fn new(rule: ConversionRule) -> Self {
        let pattern = rule.mcc_pattern().map(|p| match anchored(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(rule = rule.id, pattern = p, error = %e, "invalid MCC pattern, rule will never match");
                None
            }
        });
        let category = rule.category().map(str::to_lowercase);
        Self {
            rule,
            pattern,
            category,
        }
    }

    fn matches(&self, query: &RuleQuery) -> bool {
        if !self.rule.active || !self.rule.is_valid_at(query.at) {
            return false;
        }

        if let Some(pattern) = &self.pattern {
            let matched = match (pattern, query.mcc.as_deref()) {
                (Some(re), Some(mcc)) => re.is_match(mcc.trim()),
                _ => false,
            };
            if !matched {
                return false;
            }
        }

        if let Some(category) = &self.category {
            let matched = query
                .category
                .as_deref()
                .is_some_and(|c| c.trim().to_lowercase() == *category);
            if !matched {
                return false;
            }
        }

        if let Some(partner) = self.rule.partner_id {
            if query.partner_id != Some(partner) {
                return false;
            }
        }

        true
    }
}

/// Highest priority first, then most specific, then lowest id.
fn precedence(a: &ConversionRule, b: &ConversionRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.specificity().cmp(&a.specificity()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Resolves the applicable conversion rule from a fixed candidate set.
#[derive(Debug, Clone, Default)]
pub struct ConversionRuleResolver {
    candidates: Vec<Candidate>,
}

impl ConversionRuleResolver {
    pub fn new(rules: Vec<ConversionRule>) -> Self {
        let mut candidates: Vec<Candidate> = rules.into_iter().map(Candidate::new).collect();
        candidates.sort_by(|a, b| precedence(&a.rule, &b.rule));
        Self { candidates }
    }

    /// The winning rule, or `None` when nothing matches.
    pub fn resolve(&self, query: &RuleQuery) -> Option<&ConversionRule> {
        self.candidates
            .iter()
            .find(|c| c.matches(query))
            .map(|c| &c.rule)
    }

    /// Every matching rule in precedence order. The first one is what
    /// `resolve` returns.
    pub fn candidates(&self, query: &RuleQuery) -> Vec<&ConversionRule> {
        self.candidates
            .iter()
            .filter(|c| c.matches(query))
            .map(|c| &c.rule)
            .collect()
    }

    pub fn rules(&self) -> impl Iterator<Item = &ConversionRule> {
        self.candidates.iter().map(|c| &c.rule)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn rule(id: u64, priority: i32) -> ConversionRule {
        ConversionRule {
            priority,
            ..ConversionRule::general(id, format!("rule {id}"), dec!(1.0), now() - Duration::days(30))
        }
    }

    #[test]
    fn partner_wins_a_priority_tie() {
        let general = rule(1, 1);
        let travel = ConversionRule {
            category: Some("travel".into()),
            ..rule(2, 1)
        };
        let partner = ConversionRule {
            partner_id: Some(42),
            ..rule(3, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![general, travel, partner]);

        let query = RuleQuery::at(now()).category("travel").partner(42);
        assert_eq!(resolver.resolve(&query).map(|r| r.id), Some(3));
        let order: Vec<u64> = resolver.candidates(&query).iter().map(|r| r.id).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn priority_beats_specificity() {
        let general = rule(1, 5);
        let category = ConversionRule {
            category: Some("grocery".into()),
            ..rule(2, 10)
        };
        let resolver = ConversionRuleResolver::new(vec![general.clone(), category]);
        let query = RuleQuery::at(now()).category("grocery");
        assert_eq!(resolver.resolve(&query).map(|r| r.id), Some(2));

        // And the other way round: a general rule with higher priority wins.
        let low_category = ConversionRule {
            category: Some("grocery".into()),
            ..rule(3, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![low_category, general]);
        assert_eq!(resolver.resolve(&query).map(|r| r.id), Some(1));
    }

    #[test]
    fn lowest_id_breaks_remaining_ties() {
        let resolver = ConversionRuleResolver::new(vec![rule(9, 3), rule(4, 3), rule(7, 3)]);
        assert_eq!(resolver.resolve(&RuleQuery::at(now())).map(|r| r.id), Some(4));
    }

    #[test]
    fn category_match_ignores_case() {
        let r = ConversionRule {
            category: Some("Travel".into()),
            ..rule(1, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![r]);
        assert!(resolver.resolve(&RuleQuery::at(now()).category("TRAVEL")).is_some());
        assert!(resolver.resolve(&RuleQuery::at(now()).category("fuel")).is_none());
        assert!(resolver.resolve(&RuleQuery::at(now())).is_none());
    }

    #[test]
    fn partner_match_is_exact() {
        let r = ConversionRule {
            partner_id: Some(42),
            ..rule(1, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![r]);
        assert!(resolver.resolve(&RuleQuery::at(now()).partner(42)).is_some());
        assert!(resolver.resolve(&RuleQuery::at(now()).partner(43)).is_none());
    }

    #[test]
    fn mcc_pattern_is_anchored() {
        let r = ConversionRule {
            mcc_pattern: Some("58[0-9]{2}".into()),
            ..rule(1, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![r]);
        assert!(resolver.resolve(&RuleQuery::at(now()).mcc("5812")).is_some());
        assert!(resolver.resolve(&RuleQuery::at(now()).mcc("15812")).is_none());
        assert!(resolver.resolve(&RuleQuery::at(now())).is_none());
    }

    #[test]
    fn invalid_pattern_never_matches() {
        let broken = ConversionRule {
            mcc_pattern: Some("([0-9".into()),
            ..rule(1, 100)
        };
        let fallback = rule(2, 1);
        let resolver = ConversionRuleResolver::new(vec![broken.clone(), fallback]);
        assert_eq!(
            resolver.resolve(&RuleQuery::at(now()).mcc("5812")).map(|r| r.id),
            Some(2)
        );
        assert!(matches!(
            broken.validate(),
            Err(RuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let r = ConversionRule {
            valid_from: now(),
            valid_until: Some(now() + Duration::days(1)),
            ..rule(1, 1)
        };
        let resolver = ConversionRuleResolver::new(vec![r]);
        assert!(resolver.resolve(&RuleQuery::at(now())).is_some());
        assert!(resolver
            .resolve(&RuleQuery::at(now() + Duration::days(1)))
            .is_some());
        assert!(resolver
            .resolve(&RuleQuery::at(now() - Duration::seconds(1)))
            .is_none());
        assert!(resolver
            .resolve(&RuleQuery::at(now() + Duration::days(2)))
            .is_none());
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let r = ConversionRule {
            active: false,
            ..rule(1, 1)
        };
        assert!(ConversionRuleResolver::new(vec![r])
            .resolve(&RuleQuery::at(now()))
            .is_none());
    }

    #[test]
    fn blank_scopes_count_as_unset() {
        let r = ConversionRule {
            category: Some("  ".into()),
            mcc_pattern: Some(String::new()),
            ..rule(1, 1)
        };
        assert_eq!(r.specificity(), Specificity::General);
        assert!(ConversionRuleResolver::new(vec![r])
            .resolve(&RuleQuery::at(now()))
            .is_some());
    }

    #[test]
    fn validation() {
        assert!(rule(1, 0).validate().is_ok());
        assert!(matches!(
            ConversionRule {
                multiplier: dec!(-1),
                ..rule(1, 0)
            }
            .validate(),
            Err(RuleError::NegativeMultiplier { .. })
        ));
        assert!(matches!(
            ConversionRule {
                monthly_cap: Some(0),
                ..rule(1, 0)
            }
            .validate(),
            Err(RuleError::NonPositiveCap { .. })
        ));
        assert!(matches!(
            ConversionRule {
                valid_until: Some(now() - Duration::days(60)),
                ..rule(1, 0)
            }
            .validate(),
            Err(RuleError::InvertedWindow { .. })
        ));
        assert!(matches!(rule(1, -1).validate(), Err(RuleError::NegativePriority { .. })));
    }
}
