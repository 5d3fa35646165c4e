//! # Points Calculator
//!
//! ```text
//! points = trunc(value × multiplier × (1 + extra_multiplier))
//! ```
//!
//! then clamped, in order, by the campaign's per-transaction cap and the
//! conversion rule's monthly cap. The monthly cap needs the points already
//! accrued this month; that figure is an input here, never computed.
//!
//! Missing or negative inputs give zero points. The calculator does not
//! fail.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{DEFAULT_EXTRA_MULTIPLIER, DEFAULT_MULTIPLIER};

/// Which cap, if any, cut the result down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clamp {
    CampaignCap,
    MonthlyCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    /// Before any cap.
    pub base_points: i64,
    /// What should be credited.
    pub points: i64,
    pub clamped_by: Option<Clamp>,
}

/// Builder for one calculation.
///
/// ```
/// use loyalty_engine::rules::PointsCalculator;
/// use rust_decimal::Decimal;
///
/// let calc = PointsCalculator::new(Some(Decimal::new(10000, 2)))
///     .multiplier(Some(Decimal::new(20, 1)))
///     .extra_multiplier(Some(Decimal::new(5, 1)))
///     .calculate();
/// assert_eq!(calc.points, 300);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsCalculator {
    value: Option<Decimal>,
    multiplier: Option<Decimal>,
    extra_multiplier: Option<Decimal>,
    campaign_cap: Option<i64>,
    monthly_cap: Option<i64>,
    month_to_date: i64,
}

impl PointsCalculator {
    pub fn new(value: Option<Decimal>) -> Self {
        Self {
            value,
            multiplier: None,
            extra_multiplier: None,
            campaign_cap: None,
            monthly_cap: None,
            month_to_date: 0,
        }
    }

    /// `None` means no rule resolved; the default multiplier applies.
    pub fn multiplier(mut self, multiplier: Option<Decimal>) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// `None` means no campaign resolved; no bonus applies.
    pub fn extra_multiplier(mut self, extra: Option<Decimal>) -> Self {
        self.extra_multiplier = extra;
        self
    }

    pub fn campaign_cap(mut self, cap: Option<i64>) -> Self {
        self.campaign_cap = cap;
        self
    }

    /// `month_to_date` is what was already accrued this month.
    pub fn monthly_cap(mut self, cap: Option<i64>, month_to_date: i64) -> Self {
        self.monthly_cap = cap;
        self.month_to_date = month_to_date;
        self
    }

    fn base_points(&self) -> i64 {
        let value = match self.value {
            Some(v) if v > Decimal::ZERO => v,
            _ => return 0,
        };
        let multiplier = self.multiplier.unwrap_or(DEFAULT_MULTIPLIER);
        let extra = self.extra_multiplier.unwrap_or(DEFAULT_EXTRA_MULTIPLIER);
        if multiplier < Decimal::ZERO || extra < Decimal::ZERO {
            return 0;
        }

        let product = Decimal::ONE
            .checked_add(extra)
            .and_then(|factor| value.checked_mul(multiplier)?.checked_mul(factor));
        match product.and_then(|p| p.trunc().to_i64()) {
            Some(points) => points,
            None => {
                warn!(%value, %multiplier, %extra, "points calculation overflowed, awarding zero");
                0
            }
        }
    }

    pub fn calculate(&self) -> Calculation {
        let base_points = self.base_points();
        let mut points = base_points;
        let mut clamped_by = None;

        if let Some(cap) = self.campaign_cap.filter(|cap| *cap > 0) {
            if points > cap {
                points = cap;
                clamped_by = Some(Clamp::CampaignCap);
            }
        }

        if let Some(cap) = self.monthly_cap.filter(|cap| *cap > 0) {
            let headroom = cap.saturating_sub(self.month_to_date.max(0)).max(0);
            if points > headroom {
                points = headroom;
                clamped_by = Some(Clamp::MonthlyCap);
            }
        }

        Calculation {
            base_points,
            points,
            clamped_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn multiplier_and_campaign_compose() {
        let calc = PointsCalculator::new(Some(dec!(100.00)))
            .multiplier(Some(dec!(2.0)))
            .extra_multiplier(Some(dec!(0.5)))
            .calculate();
        assert_eq!(calc.points, 300);
        assert_eq!(calc.clamped_by, None);
    }

    #[test]
    fn defaults_when_nothing_resolved() {
        let calc = PointsCalculator::new(Some(dec!(87.99))).calculate();
        assert_eq!(calc.points, 87);
    }

    #[test]
    fn truncates_never_rounds_up() {
        let calc = PointsCalculator::new(Some(dec!(10.00)))
            .multiplier(Some(dec!(0.3333)))
            .calculate();
        // 3.333 → 3
        assert_eq!(calc.points, 3);
        let calc = PointsCalculator::new(Some(dec!(1.99))).calculate();
        assert_eq!(calc.points, 1);
    }

    #[test]
    fn missing_or_negative_inputs_give_zero() {
        assert_eq!(PointsCalculator::new(None).calculate().points, 0);
        assert_eq!(PointsCalculator::new(Some(dec!(-50))).calculate().points, 0);
        assert_eq!(
            PointsCalculator::new(Some(dec!(50)))
                .multiplier(Some(dec!(-1)))
                .calculate()
                .points,
            0
        );
        assert_eq!(
            PointsCalculator::new(Some(dec!(50)))
                .extra_multiplier(Some(dec!(-0.5)))
                .calculate()
                .points,
            0
        );
    }

    #[test]
    fn campaign_cap_applies_first() {
        let calc = PointsCalculator::new(Some(dec!(1000)))
            .multiplier(Some(dec!(2)))
            .campaign_cap(Some(500))
            .calculate();
        assert_eq!(calc.base_points, 2000);
        assert_eq!(calc.points, 500);
        assert_eq!(calc.clamped_by, Some(Clamp::CampaignCap));
    }

    #[test]
    fn monthly_cap_clamps_to_headroom() {
        let calc = PointsCalculator::new(Some(dec!(300)))
            .monthly_cap(Some(1000), 900)
            .calculate();
        assert_eq!(calc.points, 100);
        assert_eq!(calc.clamped_by, Some(Clamp::MonthlyCap));

        let exhausted = PointsCalculator::new(Some(dec!(300)))
            .monthly_cap(Some(1000), 1200)
            .calculate();
        assert_eq!(exhausted.points, 0);

        let room = PointsCalculator::new(Some(dec!(300)))
            .monthly_cap(Some(1000), 100)
            .calculate();
        assert_eq!(room.points, 300);
        assert_eq!(room.clamped_by, None);
    }

    #[test]
    fn both_caps() {
        let calc = PointsCalculator::new(Some(dec!(1000)))
            .campaign_cap(Some(600))
            .monthly_cap(Some(1000), 700)
            .calculate();
        assert_eq!(calc.points, 300);
        assert_eq!(calc.clamped_by, Some(Clamp::MonthlyCap));
    }

    #[test]
    fn overflow_awards_zero() {
        let calc = PointsCalculator::new(Some(Decimal::MAX))
            .multiplier(Some(dec!(10)))
            .calculate();
        assert_eq!(calc.points, 0);
    }
}
