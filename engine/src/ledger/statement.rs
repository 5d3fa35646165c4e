//! # Statements
//!
//! A statement lists a key's movements inside an optional date window,
//! optionally narrowed to one kind, one page at a time. Every line carries
//! the balance right after that movement, computed over the full history,
//! so filtering never distorts the running figures.
//!
//! Movements are ordered by `(created_at, id)`. Timestamps come from the
//! caller and need not follow id order, so the window and the running
//! balance share that one ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::balance::BalanceKey;
use super::movement::{Movement, MovementKind};
use crate::config::{DEFAULT_STATEMENT_PAGE_SIZE, MAX_STATEMENT_PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementQuery {
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    pub kind: Option<MovementKind>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for StatementQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            kind: None,
            page: 1,
            page_size: DEFAULT_STATEMENT_PAGE_SIZE,
        }
    }
}

impl StatementQuery {
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn normalized_page(&self) -> usize {
        self.page.max(1)
    }

    fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_STATEMENT_PAGE_SIZE)
    }

    fn before_window(&self, at: &DateTime<Utc>) -> bool {
        self.from.is_some_and(|from| *at < from)
    }

    fn after_window(&self, at: &DateTime<Utc>) -> bool {
        self.to.is_some_and(|to| *at > to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub movement: Movement,
    pub running_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub key: BalanceKey,
    /// Balance before the first movement of the window.
    pub opening_balance: i64,
    /// Balance after the last movement of the window.
    pub closing_balance: i64,
    pub lines: Vec<StatementLine>,
    pub page: usize,
    pub page_size: usize,
    /// Lines matching the query across all pages.
    pub total_lines: usize,
}

impl Statement {
    pub fn total_pages(&self) -> usize {
        self.total_lines.div_ceil(self.page_size)
    }

    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages()
    }

    /// Builds a statement from a key's full movement history, in any order.
    pub fn build(key: BalanceKey, history: &[Movement], query: &StatementQuery) -> Self {
        let page = query.normalized_page();
        let page_size = query.normalized_page_size();

        let mut ordered: Vec<&Movement> = history.iter().collect();
        ordered.sort_by_key(|m| (m.created_at, m.id));

        let mut running = 0i64;
        let mut opening_balance = 0i64;
        let mut closing_balance = 0i64;
        let mut matching = Vec::new();

        for movement in ordered {
            running = running.saturating_add(movement.amount);
            if query.before_window(&movement.created_at) {
                opening_balance = running;
                closing_balance = running;
                continue;
            }
            if query.after_window(&movement.created_at) {
                continue;
            }
            closing_balance = running;
            if query.kind.map_or(true, |kind| kind == movement.kind) {
                matching.push(StatementLine {
                    movement: movement.clone(),
                    running_balance: running,
                });
            }
        }

        let total_lines = matching.len();
        let lines = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Self {
            key,
            opening_balance,
            closing_balance,
            lines,
            page,
            page_size,
            total_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewMovement;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap()
    }

    fn history() -> Vec<Movement> {
        let key = BalanceKey::new(1, 1);
        vec![
            NewMovement::new(key, MovementKind::Accrual, 100).at(day(1)).into_movement(1),
            NewMovement::new(key, MovementKind::Accrual, 50).at(day(5)).into_movement(2),
            NewMovement::new(key, MovementKind::Redemption, -30)
                .redemption(1)
                .at(day(10))
                .into_movement(3),
            NewMovement::new(key, MovementKind::Expiration, -20).at(day(20)).into_movement(4),
        ]
    }

    #[test]
    fn full_history_runs_from_zero() {
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &StatementQuery::default());
        assert_eq!(s.opening_balance, 0);
        assert_eq!(s.closing_balance, 100);
        let running: Vec<i64> = s.lines.iter().map(|l| l.running_balance).collect();
        assert_eq!(running, vec![100, 150, 120, 100]);
        assert!(!s.has_next_page());
    }

    #[test]
    fn window_sets_opening_and_closing() {
        let query = StatementQuery::default().between(Some(day(4)), Some(day(12)));
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &query);
        assert_eq!(s.opening_balance, 100);
        assert_eq!(s.closing_balance, 120);
        assert_eq!(s.total_lines, 2);
    }

    #[test]
    fn kind_filter_keeps_true_running_balance() {
        let query = StatementQuery::default().kind(MovementKind::Redemption);
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &query);
        assert_eq!(s.lines.len(), 1);
        assert_eq!(s.lines[0].running_balance, 120);
        assert_eq!(s.closing_balance, 100);
    }

    #[test]
    fn pagination() {
        let query = StatementQuery::default().page(2, 3);
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &query);
        assert_eq!(s.total_lines, 4);
        assert_eq!(s.total_pages(), 2);
        assert_eq!(s.lines.len(), 1);
        assert_eq!(s.lines[0].movement.id, 4);

        let past_end = StatementQuery::default().page(5, 3);
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &past_end);
        assert!(s.lines.is_empty());
    }

    #[test]
    fn page_zero_and_oversized_pages_are_normalized() {
        let query = StatementQuery::default().page(0, 10_000);
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &query);
        assert_eq!(s.page, 1);
        assert_eq!(s.page_size, MAX_STATEMENT_PAGE_SIZE);
    }

    #[test]
    fn late_stamped_movement_is_placed_by_time() {
        let key = BalanceKey::new(1, 1);
        let mut movements = history();
        // Recorded last, but stamped inside the window.
        movements.push(
            NewMovement::new(key, MovementKind::Adjustment, 7)
                .at(day(6))
                .into_movement(5),
        );

        let query = StatementQuery::default().between(Some(day(4)), Some(day(12)));
        let s = Statement::build(key, &movements, &query);
        let ids: Vec<u64> = s.lines.iter().map(|l| l.movement.id).collect();
        assert_eq!(ids, vec![2, 5, 3]);

        let window_sum: i64 = s.lines.iter().map(|l| l.movement.amount).sum();
        assert_eq!(s.opening_balance + window_sum, s.closing_balance);
        assert_eq!(s.closing_balance, 127);
        assert_eq!(s.lines.last().unwrap().running_balance, 127);
    }

    #[test]
    fn empty_window() {
        let later = day(28) + Duration::days(1);
        let query = StatementQuery::default().between(Some(later), None);
        let s = Statement::build(BalanceKey::new(1, 1), &history(), &query);
        assert_eq!(s.opening_balance, 100);
        assert_eq!(s.closing_balance, 100);
        assert!(s.lines.is_empty());
    }
}
