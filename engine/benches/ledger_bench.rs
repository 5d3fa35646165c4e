// Ledger and rule-resolution benchmarks.
//
// Covers conversion rule resolution over growing candidate sets, full
// transaction scoring, and credit throughput on both storage backends.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;

use loyalty_engine::rules::{CampaignBonus, ConversionRule, ConversionRuleResolver, RuleQuery};
use loyalty_engine::storage::{LoyaltyDb, MemoryLedgerStore};
use loyalty_engine::{BalanceKey, Ledger, OpContext, ScoringInput, TransactionScorer};

/// `n` rules spread over every scope, all valid now.
fn make_rules(n: u64) -> Vec<ConversionRule> {
    let since = Utc::now() - Duration::days(30);
    (0..n)
        .map(|i| {
            let mut rule = ConversionRule::general(i, format!("rule {i}"), Decimal::new(15, 1), since);
            rule.priority = (i % 5) as i32;
            match i % 4 {
                0 => rule.mcc_pattern = Some(format!("5{:03}", i % 1000)),
                1 => rule.category = Some(format!("category-{}", i % 20)),
                2 => rule.partner_id = Some(i % 50),
                _ => {}
            }
            rule
        })
        .collect()
}

fn bench_rule_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("rules/resolve");
    for n in [10u64, 100, 1_000] {
        let resolver = ConversionRuleResolver::new(make_rules(n));
        let query = RuleQuery::at(Utc::now())
            .mcc("5812")
            .category("category-3")
            .partner(7);
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &query, |b, q| {
            b.iter(|| resolver.resolve(q));
        });
    }
    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let campaigns = vec![CampaignBonus::new(1, "promo", Decimal::new(5, 1), since.date_naive())];
    let scorer = TransactionScorer::new(make_rules(100), campaigns);
    let input = ScoringInput {
        category: Some("category-3".into()),
        ..ScoringInput::new(Decimal::new(12_345, 2), Utc::now())
    };

    c.bench_function("scoring/score", |b| {
        b.iter(|| scorer.score(&input));
    });
}

fn bench_credit(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/credit");
    group.throughput(Throughput::Elements(1));

    let memory = Ledger::new(Arc::new(MemoryLedgerStore::new()));
    let ctx = OpContext::new();
    group.bench_function("memory", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            memory.credit(&ctx, BalanceKey::new(i % 64, 1), 10)
        });
    });

    let sled = Ledger::new(Arc::new(LoyaltyDb::open_temporary().expect("temp db")));
    group.bench_function("sled", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            sled.credit(&ctx, BalanceKey::new(i % 64, 1), 10)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_rule_resolution, bench_scoring, bench_credit);
criterion_main!(benches);
