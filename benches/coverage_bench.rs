use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rfsmoke::coverage::RuleUsage;
use rfsmoke::CoverageReport;

// A stylesheet of a few thousand rules with every third one used
fn large_sheet() -> (String, Vec<RuleUsage>) {
    let mut text = String::new();
    let mut usage = Vec::new();
    for i in 0..5_000 {
        let start = text.len();
        text.push_str(&format!(".rule-{}{{color:#{:06x}}}\n", i, i));
        usage.push(RuleUsage { start, end: text.len(), used: i % 3 == 0 });
    }
    (text, usage)
}

fn bench_from_rule_usage(c: &mut Criterion) {
    let (text, usage) = large_sheet();
    c.bench_function("coverage_from_rule_usage", |b| {
        b.iter(|| CoverageReport::from_rule_usage("http://localhost/main.css", black_box(text.clone()), black_box(&usage)))
    });
}

fn bench_usage_percent(c: &mut Criterion) {
    let (text, usage) = large_sheet();
    let report = CoverageReport::from_rule_usage("http://localhost/main.css", text, &usage);
    c.bench_function("coverage_usage_percent", |b| b.iter(|| black_box(&report).usage_percent()));
}

criterion_group!(benches, bench_from_rule_usage, bench_usage_percent);
criterion_main!(benches);
