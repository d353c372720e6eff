use chrono::Utc;
use circuit_gate::circuit_breaker::{BreakerConfig, BreakerRegistry, CallGate, Outcome};
use circuit_gate::config::GateConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

fn benchmark_evaluate_closed(c: &mut Criterion) {
    let registry = BreakerRegistry::new(BreakerConfig::default()).unwrap();
    let breaker = registry.get("claude-agent");
    let now = Utc::now();

    c.bench_function("evaluate_closed", |b| {
        b.iter(|| black_box(breaker.evaluate(black_box(now))))
    });
}

fn benchmark_evaluate_open(c: &mut Criterion) {
    let registry = BreakerRegistry::new(BreakerConfig::new(1, 60, 300)).unwrap();
    let breaker = registry.get("claude-agent");
    let now = Utc::now();
    breaker.report_outcome(now, Outcome::Failure, false);

    c.bench_function("evaluate_open", |b| {
        b.iter(|| black_box(breaker.evaluate(black_box(now))))
    });
}

fn benchmark_report_success(c: &mut Criterion) {
    let registry = BreakerRegistry::new(BreakerConfig::default()).unwrap();
    let breaker = registry.get("claude-agent");
    let now = Utc::now();

    c.bench_function("report_success", |b| {
        b.iter(|| breaker.report_outcome(black_box(now), Outcome::Success, false))
    });
}

fn benchmark_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_lookup");

    for num_breakers in [10, 100, 1000].iter() {
        let registry = BreakerRegistry::new(BreakerConfig::default()).unwrap();
        for i in 0..*num_breakers {
            registry.get(&format!("agent-{}", i));
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(num_breakers),
            num_breakers,
            |b, &_num| b.iter(|| black_box(registry.get("agent-5"))),
        );
    }
    group.finish();
}

fn benchmark_gate_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gate = CallGate::new(BreakerRegistry::new(BreakerConfig::default()).unwrap());

    c.bench_function("gate_execute_live", |b| {
        b.to_async(&runtime).iter(|| async {
            let response = gate
                .execute(
                    "claude-agent",
                    || async { Ok::<Value, String>(json!({"result": "ok"})) },
                    |_| async { Ok(json!({"result": null})) },
                )
                .await;
            black_box(response)
        })
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
default:
  failure_threshold: 3
  window_secs: 60
  cooldown_secs: 300
breakers:
  claude-agent:
    failure_threshold: 5
call_timeout_secs: 120
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(GateConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_evaluate_closed,
    benchmark_evaluate_open,
    benchmark_report_success,
    benchmark_registry_lookup,
    benchmark_gate_execute,
    benchmark_config_parsing
);
criterion_main!(benches);
