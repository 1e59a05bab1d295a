use std::collections::BTreeMap;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use keyward::warden::condition::RawCondition;
use keyward::warden::engine::{AccessRequest, Effect, Policy, Role, evaluate};
use serde_json::{Map, Value, json};

// CI-friendly benchmark configuration
fn is_ci_mode() -> bool {
    std::env::var("CI").is_ok() || std::env::var("QUICK_BENCH").is_ok()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn policies(count: usize) -> Vec<Policy> {
    let no_conditions = BTreeMap::new();
    let mut cidr = BTreeMap::new();
    let mut options = Map::new();
    options.insert("cidr".into(), Value::String("10.0.0.0/8".into()));
    cidr.insert(
        "remoteIPAddress".to_string(),
        RawCondition {
            kind: "CIDRCondition".into(),
            options,
        },
    );

    (0..count)
        .map(|i| {
            let conditions = if i % 4 == 0 { &cidr } else { &no_conditions };
            Policy::compile(
                &format!("policy-{i}"),
                &[format!("users:<[a-z]+{i}>"), format!("role:team-{i}")],
                &strings(&["<get|list|update>"]),
                &[format!("projects:{i}:<.*>")],
                if i % 10 == 0 { Effect::Deny } else { Effect::Allow },
                conditions,
            )
            .unwrap()
        })
        .collect()
}

fn roles(count: usize) -> Vec<Role> {
    (0..count)
        .map(|i| Role {
            id: format!("role:team-{i}"),
            members: (0..20).map(|m| format!("member-{m}")).collect(),
        })
        .collect()
}

fn request(subject: &str, resource: &str) -> AccessRequest {
    let context = json!({ "remoteIPAddress": "10.1.2.3" });
    AccessRequest {
        subject: subject.into(),
        action: "update".into(),
        resource: resource.into(),
        context: context.as_object().cloned().unwrap_or_default(),
    }
}

fn benchmark_policy_compilation(c: &mut Criterion) {
    c.bench_function("policy_compile", |b| {
        let conditions = BTreeMap::new();
        b.iter(|| {
            let policy = Policy::compile(
                black_box("articles-editors"),
                &strings(&["<.*>", "role:editors"]),
                &strings(&["<get|update|delete>"]),
                &strings(&["articles:<[0-9]+>"]),
                Effect::Allow,
                &conditions,
            );
            black_box(policy)
        });
    });
}

fn benchmark_evaluation(c: &mut Criterion) {
    let sizes: &[usize] = if is_ci_mode() { &[10, 100] } else { &[10, 100, 1000] };
    let mut group = c.benchmark_group("evaluate");

    for &size in sizes {
        let policies = policies(size);
        let roles = roles(size / 10 + 1);
        let last = size - 1;

        // Only the last policy matches, so every policy is tried.
        let direct = request(&format!("users:abc{last}"), &format!("projects:{last}:board"));
        group.bench_with_input(BenchmarkId::new("direct_subject", size), &direct, |b, req| {
            b.iter(|| black_box(evaluate(&policies, &roles, black_box(req))));
        });

        let via_role = request("member-3", "projects:1:board");
        group.bench_with_input(BenchmarkId::new("role_member", size), &via_role, |b, req| {
            b.iter(|| black_box(evaluate(&policies, &roles, black_box(req))));
        });

        let unmatched = request("nobody", "nothing");
        group.bench_with_input(BenchmarkId::new("default_deny", size), &unmatched, |b, req| {
            b.iter(|| black_box(evaluate(&policies, &roles, black_box(req))));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_policy_compilation, benchmark_evaluation);
criterion_main!(benches);
