use cligate::backends::{openshift, openstack};
use cligate::config::{OpenShiftConfig, OpenStackConfig};
use cligate::gateway::CommandParser;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn bench_policy(c: &mut Criterion) {
    let openstack = openstack::policy_engine(&OpenStackConfig::default())
        .expect("Failed to build OpenStack policy for benchmark");
    let openshift = openshift::policy_engine(&OpenShiftConfig::default())
        .expect("Failed to build OpenShift policy for benchmark");

    let verb_allowed = args("server list --long --format json");
    let verb_blocked = args("baremetal node passthru call node-1 method");
    let prefix_allowed = args("adm policy who-can get pods -n openshift-etcd");
    let global_arg = args("get pods --kubeconfig=/tmp/other");

    // Verb strategy scans every window of the bare words
    c.bench_function("policy_verb_allowed", |b| {
        b.iter(|| black_box(openstack.check(black_box(&verb_allowed))))
    });
    c.bench_function("policy_verb_blocked", |b| {
        b.iter(|| black_box(openstack.check(black_box(&verb_blocked))))
    });

    c.bench_function("policy_prefix_allowed", |b| {
        b.iter(|| black_box(openshift.check(black_box(&prefix_allowed))))
    });
    c.bench_function("policy_global_arg_rejected", |b| {
        b.iter(|| black_box(openshift.check(black_box(&global_arg))))
    });
}

fn bench_parse(c: &mut Criterion) {
    let parser = CommandParser::new("oc");
    c.bench_function("parse_quoted_command", |b| {
        b.iter(|| {
            black_box(parser.parse(black_box(
                r#"oc get pods -n "my project" -o jsonpath='{.items[*].metadata.name}'"#,
            )))
        })
    });
}

criterion_group!(benches, bench_policy, bench_parse);
criterion_main!(benches);
