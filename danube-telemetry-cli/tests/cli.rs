use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("danube-telemetry").expect("binary exists");
    cmd.env("RUST_LOG", "error");
    cmd
}

#[test]
fn plan_default_span_uses_min_step() {
    cli()
        .args(["plan", "--span", "30m", "--min-step", "30s"])
        .assert()
        .success()
        .stdout(contains("samples: 60"))
        .stdout(contains("step:    30000ms"));
}

#[test]
fn plan_explicit_samples_win() {
    cli()
        .args(["plan", "--span", "1h", "--samples", "300"])
        .assert()
        .success()
        .stdout(contains("samples: 300"))
        .stdout(contains("step:    12000ms"));
}

#[test]
fn plan_rejects_unknown_unit() {
    cli()
        .args(["plan", "--span", "5x"])
        .assert()
        .failure()
        .stderr(contains("unknown unit"));
}

#[test]
fn options_lists_offered_choices() {
    cli()
        .arg("options")
        .assert()
        .success()
        .stdout(contains("refresh: off, 15s, 30s, 1m, 5m, 15m"))
        .stdout(contains("1h"))
        .stdout(contains("(default 30m)"));
}

#[test]
fn watch_rejects_empty_broker_name() {
    cli()
        .args(["watch", "", "--namespace", "ns1", "--once"])
        .assert()
        .failure();
}
