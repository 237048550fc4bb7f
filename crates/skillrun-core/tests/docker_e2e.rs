//! End-to-end tests against a real docker daemon.
//!
//! Ignored by default. Run on a host with docker:
//!
//! ```sh
//! cargo test -p skillrun-core --test docker_e2e -- --ignored
//! ```
//!
//! The egress test additionally needs outbound internet access.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use skillrun_config::ExecutionOptions;
use skillrun_core::{DockerEngine, ProcessEngine, SkillInput, SkillRunner};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn runner() -> SkillRunner {
    SkillRunner::new(
        ExecutionOptions::default()
            .with_image_prefix("skillrun-e2e-")
            .with_timeout_seconds(60),
    )
}

fn input(name: &str, data: Value) -> SkillInput {
    let Value::Object(map) = data else {
        panic!("fixture input must be an object");
    };
    SkillInput::new(fixture(name), map)
}

#[test_log::test(tokio::test)]
#[ignore = "requires docker"]
async fn test_echo_fixture() {
    let data = json!({"city": "Porto", "nights": 3});
    let output = runner().execute(&input("echo", data.clone()), None).await.unwrap();

    assert!(output.success);
    assert_eq!(output.data.get("echo"), Some(&data));
    assert_eq!(output.data.get("skill"), Some(&json!("echo-fixture")));
    assert_eq!(output.metadata.skill_name, "echo-fixture");
}

#[test_log::test(tokio::test)]
#[ignore = "requires docker"]
async fn test_timeout_fixture_is_reaped() {
    let runner = runner();
    // Build outside the timed run.
    runner
        .image_cache()
        .ensure(
            &DockerEngine::default(),
            "skillrun-e2e-timeout-fixture:1.0.0",
            &fixture("timeout"),
            "timeout-fixture",
        )
        .await
        .unwrap();

    let options = ExecutionOptions::default().with_timeout_seconds(2);
    let started = Instant::now();
    let err = runner
        .execute(&input("timeout", json!({})), Some(&options))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(30));

    let skillrun_core::RunnerError::Timeout { container, .. } = err else {
        unreachable!();
    };
    let inspect = tokio::process::Command::new("docker")
        .args(["inspect", &container])
        .output()
        .await
        .unwrap();
    assert!(!inspect.status.success(), "container {container} still exists");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failing_fixture_reports_exit_code() {
    let err = runner()
        .execute(&input("failing", json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert!(err.to_string().contains("upstream unavailable"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_bad_output_fixture() {
    let err = runner()
        .execute(&input("bad-output", json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OUTPUT_PARSE");
}

#[test_log::test(tokio::test)]
#[ignore = "requires docker and internet access"]
async fn test_egress_fixture_allowlist() {
    let data = json!({"targets": ["https://example.com", "https://example.org"]});
    let output = runner().execute(&input("egress", data), None).await.unwrap();

    let results: Vec<Map<String, Value>> =
        serde_json::from_value(output.data["results"].clone()).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["reachable"], json!(true));
    assert_eq!(results[1]["reachable"], json!(false));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_engine_network_round_trip() {
    let engine = DockerEngine::default();
    let name = "skill-net-e2e-probe";
    engine.create_network(name, "e2e").await.unwrap();
    engine.remove_network(name).await.unwrap();
    assert!(engine.remove_network(name).await.is_err());
}
