//! Every fixture skill ships a valid manifest.

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use skillrun_core::load_manifest;
use skillrun_core::manifest::RiskLevel;

#[tokio::test]
async fn test_fixture_manifests_load() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    for name in ["echo", "timeout", "egress", "failing", "bad-output"] {
        let manifest = load_manifest(&root.join(name))
            .await
            .unwrap_or_else(|e| panic!("fixture {name}: {e}"));
        assert_eq!(manifest.name, format!("{name}-fixture"));
        assert_eq!(manifest.risk_level, RiskLevel::Low);
    }
}

#[tokio::test]
async fn test_egress_fixture_declares_one_domain() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let manifest = load_manifest(&root.join("egress")).await.unwrap();
    let domains: Vec<&str> = manifest.egress().iter().map(|r| r.domain.as_str()).collect();
    assert_eq!(domains, vec!["example.com"]);
}
