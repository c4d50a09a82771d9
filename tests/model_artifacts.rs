use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use urlguard_engine::{
    classifier::{ArtifactPaths, ClassifierAdapter},
    config::ScorePath,
    DecisionEngine, EngineError, Outcome, Settings,
};

fn shipped(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("artifacts").join(name)
}

fn shipped_paths() -> ArtifactPaths {
    ArtifactPaths {
        model: shipped("model.json"),
        normalizer: shipped("normalizer.json"),
        model_sha256: None,
        normalizer_sha256: None,
    }
}

fn temp_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("urlguard-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

fn settings_for(mode: &str, authority: Option<&str>) -> Settings {
    let mut toml = format!("[scoring]\nmode = \"{mode}\"\n");
    if let Some(authority) = authority {
        toml.push_str(&format!("authority = \"{authority}\"\n"));
    }
    toml.push_str(&format!(
        "[model]\nmodel_path = {:?}\nnormalizer_path = {:?}\n",
        shipped("model.json"),
        shipped("normalizer.json")
    ));
    Settings::from_toml(&toml).unwrap()
}

#[test]
fn shipped_artifacts_load() {
    let adapter = ClassifierAdapter::load(&shipped_paths()).unwrap();
    assert_eq!(adapter.kind(), "logistic");
    assert_eq!(adapter.model_version(), "lexical-logit-2024.1");
}

#[test]
fn pinned_digest_must_match() {
    let bytes = std::fs::read(shipped("model.json")).unwrap();
    let digest = hex::encode(Sha256::digest(&bytes));

    let mut paths = shipped_paths();
    paths.model_sha256 = Some(digest.to_uppercase());
    assert!(ClassifierAdapter::load(&paths).is_ok());

    paths.model_sha256 = Some("00".repeat(32));
    assert!(matches!(
        ClassifierAdapter::load(&paths),
        Err(EngineError::Artifact { .. })
    ));
}

#[test]
fn normalizer_of_another_width_is_a_shape_mismatch() {
    let normalizer = temp_file(
        r#"{"version": "old", "n_features": 3, "kind": "min_max", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 1.0]}"#,
    );
    let mut paths = shipped_paths();
    paths.normalizer = normalizer.clone();

    let result = ClassifierAdapter::load(&paths);
    std::fs::remove_file(normalizer).ok();
    assert!(matches!(
        result,
        Err(EngineError::ShapeMismatch { expected: 16, actual: 3 })
    ));
}

#[test]
fn normalizer_defects_name_the_normalizer_file() {
    let normalizer = temp_file(
        r#"{"version": "bad", "n_features": 16, "kind": "standard", "mean": [0.0, 0.0], "scale": [1.0]}"#,
    );
    let mut paths = shipped_paths();
    paths.normalizer = normalizer.clone();

    let result = ClassifierAdapter::load(&paths);
    std::fs::remove_file(&normalizer).ok();
    match result {
        Err(EngineError::Artifact { path, .. }) => assert_eq!(path, normalizer),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unreadable_artifact_is_reported_with_its_path() {
    let mut paths = shipped_paths();
    paths.model = shipped("does-not-exist.json");
    match ClassifierAdapter::load(&paths) {
        Err(EngineError::Artifact { path, .. }) => assert_eq!(path, shipped("does-not-exist.json")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn classifier_mode_scores_with_the_model() {
    let engine = DecisionEngine::from_settings(&settings_for("classifier", None)).unwrap();
    let verdict = engine.decide("http://paypal.secure-login.xyz/verify?acct=1").unwrap();

    let scores = verdict.scores.unwrap();
    assert_eq!(scores.authority, ScorePath::Classifier);
    assert!(scores.heuristic.is_none());
    assert_eq!(scores.classifier, Some(verdict.trust));
    assert!(verdict.breakdown.is_empty());
    assert!(verdict
        .rationale
        .last()
        .unwrap()
        .starts_with("Classifier (logistic lexical-logit-2024.1)"));
}

#[test]
fn both_mode_reports_both_scores_and_follows_authority() {
    let engine =
        DecisionEngine::from_settings(&settings_for("both", Some("heuristic"))).unwrap();
    let verdict = engine.decide("http://example.com").unwrap();

    assert_eq!(verdict.outcome, Outcome::Scored);
    let scores = verdict.scores.unwrap();
    assert_eq!(scores.authority, ScorePath::Heuristic);
    assert_eq!(scores.heuristic, Some(verdict.trust));
    assert!(scores.classifier.is_some());
    assert!(scores.phishing_probability.is_some());
}

#[test]
fn both_mode_without_authority_fails_at_startup() {
    let result = DecisionEngine::from_settings(&settings_for("both", None));
    assert!(matches!(result, Err(EngineError::Configuration(_))));
}
