use crate::{
    error::EngineError,
    features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES, FEATURE_SCHEMA},
};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// Contract every swappable classifier satisfies.
pub trait Classifier: Send + Sync {
    /// Probability of the phishing class for an already-normalized vector.
    fn predict_proba(&self, features: &[f64]) -> f64;

    fn n_features(&self) -> usize;

    fn kind(&self) -> &'static str;
}

/// Normalization fitted offline and stored alongside the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    MinMax { min: Vec<f64>, max: Vec<f64> },
}

impl Normalizer {
    pub fn n_features(&self) -> usize {
        match self {
            Normalizer::Standard { mean, .. } => mean.len(),
            Normalizer::MinMax { min, .. } => min.len(),
        }
    }

    fn check(&self) -> Result<(), String> {
        let (a, b) = match self {
            Normalizer::Standard { mean, scale } => (mean, scale),
            Normalizer::MinMax { min, max } => (min, max),
        };
        if a.len() != b.len() {
            return Err(format!("parameter lengths differ ({} vs {})", a.len(), b.len()));
        }
        if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
            return Err("parameters must be finite".to_string());
        }
        Ok(())
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        match self {
            Normalizer::Standard { mean, scale } => values
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| {
                    // zero variance columns are centered but not scaled
                    let s = if *s == 0.0 { 1.0 } else { *s };
                    (x - m) / s
                })
                .collect(),
            Normalizer::MinMax { min, max } => values
                .iter()
                .zip(min.iter().zip(max))
                .map(|(x, (lo, hi))| {
                    let range = hi - lo;
                    if range == 0.0 {
                        0.0
                    } else {
                        (x - lo) / range
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerArtifact {
    pub version: String,
    pub n_features: usize,
    #[serde(flatten)]
    pub normalizer: Normalizer,
}

/// Logistic regression over normalized features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        let w = DVector::from_column_slice(&self.coefficients);
        let x = DVector::from_column_slice(features);
        let z = self.intercept + w.dot(&x);
        1.0 / (1.0 + (-z).exp())
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn kind(&self) -> &'static str {
        "logistic"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Fraction of phishing samples that reached this leaf.
        probability: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walks from the root; `x[feature] <= threshold` goes left.
    fn leaf_probability(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { probability } => return *probability,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Children must come after their parent so every walk terminates.
    fn check(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {} splits on feature {} of {}", i, feature, n_features));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", i));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", i, child));
                        }
                    }
                }
                TreeNode::Leaf { probability } => {
                    if !(0.0..=1.0).contains(probability) {
                        return Err(format!("leaf {} probability {} outside [0, 1]", i, probability));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Averaged decision-tree ensemble (random forest style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub n_features: usize,
    pub trees: Vec<DecisionTree>,
}

impl Classifier for ForestModel {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.leaf_probability(features)).sum();
        total / self.trees.len() as f64
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> &'static str {
        "forest"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Logistic(LogisticModel),
    Forest(ForestModel),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub feature_schema: String,
    pub n_features: usize,
    #[serde(default)]
    pub feature_order: Option<Vec<String>>,
    pub model: ModelSpec,
}

impl ModelArtifact {
    fn into_classifier(self) -> Result<Box<dyn Classifier>, String> {
        if self.feature_schema != FEATURE_SCHEMA {
            return Err(format!(
                "fitted on feature schema {:?}, extractor produces {:?}",
                self.feature_schema, FEATURE_SCHEMA
            ));
        }
        if let Some(order) = &self.feature_order {
            if !order.iter().map(String::as_str).eq(FEATURE_NAMES.iter().copied()) {
                return Err("feature_order differs from the extractor's feature order".to_string());
            }
        }

        let classifier: Box<dyn Classifier> = match self.model {
            ModelSpec::Logistic(model) => {
                if model.coefficients.iter().any(|c| !c.is_finite()) || !model.intercept.is_finite() {
                    return Err("logistic parameters must be finite".to_string());
                }
                Box::new(model)
            }
            ModelSpec::Forest(model) => {
                if model.trees.is_empty() {
                    return Err("forest has no trees".to_string());
                }
                for (i, tree) in model.trees.iter().enumerate() {
                    tree.check(model.n_features).map_err(|e| format!("tree {}: {}", i, e))?;
                }
                Box::new(model)
            }
        };

        if classifier.n_features() != self.n_features {
            return Err(format!(
                "declares {} features but the {} model has {}",
                self.n_features,
                classifier.kind(),
                classifier.n_features()
            ));
        }
        Ok(classifier)
    }
}

/// Where to find the two artifacts and, optionally, their pinned digests.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub normalizer: PathBuf,
    pub model_sha256: Option<String>,
    pub normalizer_sha256: Option<String>,
}

/// Read-only pairing of a fitted normalizer and classifier.
pub struct ClassifierAdapter {
    normalizer: Normalizer,
    classifier: Box<dyn Classifier>,
    model_version: String,
    normalizer_version: String,
    n_features: usize,
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("kind", &self.classifier.kind())
            .field("model_version", &self.model_version)
            .field("normalizer_version", &self.normalizer_version)
            .field("n_features", &self.n_features)
            .finish()
    }
}

impl ClassifierAdapter {
    pub fn load(paths: &ArtifactPaths) -> Result<Self, EngineError> {
        let normalizer: NormalizerArtifact =
            read_artifact(&paths.normalizer, paths.normalizer_sha256.as_deref())?;
        let model: ModelArtifact = read_artifact(&paths.model, paths.model_sha256.as_deref())?;

        let adapter = Self::build(normalizer, model, &paths.normalizer, &paths.model)?;

        info!(
            "Loaded {} classifier {} with normalizer {}",
            adapter.classifier.kind(),
            adapter.model_version,
            adapter.normalizer_version
        );
        Ok(adapter)
    }

    pub fn from_artifacts(
        normalizer: NormalizerArtifact,
        model: ModelArtifact,
    ) -> Result<Self, EngineError> {
        Self::build(
            normalizer,
            model,
            Path::new("<in-memory normalizer>"),
            Path::new("<in-memory model>"),
        )
    }

    fn build(
        normalizer: NormalizerArtifact,
        model: ModelArtifact,
        normalizer_path: &Path,
        model_path: &Path,
    ) -> Result<Self, EngineError> {
        let reject_normalizer = |reason: String| EngineError::artifact(normalizer_path, reason);
        let reject_model = |reason: String| EngineError::artifact(model_path, reason);

        normalizer.normalizer.check().map_err(reject_normalizer)?;
        if normalizer.normalizer.n_features() != normalizer.n_features {
            return Err(reject_normalizer(format!(
                "normalizer declares {} features but has {} parameters",
                normalizer.n_features,
                normalizer.normalizer.n_features()
            )));
        }
        if normalizer.n_features != model.n_features {
            return Err(EngineError::ShapeMismatch {
                expected: model.n_features,
                actual: normalizer.n_features,
            });
        }
        if model.n_features != FEATURE_COUNT {
            return Err(EngineError::ShapeMismatch {
                expected: FEATURE_COUNT,
                actual: model.n_features,
            });
        }

        let model_version = model.version.clone();
        let n_features = model.n_features;
        let classifier = model.into_classifier().map_err(reject_model)?;

        Ok(Self {
            normalizer: normalizer.normalizer,
            classifier,
            model_version,
            normalizer_version: normalizer.version,
            n_features,
        })
    }

    /// Probability that the URL behind `vector` is phishing.
    pub fn predict(&self, vector: &FeatureVector) -> Result<f64, EngineError> {
        if vector.len() != self.n_features {
            return Err(EngineError::ShapeMismatch {
                expected: self.n_features,
                actual: vector.len(),
            });
        }

        let normalized = self.normalizer.transform(vector.as_slice());
        let probability = self.classifier.predict_proba(&normalized);
        if !probability.is_finite() {
            return Err(EngineError::Internal(format!(
                "{} classifier produced a non-finite probability",
                self.classifier.kind()
            )));
        }
        Ok(probability.clamp(0.0, 1.0))
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }
}

/// Trust score implied by a phishing probability.
pub fn trust_from_probability(probability: f64) -> u8 {
    ((1.0 - probability) * 100.0).round().clamp(0.0, 100.0) as u8
}

fn read_artifact<T: serde::de::DeserializeOwned>(
    path: &Path,
    pinned_sha256: Option<&str>,
) -> Result<T, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::artifact(path, e))?;
    let digest = hex::encode(Sha256::digest(&bytes));
    info!("Read artifact {:?} (sha256 {})", path, digest);

    if let Some(expected) = pinned_sha256 {
        if !expected.trim().eq_ignore_ascii_case(&digest) {
            return Err(EngineError::artifact(
                path,
                format!("sha256 {} does not match pinned {}", digest, expected.trim()),
            ));
        }
    }

    serde_json::from_slice(&bytes).map_err(|e| EngineError::artifact(path, e))
}
