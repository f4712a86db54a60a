use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::Data;
use gbdt::gradient_boost::GBDT;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::tree::{RegressionTree, TreeFit, TreeParams, mean_of, normalize_importances};

pub const RANDOM_FOREST: &str = "random_forest";
pub const GRADIENT_BOOSTING: &str = "gradient_boosting";
pub const STOCHASTIC_GRADIENT_BOOSTING: &str = "stochastic_gradient_boosting";

pub const DEFAULT_SEED: u64 = 42;

/// Anything that maps an ordered feature vector to P(label = 1).
pub trait ProbabilityModel {
    fn predict_proba(&self, row: &[f64]) -> f64;
    fn n_features(&self) -> usize;
}

/// One tunable hyperparameter of a learner kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
    pub doc: &'static str,
}

impl ParamSpec {
    const fn int(name: &'static str, default: f64, min: f64, max: f64, doc: &'static str) -> Self {
        Self {
            name,
            default,
            min,
            max,
            integer: true,
            doc,
        }
    }

    const fn real(name: &'static str, default: f64, min: f64, max: f64, doc: &'static str) -> Self {
        Self {
            name,
            default,
            min,
            max,
            integer: false,
            doc,
        }
    }
}

/// A learner as requested by the caller: display name, registry kind and overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl LearnerConfig {
    pub fn new(kind: &str) -> Self {
        Self::named(kind, kind)
    }

    pub fn named(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            params: BTreeMap::new(),
            seed: None,
        }
    }

    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Random forest plus gradient boosting, the pair every target trains by default.
pub fn default_learners() -> Vec<LearnerConfig> {
    vec![
        LearnerConfig::new(RANDOM_FOREST),
        LearnerConfig::new(GRADIENT_BOOSTING),
    ]
}

/// Schema defaults merged with validated overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    values: BTreeMap<String, f64>,
    seed: u64,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn count(&self, name: &str) -> usize {
        self.get(name).max(0.0) as usize
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name) >= 0.5
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

/// Labelled training rows for one target.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub target: &'a str,
    pub x: &'a [Vec<f64>],
    pub y: &'a [u8],
}

impl TrainingData<'_> {
    pub fn n_features(&self) -> usize {
        self.x.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn positives(&self) -> usize {
        self.y.iter().filter(|v| **v == 1).count()
    }

    /// Fails unless both classes are present.
    pub fn require_two_classes(&self) -> PipelineResult<()> {
        if self.x.len() != self.y.len() {
            return Err(PipelineError::Config(format!(
                "{} feature rows but {} labels",
                self.x.len(),
                self.y.len()
            )));
        }
        let pos = self.positives();
        if pos == 0 || pos == self.y.len() {
            return Err(PipelineError::insufficient(
                self.target,
                format!(
                    "training labels contain a single class ({} rows, {pos} positive)",
                    self.y.len()
                ),
            ));
        }
        Ok(())
    }
}

pub type FitFn = fn(&TrainingData<'_>, &ResolvedParams) -> PipelineResult<FittedModel>;

pub struct LearnerFactory {
    pub kind: &'static str,
    pub schema: Vec<ParamSpec>,
    pub fit: FitFn,
}

/// Learner kinds by name. New kinds register a schema and a fit function; the
/// blender and evaluator only ever see `FittedModel`.
pub struct LearnerRegistry {
    factories: BTreeMap<String, LearnerFactory>,
}

impl Default for LearnerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LearnerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(LearnerFactory {
            kind: RANDOM_FOREST,
            schema: forest_schema(),
            fit: fit_random_forest,
        });
        registry.register(LearnerFactory {
            kind: GRADIENT_BOOSTING,
            schema: boosting_schema(100.0, 5.0, 0.1, 10.0, 1.0, 1.0),
            fit: fit_gradient_boosting,
        });
        registry.register(LearnerFactory {
            kind: STOCHASTIC_GRADIENT_BOOSTING,
            schema: boosting_schema(300.0, 7.0, 0.05, 20.0, 0.8, 0.8),
            fit: fit_gradient_boosting,
        });
        registry
    }

    /// Adds or replaces a kind.
    pub fn register(&mut self, factory: LearnerFactory) {
        self.factories.insert(factory.kind.to_string(), factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn schema(&self, kind: &str) -> PipelineResult<&[ParamSpec]> {
        Ok(&self.factory(kind)?.schema)
    }

    fn factory(&self, kind: &str) -> PipelineResult<&LearnerFactory> {
        self.factories
            .get(kind)
            .ok_or_else(|| PipelineError::UnknownLearner(kind.to_string()))
    }

    /// Checks overrides against the kind's schema and fills in defaults.
    pub fn resolve(&self, config: &LearnerConfig, default_seed: u64) -> PipelineResult<ResolvedParams> {
        let factory = self.factory(&config.kind)?;
        let invalid = |param: &str, reason: String| PipelineError::InvalidParam {
            learner: config.name.clone(),
            param: param.to_string(),
            reason,
        };

        for name in config.params.keys() {
            if !factory.schema.iter().any(|p| p.name == name) {
                return Err(invalid(name, format!("not a parameter of `{}`", config.kind)));
            }
        }

        let mut values = BTreeMap::new();
        for spec in &factory.schema {
            let value = config.params.get(spec.name).copied().unwrap_or(spec.default);
            if !value.is_finite() || value < spec.min || value > spec.max {
                return Err(invalid(
                    spec.name,
                    format!("{value} outside [{}, {}]", spec.min, spec.max),
                ));
            }
            if spec.integer && value.fract() != 0.0 {
                return Err(invalid(spec.name, format!("{value} is not an integer")));
            }
            values.insert(spec.name.to_string(), value);
        }

        Ok(ResolvedParams {
            values,
            seed: config.seed.unwrap_or(default_seed),
        })
    }

    pub fn fit(
        &self,
        config: &LearnerConfig,
        data: &TrainingData<'_>,
        default_seed: u64,
    ) -> PipelineResult<FittedModel> {
        let params = self.resolve(config, default_seed)?;
        data.require_two_classes()?;
        (self.factory(&config.kind)?.fit)(data, &params)
    }
}

fn forest_schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("n_trees", 100.0, 1.0, 5000.0, "number of bagged trees"),
        ParamSpec::int("max_depth", 10.0, 1.0, 64.0, "maximum tree depth"),
        ParamSpec::int("min_samples_split", 20.0, 2.0, 1e6, "rows needed to split a node"),
        ParamSpec::int("min_samples_leaf", 10.0, 1.0, 1e6, "rows required in each child"),
        ParamSpec::real(
            "max_features",
            0.0,
            0.0,
            1.0,
            "fraction of features tried per split; 0 selects sqrt(n)",
        ),
        ParamSpec::int("bootstrap", 1.0, 0.0, 1.0, "draw rows with replacement per tree"),
    ]
}

fn boosting_schema(
    n_stages: f64,
    max_depth: f64,
    learning_rate: f64,
    min_leaf: f64,
    subsample: f64,
    feature_fraction: f64,
) -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("n_stages", n_stages, 1.0, 5000.0, "boosting rounds"),
        ParamSpec::int("max_depth", max_depth, 1.0, 32.0, "maximum tree depth"),
        ParamSpec::real("learning_rate", learning_rate, 1e-4, 1.0, "shrinkage per stage"),
        ParamSpec::int("min_samples_leaf", min_leaf, 1.0, 1e6, "rows required in each leaf"),
        ParamSpec::real("subsample", subsample, 0.05, 1.0, "row fraction drawn per stage"),
        ParamSpec::real(
            "feature_fraction",
            feature_fraction,
            0.05,
            1.0,
            "fraction of features tried per split",
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

/// A `gbdt` log-likelihood ensemble. The model itself is shared, so cloning
/// a fitted learner never copies its trees.
#[derive(Clone, Serialize, Deserialize)]
pub struct BoostedTrees {
    model: Arc<GBDT>,
    stages: usize,
    n_features: usize,
    importances: Vec<f64>,
}

impl fmt::Debug for BoostedTrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoostedTrees")
            .field("stages", &self.stages)
            .field("n_features", &self.n_features)
            .field("importances", &self.importances)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BoostedTrees {
    fn eq(&self, other: &Self) -> bool {
        if self.stages != other.stages
            || self.n_features != other.n_features
            || self.importances != other.importances
        {
            return false;
        }
        if Arc::ptr_eq(&self.model, &other.model) {
            return true;
        }
        matches!(
            (serde_json::to_value(&*self.model), serde_json::to_value(&*other.model)),
            (Ok(a), Ok(b)) if a == b
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FittedModel {
    RandomForest(RandomForest),
    GradientBoosting(BoostedTrees),
}

impl FittedModel {
    /// Normalized split-gain importance per input column.
    pub fn importances(&self) -> &[f64] {
        match self {
            Self::RandomForest(m) => &m.importances,
            Self::GradientBoosting(m) => &m.importances,
        }
    }

    pub fn tree_count(&self) -> usize {
        match self {
            Self::RandomForest(m) => m.trees.len(),
            Self::GradientBoosting(m) => m.stages,
        }
    }
}

impl ProbabilityModel for RandomForest {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl ProbabilityModel for BoostedTrees {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        score_rows(&self.model, vec![test_row(row.iter().copied())])
            .first()
            .copied()
            .unwrap_or(0.5)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl ProbabilityModel for FittedModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            Self::RandomForest(m) => m.predict_proba(row),
            Self::GradientBoosting(m) => m.predict_proba(row),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            Self::RandomForest(m) => m.n_features(),
            Self::GradientBoosting(m) => m.n_features(),
        }
    }
}

/// Overflow-safe 1 / (1 + e^-z).
pub fn logistic(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn features_per_split(n_features: usize, fraction: f64) -> Option<usize> {
    if n_features == 0 {
        return None;
    }
    let k = if fraction <= 0.0 {
        (n_features as f64).sqrt().round() as usize
    } else {
        (n_features as f64 * fraction).ceil() as usize
    };
    Some(k.clamp(1, n_features))
}

fn fit_random_forest(data: &TrainingData<'_>, params: &ResolvedParams) -> PipelineResult<FittedModel> {
    let n = data.x.len();
    let n_features = data.n_features();
    let target = data.y.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();
    let tree_params = TreeParams {
        max_depth: params.count("max_depth"),
        min_samples_split: params.count("min_samples_split"),
        min_samples_leaf: params.count("min_samples_leaf"),
        max_features: features_per_split(n_features, params.get("max_features")),
    };
    let bootstrap = params.flag("bootstrap");
    let seed = params.seed();

    let fits: Vec<TreeFit> = (0..params.count("n_trees"))
        .into_par_iter()
        .map(|t| {
            let mut rng = StdRng::seed_from_u64(tree_seed(seed, t));
            let mut rows = if bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect::<Vec<_>>()
            } else {
                (0..n).collect::<Vec<_>>()
            };
            let leaf = |idx: &[usize]| mean_of(&target, idx);
            RegressionTree::fit(data.x, &target, &mut rows, tree_params, &leaf, &mut rng)
        })
        .collect();

    let mut importances = vec![0.0; n_features];
    let mut trees = Vec::with_capacity(fits.len());
    for mut fit in fits {
        normalize_importances(&mut fit.importances);
        for (acc, v) in importances.iter_mut().zip(&fit.importances) {
            *acc += v;
        }
        trees.push(fit.tree);
    }
    normalize_importances(&mut importances);

    Ok(FittedModel::RandomForest(RandomForest {
        trees,
        n_features,
        importances,
    }))
}

fn test_row(values: impl Iterator<Item = f64>) -> Data {
    Data::new_test_data(values.map(|v| v as f32).collect(), None)
}

/// `gbdt` scores in f32; anything non-finite falls back to 0.5.
fn score_rows(model: &GBDT, rows: Vec<Data>) -> Vec<f64> {
    model
        .predict(&rows)
        .into_iter()
        .map(|p| {
            let p = f64::from(p);
            if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.5 }
        })
        .collect()
}

/// Mean absolute shift in predicted probability when one column is pinned
/// to its training mean, normalized over columns.
fn substitution_importances(model: &GBDT, x: &[Vec<f64>], n_features: usize) -> Vec<f64> {
    if x.is_empty() {
        return vec![0.0; n_features];
    }
    let baseline = score_rows(model, x.iter().map(|r| test_row(r.iter().copied())).collect());
    let mut importances = (0..n_features)
        .into_par_iter()
        .map(|j| {
            let mean = x.iter().map(|r| r[j]).sum::<f64>() / x.len() as f64;
            let pinned = x
                .iter()
                .map(|r| {
                    test_row(
                        r.iter()
                            .enumerate()
                            .map(|(k, &v)| if k == j { mean } else { v }),
                    )
                })
                .collect();
            let shifted = score_rows(model, pinned);
            baseline
                .iter()
                .zip(&shifted)
                .map(|(a, b)| (a - b).abs())
                .sum::<f64>()
                / x.len() as f64
        })
        .collect::<Vec<_>>();
    normalize_importances(&mut importances);
    importances
}

/// Log-likelihood boosting through `gbdt`. `subsample` and
/// `feature_fraction` below 1 are drawn by the crate's own RNG, so only the
/// full-sample configuration is reproducible run to run.
fn fit_gradient_boosting(data: &TrainingData<'_>, params: &ResolvedParams) -> PipelineResult<FittedModel> {
    let n_features = data.n_features();
    let stages = params.count("n_stages");
    let feature_fraction = match params.get("feature_fraction") {
        f if n_features as f64 * f < 1.0 => 1.0,
        f => f,
    };

    let mut cfg = GbdtConfig::new();
    cfg.set_feature_size(n_features);
    cfg.set_max_depth(params.count("max_depth") as u32);
    cfg.set_min_leaf_size(params.count("min_samples_leaf"));
    cfg.set_iterations(stages);
    cfg.set_shrinkage(params.get("learning_rate") as f32);
    cfg.set_data_sample_ratio(params.get("subsample"));
    cfg.set_feature_sample_ratio(feature_fraction);
    cfg.set_loss("LogLikelyhood");
    cfg.set_debug(false);
    cfg.set_training_optimization_level(2);

    // LogLikelyhood wants labels in {-1, 1}.
    let mut rows = data
        .x
        .iter()
        .zip(data.y)
        .map(|(row, &y)| {
            let label = if y == 1 { 1.0 } else { -1.0 };
            Data::new_training_data(row.iter().map(|&v| v as f32).collect(), 1.0, label, None)
        })
        .collect::<Vec<_>>();
    let mut model = GBDT::new(&cfg);
    model.fit(&mut rows);

    let importances = substitution_importances(&model, data.x, n_features);
    Ok(FittedModel::GradientBoosting(BoostedTrees {
        model: Arc::new(model),
        stages,
        n_features,
        importances,
    }))
}
