use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::calibration::CalibrationMethod;
use crate::error::{PipelineError, PipelineResult};
use crate::learners::LearnerConfig;
use crate::pipeline::TrainConfig;

const APP_DIR: &str = "goalcast";

pub const ENV_MODELS_DIR: &str = "GOALCAST_MODELS_DIR";
pub const ENV_REPORT_DIR: &str = "GOALCAST_REPORT_DIR";
pub const ENV_TEST_FRACTION: &str = "GOALCAST_TEST_FRACTION";
pub const ENV_MIN_SAMPLES: &str = "GOALCAST_MIN_SAMPLES";
pub const ENV_CV_FOLDS: &str = "GOALCAST_CV_FOLDS";
pub const ENV_CALIBRATION: &str = "GOALCAST_CALIBRATION";
pub const ENV_SEED: &str = "GOALCAST_SEED";
pub const ENV_LEARNERS: &str = "GOALCAST_LEARNERS";
pub const ENV_DB_PATH: &str = "HIST_DB_PATH";

/// Loads `.env.local` then `.env` if present; missing files are fine.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

/// `$XDG_DATA_HOME/goalcast`, else `~/.local/share/goalcast`.
pub fn app_data_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(APP_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

pub fn default_models_dir() -> PathBuf {
    app_data_dir()
        .map(|dir| dir.join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Command-line flags in `--name=value` or `--name value` form, plus
/// bare positionals.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    args: Vec<String>,
}

impl CliArgs {
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1))
    }

    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// First argument not starting with `--` and not consumed as a flag value.
    pub fn subcommand(&self) -> Option<&str> {
        self.positionals().into_iter().next()
    }

    pub fn positionals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip_next = false;
        for arg in &self.args {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg.starts_with("--") {
                skip_next = !arg.contains('=') && !BOOLEAN_FLAGS.contains(&arg.as_str());
                continue;
            }
            out.push(arg.as_str());
        }
        out
    }

    pub fn value(&self, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        for (idx, arg) in self.args.iter().enumerate() {
            if let Some(raw) = arg.strip_prefix(&prefix) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            if arg == name
                && let Some(next) = self.args.get(idx + 1)
                && !next.trim().is_empty()
            {
                return Some(next.trim().to_string());
            }
        }
        None
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg == name)
    }
}

const BOOLEAN_FLAGS: &[&str] = &["--tennis", "--help"];

/// Resolved settings for the binaries: CLI flags win over the environment,
/// the environment wins over defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub models_dir: PathBuf,
    pub report_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub train: TrainConfig,
}

impl AppConfig {
    pub fn from_env(args: &CliArgs) -> PipelineResult<Self> {
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    pub fn resolve<E>(args: &CliArgs, env: E) -> PipelineResult<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let lookup = |flag: &str, key: &str| {
            args.value(flag)
                .or_else(|| env(key).filter(|v| !v.trim().is_empty()))
        };

        let models_dir = lookup("--models-dir", ENV_MODELS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_models_dir);
        let report_dir = lookup("--report-dir", ENV_REPORT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let db_path = lookup("--db", ENV_DB_PATH).map(PathBuf::from);

        let mut train = TrainConfig::default();
        if let Some(raw) = lookup("--test-fraction", ENV_TEST_FRACTION) {
            train.test_fraction = parse_setting("test_fraction", &raw)?;
        }
        if let Some(raw) = lookup("--min-samples", ENV_MIN_SAMPLES) {
            train.min_samples = parse_setting("min_samples", &raw)?;
        }
        if let Some(raw) = lookup("--cv-folds", ENV_CV_FOLDS) {
            train.cv_folds = parse_setting("cv_folds", &raw)?;
        }
        if let Some(raw) = lookup("--calibration", ENV_CALIBRATION) {
            train.calibration = CalibrationMethod::from_str(&raw)?;
        }
        if let Some(raw) = lookup("--seed", ENV_SEED) {
            train.seed = parse_setting("seed", &raw)?;
        }
        if let Some(path) = lookup("--learners", ENV_LEARNERS) {
            train.learners = load_learner_configs(Path::new(&path))?;
        }
        if let Some(raw) = args.value("--deny") {
            train.extra_denylist = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        train.validate()?;

        Ok(Self {
            models_dir,
            report_dir,
            db_path,
            train,
        })
    }
}

fn parse_setting<T: FromStr>(name: &str, raw: &str) -> PipelineResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| PipelineError::Config(format!("cannot parse {name} from `{raw}`")))
}

/// Learner list from a JSON array of `{name, kind, params, seed}` objects.
pub fn load_learner_configs(path: &Path) -> PipelineResult<Vec<LearnerConfig>> {
    let raw = fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })
}
