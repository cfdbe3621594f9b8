// ⚙️ Configuration
// Paths and policies, loaded from TOML. Every key is optional:
//
//   base_dir = "/srv/paseu"
//   template_path = "/srv/paseu/plantilla.txt"
//   ledger_path = "/srv/paseu/historial_paseu.csv"
//   output_dir = "/srv/paseu/salidas"
//   backend = "csv"              # or "sqlite"
//   error_policy = "propagate"   # or "degrade_to_empty"

use crate::error::ConfigError;
use crate::ledger::ErrorPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const TEMPLATE_FILE: &str = "plantilla.txt";
pub const LEDGER_FILE: &str = "historial_paseu.csv";
pub const LEDGER_DB_FILE: &str = "historial_paseu.db";
pub const OUTPUT_DIR: &str = "salidas";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Csv,
    Sqlite,
}

/// On-disk shape: everything optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    base_dir: Option<PathBuf>,
    template_path: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    backend: Option<Backend>,
    error_policy: Option<ErrorPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub template_path: PathBuf,
    pub ledger_path: PathBuf,
    pub output_dir: PathBuf,
    pub backend: Backend,
    pub error_policy: ErrorPolicy,
}

impl AppConfig {
    /// Defaults rooted at `base_dir`
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        AppConfig {
            template_path: base_dir.join(TEMPLATE_FILE),
            ledger_path: base_dir.join(LEDGER_FILE),
            output_dir: base_dir.join(OUTPUT_DIR),
            backend: Backend::default(),
            error_policy: ErrorPolicy::default(),
            base_dir,
        }
    }

    /// Read a TOML file. Relative `base_dir` is taken relative to the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let anchor = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&text, anchor).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str, anchor: &Path) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(text)?;

        let base_dir = match raw.base_dir {
            Some(dir) if dir.is_relative() => anchor.join(dir),
            Some(dir) => dir,
            None => anchor.to_path_buf(),
        };
        let backend = raw.backend.unwrap_or_default();
        let defaults = Self::from_base_dir(base_dir);

        let ledger_path = raw.ledger_path.unwrap_or_else(|| match backend {
            Backend::Csv => defaults.ledger_path.clone(),
            Backend::Sqlite => defaults.base_dir.join(LEDGER_DB_FILE),
        });

        Ok(AppConfig {
            template_path: raw.template_path.unwrap_or(defaults.template_path),
            ledger_path,
            output_dir: raw.output_dir.unwrap_or(defaults.output_dir),
            backend,
            error_policy: raw.error_policy.unwrap_or_default(),
            base_dir: defaults.base_dir,
        })
    }
}
