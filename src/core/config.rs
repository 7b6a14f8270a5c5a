//! Pipeline configuration: `packline.toml` merged over the built-in defaults.
//!
//! ```toml
//! env_file = "~/.config/packline/aws.env"
//!
//! [vars]
//! bucket = "artifacts.example.com"
//! prefix = "lambda/orders"
//!
//! [[stages]]
//! name = "test"
//! command = "docker compose -f {{compose_file}} run --rm test pytest -q"
//! standalone = true
//! ```
//!
//! A `[[stages]]` entry whose name matches a built-in stage replaces it;
//! other entries are appended to the registry.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::defaults;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::stage::{Stage, StageRegistry};
use crate::utils::template;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl ConfigFile {
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::config_invalid_toml(path.to_string_lossy().to_string(), e))
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub vars: BTreeMap<String, String>,
    pub stages: Vec<Stage>,
    env_file: Option<String>,
    env_file_explicit: bool,
}

impl PipelineConfig {
    /// Built-in defaults rooted at `work_dir`, with no config file applied.
    pub fn defaults(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            vars: defaults::default_vars(),
            stages: defaults::default_stages(),
            env_file: None,
            env_file_explicit: false,
        }
    }

    /// Load configuration for `work_dir`.
    ///
    /// An explicit `config_path` must exist. Without one, `packline.toml` in
    /// the working directory is used when present.
    pub fn load(work_dir: impl Into<PathBuf>, config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults(work_dir);

        let path = match config_path {
            Some(path) => {
                let path = config.resolve_path(&path.to_string_lossy())?;
                if !path.is_file() {
                    return Err(Error::config_invalid_value(
                        "config",
                        Some(path.to_string_lossy().to_string()),
                        "Config file not found",
                    ));
                }
                Some(path)
            }
            None => {
                let path = config.work_dir.join(defaults::CONFIG_FILE);
                path.is_file().then_some(path)
            }
        };

        if let Some(path) = path {
            let content = fs::read_to_string(&path).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
            })?;
            config.apply_file(ConfigFile::parse(&content, &path)?);
            crate::log_status!("config", "Loaded {}", path.display());
        }

        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(env_file) = file.env_file {
            self.set_env_file(env_file);
        }

        self.vars.extend(file.vars);

        for stage in file.stages {
            match self.stages.iter_mut().find(|s| s.name == stage.name) {
                Some(existing) => *existing = stage,
                None => self.stages.push(stage),
            }
        }
    }

    /// Apply `KEY=VALUE` overrides from the command line.
    pub fn apply_var_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for raw in overrides {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                Error::validation_invalid_argument(
                    "var",
                    format!("Expected KEY=VALUE, got '{}'", raw),
                    None,
                    None,
                )
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::validation_invalid_argument(
                    "var",
                    "Variable name cannot be empty",
                    None,
                    None,
                ));
            }
            self.vars.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Point the pipeline at an environment file. An explicitly set file must exist.
    pub fn set_env_file(&mut self, path: impl Into<String>) {
        self.env_file = Some(path.into());
        self.env_file_explicit = true;
    }

    pub fn registry(&self) -> Result<StageRegistry> {
        let registry = StageRegistry::new(self.stages.clone())?;
        registry.producers(|path| template::render(path, &self.vars).ok())?;
        Ok(registry)
    }

    /// Resolved environment file path, if any. Falls back to `.env` in the
    /// working directory when it exists.
    pub fn env_file_path(&self) -> Result<Option<PathBuf>> {
        match &self.env_file {
            Some(raw) => self.resolve_path(raw).map(Some),
            None => {
                let fallback = self.work_dir.join(defaults::ENV_FILE);
                Ok(fallback.is_file().then_some(fallback))
            }
        }
    }

    /// Load the stage environment. No configured or discovered file yields an
    /// empty environment.
    pub fn load_environment(&self) -> Result<Environment> {
        match self.env_file_path()? {
            Some(path) if self.env_file_explicit || path.is_file() => Environment::load(&path),
            _ => Ok(Environment::new()),
        }
    }

    /// Expand `~` and `$VAR` and anchor relative paths at the working directory.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(raw).map_err(|e| {
            Error::config_invalid_value("path", Some(raw.to_string()), e.to_string())
        })?;
        let path = PathBuf::from(expanded.as_ref());
        Ok(if path.is_absolute() {
            path
        } else {
            self.work_dir.join(path)
        })
    }
}
