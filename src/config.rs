//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `TREEDEX_*` environment variables (`__` separates nesting levels,
//! e.g. `TREEDEX_COLLECT__FAILURE_POLICY=best-effort`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::{CollectOptions, FailurePolicy};
use crate::error::{IndexerError, Result};
use crate::flatten::{Flattener, IdAllocator, SequentialAllocator, UuidAllocator};
use crate::parser::{ParseOptions, SourceLanguage};

pub const CONFIG_FILE_NAME: &str = "treedex.toml";
pub const ENV_PREFIX: &str = "TREEDEX";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TreedexConfig {
    pub parser: ParserSection,
    pub collect: CollectSection,
    pub search: SearchSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSection {
    pub error_recovery: bool,
    pub language: Option<SourceLanguage>,
    pub timeout_micros: Option<u64>,
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            error_recovery: true,
            language: None,
            timeout_micros: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Sequential,
}

impl IdStrategy {
    pub fn allocator(self) -> Arc<dyn IdAllocator> {
        match self {
            IdStrategy::Uuid => Arc::new(UuidAllocator),
            IdStrategy::Sequential => Arc::new(SequentialAllocator::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CollectSection {
    pub failure_policy: FailurePolicy,
    pub extensions: Option<Vec<String>>,
    pub follow_symlinks: bool,
    pub verify_lineage: bool,
    pub ids: IdStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub limit: usize,
    pub fuzzy: bool,
    pub properties: Option<Vec<String>>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            limit: 20,
            fuzzy: false,
            properties: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter directive for the `treedex` target. `RUST_LOG` wins.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl TreedexConfig {
    /// Load the effective configuration. An explicit path must exist; the
    /// implicit locations are used only when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = Environment::with_prefix(ENV_PREFIX);
        match explicit {
            Some(path) => Self::from_sources(&[(path.to_path_buf(), true)], env),
            None => {
                let files: Vec<(PathBuf, bool)> = Self::default_locations()
                    .into_iter()
                    .map(|p| (p, false))
                    .collect();
                Self::from_sources(&files, env)
            }
        }
    }

    /// Implicit config files, lowest priority first.
    pub fn default_locations() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dirs) = ProjectDirs::from("", "", "treedex") {
            paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        paths
    }

    fn from_sources(files: &[(PathBuf, bool)], env: Environment) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        for (path, required) in files {
            debug!("Config source {} (required: {})", path.display(), required);
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(*required),
            );
        }

        let env = env
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("collect.extensions")
            .with_list_parse_key("search.properties")
            .try_parsing(true);

        let config = builder.add_source(env).build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            error_recovery: self.parser.error_recovery,
            source_filename: None,
            language: self.parser.language,
            timeout_micros: self.parser.timeout_micros,
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            parse: self.parse_options(),
            failure_policy: self.collect.failure_policy,
            extensions: self.collect.extensions.clone(),
            follow_symlinks: self.collect.follow_symlinks,
            verify_lineage: self.collect.verify_lineage,
        }
    }

    pub fn flattener(&self) -> Flattener {
        Flattener::with_allocator(self.collect.ids.allocator())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IndexerError::Config(e.to_string()))
    }
}
