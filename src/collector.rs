//! Source collection: walk a path, parse every source file and flatten it
//! into one corpus.
//!
//! Directories are walked sequentially in the order the OS lists them. Each
//! subdirectory is descended into at the point it appears, so the corpus order
//! is fixed for a given snapshot of the tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IndexerError, Result};
use crate::flatten::{check_lineage, Flattener};
use crate::parser::{ParseOptions, SourceParser, TreeSitterParser};
use crate::types::FlatNode;

/// What to do when one file cannot be read or parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole collection on the first failing file.
    #[default]
    FailFast,
    /// Record the file in [`Collection::skipped`] and keep going.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectOptions {
    pub parse: ParseOptions,
    pub failure_policy: FailurePolicy,
    /// Extensions (without the dot) to parse inside directories. `None`
    /// parses every file.
    pub extensions: Option<Vec<String>>,
    pub follow_symlinks: bool,
    /// Re-check parent links and id uniqueness over the finished corpus.
    pub verify_lineage: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            failure_policy: FailurePolicy::FailFast,
            extensions: None,
            follow_symlinks: false,
            verify_lineage: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum SkipReason {
    Extension,
    Symlink,
    ParseFailure(String),
    IoFailure(String),
}

impl SkipReason {
    /// Read and parse failures, as opposed to files filtered out on purpose.
    pub fn is_failure(&self) -> bool {
        matches!(self, SkipReason::ParseFailure(_) | SkipReason::IoFailure(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// A flattened corpus plus an account of what did not make it in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Collection {
    pub nodes: Vec<FlatNode>,
    pub files_parsed: usize,
    pub skipped: Vec<SkippedFile>,
    pub policy: FailurePolicy,
}

impl Collection {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// True when no file was dropped because of a read or parse failure.
    /// Files filtered out by extension or symlink policy do not count.
    pub fn is_complete(&self) -> bool {
        !self.skipped.iter().any(|s| s.reason.is_failure())
    }
}

pub struct SourceCollector {
    parser: Arc<dyn SourceParser>,
    flattener: Flattener,
    options: CollectOptions,
}

impl Default for SourceCollector {
    fn default() -> Self {
        Self::new(CollectOptions::default())
    }
}

impl SourceCollector {
    pub fn new(options: CollectOptions) -> Self {
        Self {
            parser: Arc::new(TreeSitterParser::new()),
            flattener: Flattener::new(),
            options,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_flattener(mut self, flattener: Flattener) -> Self {
        self.flattener = flattener;
        self
    }

    pub fn options(&self) -> &CollectOptions {
        &self.options
    }

    /// Collect a single file or a whole directory tree.
    ///
    /// A missing or unreadable `path` is always an error. Failures below it
    /// follow the configured [`FailurePolicy`].
    pub async fn collect(&self, path: impl AsRef<Path>) -> Result<Collection> {
        let path = path.as_ref();
        let start = std::time::Instant::now();
        let mut collection = Collection::new(self.options.failure_policy);

        // The root is followed even when it is a symlink: the caller named it.
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IndexerError::io(path, e))?;

        if metadata.is_dir() {
            let mut ancestors = HashSet::new();
            self.visit_dir(path.to_path_buf(), &mut ancestors, &mut collection)
                .await?;
        } else {
            let nodes = self.collect_file(path).await?;
            collection.nodes.extend(nodes);
            collection.files_parsed += 1;
        }

        if self.options.verify_lineage {
            check_lineage(&collection.nodes)?;
        }

        info!(
            "Collected {} nodes from {} files in {:?} ({} skipped, {:?})",
            collection.nodes.len(),
            collection.files_parsed,
            start.elapsed(),
            collection.skipped.len(),
            collection.policy
        );
        Ok(collection)
    }

    /// Read, parse and flatten one file.
    pub async fn collect_file(&self, path: &Path) -> Result<Vec<FlatNode>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IndexerError::io(path, e))?;
        let source = String::from_utf8(bytes).map_err(|e| {
            IndexerError::parse(path.display().to_string(), format!("invalid UTF-8: {}", e))
        })?;

        let parsed = self.parser.parse(&source, &self.options.parse.for_file(path))?;
        let nodes = self.flattener.flatten(&parsed.tree);
        debug!("Flattened {} into {} nodes", path.display(), nodes.len());
        Ok(nodes)
    }

    fn visit_dir<'a>(
        &'a self,
        dir: PathBuf,
        ancestors: &'a mut HashSet<PathBuf>,
        out: &'a mut Collection,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            // Only reachable through followed symlinks, but those can loop.
            let canonical = tokio::fs::canonicalize(&dir)
                .await
                .map_err(|e| IndexerError::io(&dir, e))?;
            if !ancestors.insert(canonical.clone()) {
                return Err(IndexerError::InvariantViolation(format!(
                    "directory cycle through {}",
                    dir.display()
                )));
            }

            let result = self.visit_entries(&dir, ancestors, out).await;
            ancestors.remove(&canonical);
            result
        }
        .boxed()
    }

    async fn visit_entries(
        &self,
        dir: &Path,
        ancestors: &mut HashSet<PathBuf>,
        out: &mut Collection,
    ) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => return self.handle_failure(IndexerError::io(dir, e), dir, out),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return self.handle_failure(IndexerError::io(dir, e), dir, out),
            };
            let path = entry.path();

            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    self.handle_failure(IndexerError::io(&path, e), &path, out)?;
                    continue;
                }
            };

            let is_dir = if file_type.is_symlink() {
                if !self.options.follow_symlinks {
                    debug!("Skipping symlink {}", path.display());
                    out.skipped.push(SkippedFile {
                        path,
                        reason: SkipReason::Symlink,
                    });
                    continue;
                }
                match tokio::fs::metadata(&path).await {
                    Ok(target) => target.is_dir(),
                    Err(e) => {
                        self.handle_failure(IndexerError::io(&path, e), &path, out)?;
                        continue;
                    }
                }
            } else {
                file_type.is_dir()
            };

            if is_dir {
                self.visit_dir(path, ancestors, out).await?;
                continue;
            }

            if !self.wants_extension(&path) {
                out.skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::Extension,
                });
                continue;
            }

            match self.collect_file(&path).await {
                Ok(nodes) => {
                    out.nodes.extend(nodes);
                    out.files_parsed += 1;
                }
                Err(e) => self.handle_failure(e, &path, out)?,
            }
        }

        Ok(())
    }

    fn wants_extension(&self, path: &Path) -> bool {
        let Some(allowed) = &self.options.extensions else {
            return true;
        };
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        allowed
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Apply the failure policy to a per-file error.
    fn handle_failure(&self, err: IndexerError, path: &Path, out: &mut Collection) -> Result<()> {
        if self.options.failure_policy == FailurePolicy::FailFast || !err.is_per_file() {
            return Err(err);
        }

        warn!("Skipping {}: {}", path.display(), err);
        let reason = match &err {
            IndexerError::IoFailure { source, .. } => SkipReason::IoFailure(source.to_string()),
            other => SkipReason::ParseFailure(other.to_string()),
        };
        out.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
        Ok(())
    }
}
