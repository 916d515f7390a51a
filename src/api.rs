use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::collector::{Collection, CollectOptions, FailurePolicy, SourceCollector};
use crate::config::TreedexConfig;
use crate::error::Result;
use crate::flatten::{Flattener, IdAllocator};
use crate::parser::{ParseOptions, SourceParser, TreeSitterParser};
use crate::storage::{NodeIndex, Schema};

/// Entry point tying collection, flattening and indexing together.
///
/// ```no_run
/// # async fn run() -> treedex::Result<()> {
/// use treedex::{SearchParams, TreeDex};
///
/// let dex = TreeDex::builder().best_effort().build();
/// let index = dex.create_index("src/").await?;
/// let hits = index.search(&SearchParams::new("greet").filter("kind", "let"))?;
/// for hit in hits.items {
///     println!("{} ({:.2})", hit.node.summary(), hit.score);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TreeDex {
    collector: SourceCollector,
    schema: Schema,
}

impl TreeDex {
    pub fn builder() -> TreeDexBuilder {
        TreeDexBuilder::default()
    }

    pub fn from_config(config: &TreedexConfig) -> Self {
        TreeDexBuilder {
            options: config.collect_options(),
            flattener: Some(config.flattener()),
            ..TreeDexBuilder::default()
        }
        .build()
    }

    pub fn options(&self) -> &CollectOptions {
        self.collector.options()
    }

    /// Flatten every source file under `path` into one corpus.
    pub async fn collect(&self, path: impl AsRef<Path>) -> Result<Collection> {
        self.collector.collect(path).await
    }

    /// Collect `path` and load the corpus into a fresh index.
    pub async fn create_index(&self, path: impl AsRef<Path>) -> Result<NodeIndex> {
        let collection = self.collect(path).await?;
        self.index_collection(collection)
    }

    /// Index a finished collection. Its skip report travels with the index
    /// (see [`NodeIndex::skipped`]), so a partial corpus stays detectable.
    pub fn index_collection(&self, collection: Collection) -> Result<NodeIndex> {
        let Collection {
            nodes,
            files_parsed,
            skipped,
            policy,
        } = collection;
        debug!("Indexing {} nodes from {} file(s)", nodes.len(), files_parsed);

        let mut index = NodeIndex::with_schema(self.schema.clone());
        index.insert_all(nodes)?;
        index.record_skipped(policy, skipped);
        Ok(index)
    }
}

#[derive(Default)]
pub struct TreeDexBuilder {
    options: CollectOptions,
    parser: Option<Arc<dyn SourceParser>>,
    flattener: Option<Flattener>,
    schema: Option<Schema>,
}

impl TreeDexBuilder {
    pub fn error_recovery(mut self, enabled: bool) -> Self {
        self.options.parse.error_recovery = enabled;
        self
    }

    pub fn parse_options(mut self, parse: ParseOptions) -> Self {
        self.options.parse = parse;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.options.failure_policy = policy;
        self
    }

    pub fn best_effort(self) -> Self {
        self.failure_policy(FailurePolicy::BestEffort)
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.options.follow_symlinks = follow;
        self
    }

    pub fn verify_lineage(mut self, verify: bool) -> Self {
        self.options.verify_lineage = verify;
        self
    }

    pub fn id_allocator(mut self, ids: Arc<dyn IdAllocator>) -> Self {
        self.flattener = Some(Flattener::with_allocator(ids));
        self
    }

    pub fn parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build(self) -> TreeDex {
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(TreeSitterParser::new()));
        let collector = SourceCollector::new(self.options)
            .with_parser(parser)
            .with_flattener(self.flattener.unwrap_or_default());
        TreeDex {
            collector,
            schema: self.schema.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexerError;
    use crate::flatten::SequentialAllocator;
    use crate::storage::SearchParams;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builder_options() {
        let dex = TreeDex::builder()
            .error_recovery(false)
            .best_effort()
            .extensions(["js"])
            .follow_symlinks(true)
            .build();

        let options = dex.options();
        assert!(!options.parse.error_recovery);
        assert_eq!(options.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(options.extensions, Some(vec!["js".to_string()]));
        assert!(options.follow_symlinks);
    }

    #[test]
    fn test_create_index_blocking() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "let greet = 'hi';").unwrap();

        let dex = TreeDex::builder()
            .id_allocator(Arc::new(SequentialAllocator::new()))
            .build();
        let index = tokio_test::block_on(dex.create_index(dir.path())).unwrap();

        assert_eq!(index.get("n0").unwrap().node_type, "File");
        let hits = index
            .search(&SearchParams::new("greet").filter("kind", "let"))
            .unwrap();
        assert_eq!(hits.items.len(), 1);
        assert_eq!(hits.items[0].node.node_type, "Identifier");
    }

    #[tokio::test]
    async fn test_strict_builder_propagates_parse_failure() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("broken.js");
        fs::write(&file, "function ( {").unwrap();

        let err = TreeDex::builder()
            .error_recovery(false)
            .build()
            .create_index(&file)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::ParseFailure { .. }));
    }

    #[tokio::test]
    async fn test_best_effort_index_keeps_skip_report() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.js"), "let greet = 'hi';").unwrap();
        fs::write(dir.path().join("broken.js"), "function ( {").unwrap();

        let index = TreeDex::builder()
            .error_recovery(false)
            .best_effort()
            .build()
            .create_index(dir.path())
            .await
            .unwrap();

        assert!(!index.is_complete());
        assert_eq!(index.skipped().len(), 1);
        assert!(index.skipped()[0].path.ends_with("broken.js"));
        assert!(matches!(index.skipped()[0].reason, crate::SkipReason::ParseFailure(_)));

        let stats = index.stats();
        assert_eq!(stats.policy, FailurePolicy::BestEffort);
        assert_eq!(stats.total_files, 1);
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["skipped"][0]["reason"]["reason"], "parse-failure");
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = TreedexConfig::default();
        config.collect.extensions = Some(vec!["ts".to_string()]);
        config.collect.ids = crate::config::IdStrategy::Sequential;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "const x: number = 1;").unwrap();
        fs::write(dir.path().join("b.js"), "let y = 2;").unwrap();

        let collection = TreeDex::from_config(&config).collect(dir.path()).await.unwrap();
        assert_eq!(collection.files_parsed, 1);
        assert_eq!(collection.nodes[0].node_id, "n0");
    }
}
