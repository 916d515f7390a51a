use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::{
    api::TreeDex,
    collector::{Collection, FailurePolicy, SkipReason},
    config::TreedexConfig,
    storage::{IndexStats, SearchHit, SearchParams},
    types::FlatNode,
};

#[derive(Parser, Debug)]
#[command(
    name = "treedex",
    about = "Flatten JavaScript/TypeScript syntax trees and search them structurally"
)]
#[command(version, propagate_version = true)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./treedex.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging and timings
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip unreadable or unparsable files instead of aborting
    #[arg(long, global = true)]
    pub best_effort: bool,

    /// Reject files with syntax errors instead of recovering a partial tree
    #[arg(long, global = true)]
    pub strict: bool,

    /// Only parse files with these extensions inside directories (e.g. js,ts)
    #[arg(long = "ext", global = true, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the flattened node records of a file or directory
    Flatten(FlattenArgs),

    /// Search flattened nodes by term and exact field filters
    Search(SearchArgs),

    /// Show node counts for a file or directory
    Stats(StatsArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct FlattenArgs {
    /// File or directory to flatten
    pub path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// File or directory to index
    pub path: PathBuf,

    /// Search term; empty matches everything that passes the filters
    #[arg(default_value = "")]
    pub term: String,

    /// Exact filter, repeatable (e.g. --where parentType=ClassDeclaration)
    #[arg(long = "where", value_name = "FIELD=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Field to match the term against, repeatable (default: name, kind)
    #[arg(long = "property", value_name = "FIELD")]
    pub properties: Vec<String>,

    /// Maximum number of hits
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Fall back to fuzzy matching when nothing matches exactly
    #[arg(long)]
    pub fuzzy: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// File or directory to index
    pub path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Parse a `field=value` filter.
pub fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{}'", raw)),
    }
}

#[derive(Serialize)]
struct HitView<'a> {
    score: f64,
    #[serde(flatten)]
    node: &'a FlatNode,
}

pub struct CliApp {
    config: TreedexConfig,
    dex: TreeDex,
    verbose: bool,
}

impl CliApp {
    pub fn new(config: TreedexConfig, verbose: bool) -> Self {
        info!("Initializing treedex CLI");
        let dex = TreeDex::from_config(&config);
        Self {
            config,
            dex,
            verbose,
        }
    }

    /// Fold command-line flags into a loaded configuration.
    pub fn apply_overrides(config: &mut TreedexConfig, args: &CliArgs) {
        if args.best_effort {
            config.collect.failure_policy = FailurePolicy::BestEffort;
        }
        if args.strict {
            config.parser.error_recovery = false;
        }
        if !args.extensions.is_empty() {
            config.collect.extensions = Some(args.extensions.clone());
        }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Flatten(args) => self.flatten(args).await,
            Commands::Search(args) => self.search(args).await,
            Commands::Stats(args) => self.stats(args).await,
            Commands::Config => self.show_config(),
        }
    }

    pub async fn flatten(&self, args: FlattenArgs) -> Result<()> {
        let collection = self.collect(&args.path).await?;

        match args.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&collection.nodes)
                    .context("Failed to serialize nodes to JSON")?;
                println!("{}", json);
            }
            OutputFormat::Text => {
                print!("{}", render_tree(&collection.nodes));
                self.print_collection_summary(&collection);
            }
        }
        Ok(())
    }

    pub async fn search(&self, args: SearchArgs) -> Result<()> {
        let collection = self.collect(&args.path).await?;
        let index = self
            .dex
            .index_collection(collection)
            .context("Failed to build index")?;

        let mut params = SearchParams::new(args.term.clone())
            .with_fuzzy(args.fuzzy || self.config.search.fuzzy)
            .with_limit(args.limit.unwrap_or(self.config.search.limit));
        params.filters = args.filters;
        if !args.properties.is_empty() {
            params.properties = Some(args.properties);
        } else {
            params.properties = self.config.search.properties.clone();
        }

        let result = index
            .search(&params)
            .with_context(|| format!("Search for '{}' failed", args.term))?;

        match args.format {
            OutputFormat::Json => {
                let hits: Vec<HitView<'_>> = result
                    .items
                    .iter()
                    .map(|hit| HitView {
                        score: hit.score,
                        node: hit.node,
                    })
                    .collect();
                let json = serde_json::to_string_pretty(&hits)
                    .context("Failed to serialize hits to JSON")?;
                println!("{}", json);
            }
            OutputFormat::Text => {
                println!("{}", format!("Search: '{}'", args.term).bold().cyan());
                if result.items.is_empty() {
                    println!("{}", "No matches".yellow());
                } else {
                    print!("{}", render_hits(&result.items));
                }
                println!(
                    "{}",
                    format!(
                        "{} of {} matches shown",
                        result.items.len(),
                        result.total_matches
                    )
                    .dimmed()
                );
                if !index.is_complete() {
                    println!(
                        "{}",
                        "Partial index: some files failed to parse and were skipped".yellow()
                    );
                }
                if self.verbose {
                    println!("{}", format!("Query took {}ms", result.query_duration_ms).dimmed());
                }
            }
        }
        Ok(())
    }

    pub async fn stats(&self, args: StatsArgs) -> Result<()> {
        let collection = self.collect(&args.path).await?;
        let index = self
            .dex
            .index_collection(collection)
            .context("Failed to build index")?;

        match args.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(index.stats())
                    .context("Failed to serialize stats to JSON")?;
                println!("{}", json);
            }
            OutputFormat::Text => {
                print!("{}", render_stats(index.stats()));
            }
        }
        Ok(())
    }

    pub fn show_config(&self) -> Result<()> {
        let rendered = self
            .config
            .to_toml()
            .context("Failed to render configuration")?;
        println!("{}", rendered);
        Ok(())
    }

    async fn collect(&self, path: &std::path::Path) -> Result<Collection> {
        let start = Instant::now();
        let collection = self
            .dex
            .collect(path)
            .await
            .with_context(|| format!("Failed to collect {}", path.display()))?;

        if self.verbose {
            eprintln!(
                "{}",
                format!(
                    "Collected {} nodes from {} file(s) in {:?}",
                    collection.nodes.len(),
                    collection.files_parsed,
                    start.elapsed()
                )
                .dimmed()
            );
        }
        for skipped in &collection.skipped {
            if self.verbose || !matches!(skipped.reason, SkipReason::Extension) {
                eprintln!(
                    "{} {} ({:?})",
                    "skipped".yellow(),
                    skipped.path.display(),
                    skipped.reason
                );
            }
        }
        Ok(collection)
    }

    fn print_collection_summary(&self, collection: &Collection) {
        let line = format!(
            "{} nodes, {} file(s) parsed, {} skipped, policy {:?}",
            collection.nodes.len(),
            collection.files_parsed,
            collection.skipped.len(),
            collection.policy
        );
        if collection.is_complete() {
            println!("{}", line.green());
        } else {
            println!("{}", line.yellow());
        }
    }
}

/// Indented preorder listing; depth comes from the parent links.
pub fn render_tree(nodes: &[FlatNode]) -> String {
    let mut depth: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    let mut out = String::new();

    for node in nodes {
        let level = node
            .parent_id
            .as_deref()
            .and_then(|p| depth.get(p))
            .map_or(0, |d| d + 1);
        depth.insert(node.node_id.as_str(), level);

        let label = match &node.field {
            Some(field) => format!("{}: ", field.dimmed()),
            None => String::new(),
        };
        out.push_str(&format!("{}{}{}\n", "  ".repeat(level), label, node.summary()));
    }
    out
}

pub fn render_hits(hits: &[SearchHit<'_>]) -> String {
    let mut out = String::new();
    for hit in hits {
        let parent = hit.node.parent_type.as_deref().unwrap_or("-");
        let file = hit
            .node
            .loc
            .as_ref()
            .and_then(|l| l.filename.as_deref())
            .unwrap_or("");
        out.push_str(&format!(
            "{:>7.3}  {}  {} {}  {}\n",
            hit.score,
            hit.node.summary().bold(),
            "in".dimmed(),
            parent,
            file.dimmed()
        ));
    }
    out
}

pub fn render_stats(stats: &IndexStats) -> String {
    let mut out = format!(
        "{}\n  files: {}\n  nodes: {}\n  terms: {}\n",
        "Index".bold().cyan(),
        stats.total_files,
        stats.total_nodes,
        stats.distinct_terms
    );
    if !stats.nodes_by_kind.is_empty() {
        out.push_str(&format!("{}\n", "By kind".bold()));
        for (kind, count) in &stats.nodes_by_kind {
            out.push_str(&format!("  {:<12} {}\n", kind, count));
        }
    }
    if !stats.skipped.is_empty() {
        let failed = stats.skipped.iter().filter(|s| s.reason.is_failure()).count();
        let line = format!(
            "  skipped: {} ({} failed, {:?})\n",
            stats.skipped.len(),
            failed,
            stats.policy
        );
        if failed > 0 {
            out.push_str(&line.yellow().to_string());
        } else {
            out.push_str(&line);
        }
    }
    out.push_str(&format!("{}\n", "By type".bold()));
    let mut by_type: Vec<(&String, &usize)> = stats.nodes_by_type.iter().collect();
    by_type.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (node_type, count) in by_type {
        out.push_str(&format!("  {:<28} {}\n", node_type, count));
    }
    out
}
