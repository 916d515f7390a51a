use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Instant, SystemTime};

use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::schema::{FieldType, Schema};
use crate::collector::{FailurePolicy, SkippedFile};
use crate::error::{IndexerError, Result};
use crate::types::FlatNode;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    // Identifier-shaped runs; everything else separates tokens.
    Regex::new(r"[\p{L}\p{N}_$]+").expect("token pattern is valid")
});

/// Lowercased search tokens of a piece of text.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Bonus on top of the token score when the stored text equals the term
/// byte for byte.
const EXACT_CASE_BONUS: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    pub total_matches: usize,
    pub query_duration_ms: u64,
}

impl<T> QueryResult<T> {
    pub fn new(items: Vec<T>, total_matches: usize, query_duration_ms: u64) -> Self {
        Self {
            items,
            total_matches,
            query_duration_ms,
        }
    }
}

/// Ranked hits returned by [`NodeIndex::search`].
pub type SearchResult<'a> = QueryResult<SearchHit<'a>>;

#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub node: &'a FlatNode,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Free text. Blank means "everything that passes the filters".
    pub term: String,
    /// Fields to match the term against. Defaults to the schema's searchable
    /// fields.
    pub properties: Option<Vec<String>>,
    /// Exact `field = value` filters, all of which must hold.
    pub filters: Vec<(String, String)>,
    pub limit: Option<usize>,
    /// Fall back to fuzzy matching when no token matches.
    pub fuzzy: bool,
}

impl SearchParams {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_nodes: usize,
    pub total_files: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub distinct_terms: usize,
    pub last_updated: SystemTime,
    /// Files left out of the corpus, carried over from collection.
    pub skipped: Vec<SkippedFile>,
    /// Policy the corpus was collected under.
    pub policy: FailurePolicy,
}

impl IndexStats {
    /// False when a read or parse failure dropped a file from the corpus.
    pub fn is_complete(&self) -> bool {
        !self.skipped.iter().any(|s| s.reason.is_failure())
    }
}

impl Default for IndexStats {
    fn default() -> Self {
        Self {
            total_nodes: 0,
            total_files: 0,
            nodes_by_type: BTreeMap::new(),
            nodes_by_kind: BTreeMap::new(),
            distinct_terms: 0,
            last_updated: SystemTime::now(),
            skipped: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }
}

/// In-memory index over a flattened corpus.
///
/// Every schema field gets an exact-match index (`value -> doc ids`); string
/// fields additionally get an inverted token index used by term search. Doc
/// ids are insertion positions, so ties in ranking resolve to corpus order.
#[derive(Debug, Clone)]
pub struct NodeIndex {
    schema: Schema,
    nodes: Vec<FlatNode>,
    // Per doc, the projected value of every schema field in schema order.
    rows: Vec<Vec<Option<String>>>,

    id_index: HashMap<String, usize>,
    filter_index: Vec<HashMap<String, Vec<usize>>>,
    term_index: Vec<HashMap<String, Vec<usize>>>,

    stats: IndexStats,
}

impl Default for NodeIndex {
    fn default() -> Self {
        Self::with_schema(Schema::default())
    }
}

impl NodeIndex {
    pub fn with_schema(schema: Schema) -> Self {
        let width = schema.len();
        Self {
            schema,
            nodes: Vec::new(),
            rows: Vec::new(),
            id_index: HashMap::new(),
            filter_index: vec![HashMap::new(); width],
            term_index: vec![HashMap::new(); width],
            stats: IndexStats::default(),
        }
    }

    /// Index a corpus under the default schema.
    pub fn build(corpus: Vec<FlatNode>) -> Result<Self> {
        let mut index = Self::default();
        index.insert_all(corpus)?;
        Ok(index)
    }

    /// Insert a whole corpus. Every record is checked against the schema
    /// before anything is stored, so on error the index is left untouched.
    pub fn insert_all(&mut self, corpus: Vec<FlatNode>) -> Result<usize> {
        let start = Instant::now();

        let mut rows = Vec::with_capacity(corpus.len());
        let mut batch_ids: HashSet<&str> = HashSet::with_capacity(corpus.len());
        for node in &corpus {
            if self.id_index.contains_key(&node.node_id) || !batch_ids.insert(&node.node_id) {
                return Err(IndexerError::InvariantViolation(format!(
                    "node id {} is already indexed",
                    node.node_id
                )));
            }
            rows.push(self.schema.project(node)?);
        }

        let inserted = corpus.len();
        for (node, row) in corpus.into_iter().zip(rows) {
            self.insert_validated(node, row);
        }
        self.update_stats();

        info!(
            "Indexed {} nodes in {:?} ({} total)",
            inserted,
            start.elapsed(),
            self.nodes.len()
        );
        Ok(inserted)
    }

    fn insert_validated(&mut self, node: FlatNode, row: Vec<Option<String>>) {
        let doc = self.nodes.len();
        self.id_index.insert(node.node_id.clone(), doc);

        for (slot, (value, (_, field_type))) in row.iter().zip(self.schema.fields()).enumerate() {
            let Some(value) = value else { continue };
            self.filter_index[slot]
                .entry(value.clone())
                .or_insert_with(Vec::new)
                .push(doc);

            if field_type == FieldType::String {
                let mut seen = HashSet::new();
                for token in tokenize(value) {
                    if seen.insert(token.clone()) {
                        self.term_index[slot]
                            .entry(token)
                            .or_insert_with(Vec::new)
                            .push(doc);
                    }
                }
            }
        }

        self.nodes.push(node);
        self.rows.push(row);
    }

    fn update_stats(&mut self) {
        let mut stats = IndexStats {
            total_nodes: self.nodes.len(),
            total_files: self.nodes.iter().filter(|n| n.root).count(),
            distinct_terms: self.term_index.iter().map(HashMap::len).sum(),
            skipped: std::mem::take(&mut self.stats.skipped),
            policy: self.stats.policy,
            ..IndexStats::default()
        };
        for node in &self.nodes {
            *stats.nodes_by_type.entry(node.node_type.clone()).or_insert(0) += 1;
            if let Some(kind) = &node.kind {
                *stats.nodes_by_kind.entry(kind.clone()).or_insert(0) += 1;
            }
        }
        self.stats = stats;
    }

    /// Attach the files a collection run could not index. The report is
    /// kept next to the corpus and surfaces through [`NodeIndex::stats`].
    pub fn record_skipped(
        &mut self,
        policy: FailurePolicy,
        skipped: impl IntoIterator<Item = SkippedFile>,
    ) {
        self.stats.policy = policy;
        self.stats.skipped.extend(skipped);
        let failures = self
            .stats
            .skipped
            .iter()
            .filter(|s| s.reason.is_failure())
            .count();
        if failures > 0 {
            warn!(
                "Index is partial: {} file(s) failed and were skipped under {:?}",
                failures, policy
            );
        }
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.stats.skipped
    }

    pub fn is_complete(&self) -> bool {
        self.stats.is_complete()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get(&self, node_id: &str) -> Option<&FlatNode> {
        self.id_index.get(node_id).and_then(|&doc| self.nodes.get(doc))
    }

    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Term search restricted by exact filters.
    ///
    /// Hits are ordered by score, highest first, then by corpus order. Only
    /// records satisfying every filter are ever returned.
    pub fn search(&self, params: &SearchParams) -> Result<SearchResult<'_>> {
        let start = Instant::now();

        let properties = self.resolve_properties(params.properties.as_deref())?;
        let candidates = self.filter_candidates(&params.filters)?;

        let term = params.term.trim();
        let mut scored: Vec<(usize, f64)> = if term.is_empty() {
            candidates.iter().map(|&doc| (doc, 0.0)).collect()
        } else {
            let exact = self.score_terms(term, &properties, &candidates);
            if exact.is_empty() && params.fuzzy {
                debug!("No token match for '{}', trying fuzzy", term);
                self.score_fuzzy(term, &properties, &candidates)
            } else {
                exact
            }
        };

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let total = scored.len();
        if let Some(limit) = params.limit {
            scored.truncate(limit);
        }

        let hits = scored
            .into_iter()
            .map(|(doc, score)| SearchHit {
                node: &self.nodes[doc],
                score,
            })
            .collect();

        let duration = start.elapsed().as_millis() as u64;
        debug!("Search '{}' matched {} nodes in {}ms", term, total, duration);
        Ok(QueryResult::new(hits, total, duration))
    }

    fn resolve_properties(&self, properties: Option<&[String]>) -> Result<Vec<usize>> {
        let names: Vec<&str> = match properties {
            Some(props) => props.iter().map(String::as_str).collect(),
            None => self.schema.searchable().iter().map(String::as_str).collect(),
        };
        names
            .into_iter()
            .map(|name| {
                let slot = self.schema.require(name)?;
                match self.schema.field_type(name) {
                    Some(FieldType::String) => Ok(slot),
                    _ => Err(IndexerError::UnknownField(format!(
                        "{} (not a text field)",
                        name
                    ))),
                }
            })
            .collect()
    }

    /// Sorted doc ids passing every filter. No filters means every doc.
    fn filter_candidates(&self, filters: &[(String, String)]) -> Result<Vec<usize>> {
        let mut candidates: Option<Vec<usize>> = None;

        for (field, value) in filters {
            let slot = self.schema.require(field)?;
            let postings = self.filter_index[slot]
                .get(value)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            candidates = Some(match candidates {
                None => postings.to_vec(),
                Some(current) => intersect(&current, postings),
            });
        }

        Ok(candidates.unwrap_or_else(|| (0..self.nodes.len()).collect()))
    }

    /// Sum of idf-weighted token matches over the selected properties.
    fn score_terms(&self, term: &str, properties: &[usize], candidates: &[usize]) -> Vec<(usize, f64)> {
        let tokens = tokenize(term);
        let allowed: HashSet<usize> = candidates.iter().copied().collect();
        let total_docs = self.nodes.len().max(1) as f64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for &slot in properties {
            for token in &tokens {
                let Some(postings) = self.term_index[slot].get(token) else {
                    continue;
                };
                let idf = (1.0 + total_docs / postings.len() as f64).ln();
                for doc in postings.iter().filter(|d| allowed.contains(*d)) {
                    *scores.entry(*doc).or_insert(0.0) += idf;
                }
            }
        }

        for (doc, score) in scores.iter_mut() {
            let exact_case = properties
                .iter()
                .any(|&slot| self.rows[*doc][slot].as_deref() == Some(term));
            if exact_case {
                *score += EXACT_CASE_BONUS;
            }
        }

        scores.into_iter().collect()
    }

    fn score_fuzzy(&self, term: &str, properties: &[usize], candidates: &[usize]) -> Vec<(usize, f64)> {
        let matcher = SkimMatcherV2::default();
        candidates
            .iter()
            .filter_map(|&doc| {
                properties
                    .iter()
                    .filter_map(|&slot| self.rows[doc][slot].as_deref())
                    .filter_map(|text| matcher.fuzzy_match(text, term))
                    .max()
                    .map(|best| (doc, best as f64 / 100.0))
            })
            .collect()
    }
}

/// Intersection of two ascending doc id lists.
fn intersect(a: &[usize], b: &[usize]) -> Vec<usize> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
