//! Translation completeness statistics
//!
//! A leaf is translated for a language when the translation document holds
//! a value at the leaf's path that is neither absent, null, nor the empty
//! string. Folder statistics are sums over the leaves below them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::keypath::{self, KeyNode};
use crate::models::Translations;

/// Translation state of one leaf key across the target languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafStatus {
    /// Translated in every target language (never with zero languages)
    Complete,
    /// Translated in some but not all target languages
    Partial,
    /// Translated in none of the target languages
    Missing,
}

/// Aggregate counts for a tree or subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: usize,
    /// Leaves complete in every target language
    pub translated: usize,
    pub partial: usize,
    pub missing: usize,
}

impl Stats {
    fn record(&mut self, status: LeafStatus) {
        self.total += 1;
        match status {
            LeafStatus::Complete => self.translated += 1,
            LeafStatus::Partial => self.partial += 1,
            LeafStatus::Missing => self.missing += 1,
        }
    }

    /// round(100 * complete / total), 0 for an empty tree
    pub fn progress(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.translated as f64 * 100.0) / self.total as f64).round() as u32
    }
}

impl std::ops::Add for Stats {
    type Output = Stats;

    fn add(self, other: Stats) -> Stats {
        Stats {
            total: self.total + other.total,
            translated: self.translated + other.translated,
            partial: self.partial + other.partial,
            missing: self.missing + other.missing,
        }
    }
}

/// True if `lang` has a non-blank value at `path`
pub fn is_translated(translations: &Translations, lang: &str, path: &str) -> bool {
    translations
        .get(lang)
        .and_then(|doc| keypath::get(doc, path))
        .is_some_and(|value| !value.is_blank())
}

pub fn leaf_status(path: &str, translations: &Translations, languages: &[String]) -> LeafStatus {
    let done = languages
        .iter()
        .filter(|lang| is_translated(translations, lang, path))
        .count();

    if done == 0 {
        LeafStatus::Missing
    } else if done == languages.len() {
        LeafStatus::Complete
    } else {
        LeafStatus::Partial
    }
}

/// Statistics over every leaf of `tree`
pub fn compute_stats(tree: &[KeyNode], translations: &Translations, languages: &[String]) -> Stats {
    let mut stats = Stats::default();
    for path in keypath::leaf_paths(tree) {
        stats.record(leaf_status(&path, translations, languages));
    }
    stats
}

/// Statistics over the leaves at or below `node`
pub fn node_stats(node: &KeyNode, translations: &Translations, languages: &[String]) -> Stats {
    compute_stats(std::slice::from_ref(node), translations, languages)
}

/// Memoised per-leaf statuses
///
/// Keyed by the identity of the shared translations map and leaf list plus
/// the language list. Editing a translation installs a new map, which is
/// what invalidates the cache.
#[derive(Debug, Default)]
pub struct StatsCache {
    translations: Option<Arc<Translations>>,
    leaves: Option<Arc<[String]>>,
    languages: Vec<String>,
    statuses: HashMap<String, LeafStatus>,
    totals: Stats,
    recomputations: usize,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_fresh(
        &self,
        translations: &Arc<Translations>,
        leaves: &Arc<[String]>,
        languages: &[String],
    ) -> bool {
        let same_translations = self
            .translations
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, translations));
        let same_leaves = self
            .leaves
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, leaves));
        same_translations && same_leaves && self.languages == languages
    }

    /// Recompute if any key component changed; returns true on recompute
    pub fn refresh(
        &mut self,
        translations: &Arc<Translations>,
        leaves: &Arc<[String]>,
        languages: &[String],
    ) -> bool {
        if self.is_fresh(translations, leaves, languages) {
            return false;
        }

        let mut statuses = HashMap::with_capacity(leaves.len());
        let mut totals = Stats::default();
        for path in leaves.iter() {
            let status = leaf_status(path, translations, languages);
            totals.record(status);
            statuses.insert(path.clone(), status);
        }

        self.translations = Some(Arc::clone(translations));
        self.leaves = Some(Arc::clone(leaves));
        self.languages = languages.to_vec();
        self.statuses = statuses;
        self.totals = totals;
        self.recomputations += 1;

        tracing::trace!(leaves = leaves.len(), "Recomputed completeness statistics");
        true
    }

    /// Aggregate statistics, recomputing only when stale
    pub fn stats(
        &mut self,
        translations: &Arc<Translations>,
        leaves: &Arc<[String]>,
        languages: &[String],
    ) -> Stats {
        self.refresh(translations, leaves, languages);
        self.totals
    }

    /// Cached status of one leaf (call [`StatsCache::refresh`] first)
    pub fn status(&self, path: &str) -> Option<LeafStatus> {
        self.statuses.get(path).copied()
    }

    /// Subtree statistics answered from the memoised statuses
    pub fn subtree(&self, node: &KeyNode) -> Stats {
        let mut stats = Stats::default();
        for path in keypath::leaf_paths(std::slice::from_ref(node)) {
            stats.record(self.status(&path).unwrap_or(LeafStatus::Missing));
        }
        stats
    }

    /// Number of full recomputations performed so far
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }
}
