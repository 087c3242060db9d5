//! Flag sync filter
//!
//! Restricts which flag definitions are fetched. The query string form is
//! persisted next to the cache so a changed filter can be detected on the
//! next start and stale definitions removed.

use crate::error::{SyncError, SyncResult};
use crate::models::FeatureFlag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const MAX_NAMES: usize = 400;
const MAX_PREFIXES: usize = 50;
const PREFIX_SEPARATOR: &str = "__";

/// Name, prefix and set allow-lists. Sets take precedence over the other two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFilter {
    pub names: BTreeSet<String>,
    pub prefixes: BTreeSet<String>,
    pub sets: BTreeSet<String>,
}

impl SyncFilter {
    pub fn by_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn by_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn by_sets<I, S>(sets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sets: sets.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.prefixes.is_empty() && self.sets.is_empty()
    }

    /// Query string sent with flag fetches, e.g. `&names=a,b&prefixes=p`
    ///
    /// Values come out sorted because the sets are ordered.
    pub fn query_string(&self) -> String {
        if !self.sets.is_empty() {
            return format!("&sets={}", join(&self.sets));
        }

        let mut query = String::new();
        if !self.names.is_empty() {
            query.push_str("&names=");
            query.push_str(&join(&self.names));
        }
        if !self.prefixes.is_empty() {
            query.push_str("&prefixes=");
            query.push_str(&join(&self.prefixes));
        }
        query
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.names.len() > MAX_NAMES {
            return Err(SyncError::InvalidConfig(format!(
                "sync filter allows at most {} names, got {}",
                MAX_NAMES,
                self.names.len()
            )));
        }
        if self.prefixes.len() > MAX_PREFIXES {
            return Err(SyncError::InvalidConfig(format!(
                "sync filter allows at most {} prefixes, got {}",
                MAX_PREFIXES,
                self.prefixes.len()
            )));
        }
        Ok(())
    }

    /// Whether a cached flag is still covered by this filter
    pub fn keeps(&self, flag: &FeatureFlag) -> bool {
        if !self.sets.is_empty() && self.sets.is_disjoint(&flag.sets) {
            return false;
        }

        match flag_prefix(&flag.name) {
            None => self.names.is_empty() || self.names.contains(&flag.name),
            Some(prefix) => self.prefixes.is_empty() || self.prefixes.contains(prefix),
        }
    }

    /// Names of cached flags the filter no longer covers
    pub fn flags_to_delete(&self, cached: &[FeatureFlag]) -> Vec<String> {
        cached
            .iter()
            .filter(|flag| !self.keeps(flag))
            .map(|flag| flag.name.clone())
            .collect()
    }
}

/// Part of `name` before the first `__`, when both sides are non-empty
pub fn flag_prefix(name: &str) -> Option<&str> {
    let (prefix, rest) = name.split_once(PREFIX_SEPARATOR)?;
    if prefix.is_empty() || rest.is_empty() {
        return None;
    }
    Some(prefix)
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
