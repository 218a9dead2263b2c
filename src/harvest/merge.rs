//! Source precedence and the provenance-aware merge.

use crate::model::{PartialRecord, RepositoryRecord, SourceKind};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Ordered source → rank table; rank 0 wins.
///
/// Sources missing from a custom order are appended in default order, so
/// every source always has a rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePrecedence {
    order: Vec<SourceKind>,
}

impl Default for SourcePrecedence {
    fn default() -> Self {
        Self {
            order: SourceKind::ALL.to_vec(),
        }
    }
}

impl SourcePrecedence {
    pub fn from_order(order: impl IntoIterator<Item = SourceKind>) -> Self {
        let mut ranked: Vec<SourceKind> = Vec::with_capacity(SourceKind::ALL.len());
        for kind in order.into_iter().chain(SourceKind::ALL) {
            if !ranked.contains(&kind) {
                ranked.push(kind);
            }
        }
        Self { order: ranked }
    }

    pub fn rank_of(&self, source: SourceKind) -> u8 {
        self.order
            .iter()
            .position(|kind| *kind == source)
            .unwrap_or(self.order.len()) as u8
    }

    pub fn ordered(&self) -> &[SourceKind] {
        &self.order
    }
}

impl FromStr for SourcePrecedence {
    type Err = String;

    /// Parses a comma separated list such as `self-hosted,re3data,fairsharing`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(SourceKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_order(kinds))
    }
}

/// Merges partial records into one record for `repo_uri`.
///
/// Partials are absorbed in rank order regardless of the order they arrive
/// in, so sequential and concurrent harvests merge identically.
pub fn merge_partials(
    repo_uri: &str,
    mut partials: Vec<PartialRecord>,
    precedence: &SourcePrecedence,
    at: DateTime<Utc>,
) -> RepositoryRecord {
    partials.sort_by_key(|partial| precedence.rank_of(partial.source));
    let mut record = RepositoryRecord::new(repo_uri);
    for partial in partials {
        let rank = precedence.rank_of(partial.source);
        record.absorb(partial, rank, at);
    }
    record
}
