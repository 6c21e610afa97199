//! Tree catalog and committed state.

use crate::tree::{Tree, TreeOptions};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handle to an open tree.
///
/// Handles are stable for the lifetime of the environment and index into
/// the committed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dbi(pub(crate) u32);

impl Dbi {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Dbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dbi:{}", self.0)
    }
}

/// Metadata persisted per tree.
#[derive(Debug, Clone)]
pub(crate) struct TreeInfo {
    pub(crate) name: String,
    pub(crate) options: TreeOptions,
    /// Monotonic per-tree counter with atomic fetch-then-add semantics.
    pub(crate) sequence: u64,
}

/// An immutable, committed view of the whole environment.
///
/// Read transactions hold a reference to one of these; commit publishes a
/// new one. Trees are individually reference-counted so a commit that
/// touches one tree shares the rest.
#[derive(Debug, Default, Clone)]
pub(crate) struct CommittedState {
    /// Name to handle, ordered for deterministic persistence.
    pub(crate) catalog: BTreeMap<String, Dbi>,
    pub(crate) infos: HashMap<u32, TreeInfo>,
    pub(crate) trees: HashMap<u32, Arc<Tree>>,
    pub(crate) next_dbi: u32,
}

impl CommittedState {
    pub(crate) fn tree(&self, dbi: Dbi) -> Option<&Arc<Tree>> {
        self.trees.get(&dbi.0)
    }

    pub(crate) fn info(&self, dbi: Dbi) -> Option<&TreeInfo> {
        self.infos.get(&dbi.0)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Dbi> {
        self.catalog.get(name).copied()
    }

    /// Total number of values across all trees.
    pub(crate) fn total_entries(&self) -> u64 {
        self.trees.values().map(|t| t.value_count()).sum()
    }

    /// Approximate bytes held by keys and values across all trees.
    pub(crate) fn total_bytes(&self) -> u64 {
        self.trees.values().map(|t| t.bytes_used()).sum()
    }
}
