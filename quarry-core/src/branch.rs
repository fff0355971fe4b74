//! Remote branch layout.
//!
//! A repository root holds a fixed set of well-known directories, each one a
//! branch kind. The mapping is a static table turned into a
//! [`BranchRegistry`] at process start.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of source content stored under one remote directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    /// Active development line; working copies are built from source.
    #[default]
    Development,
    /// Tagged releases.
    Release,
}

impl BranchKind {
    /// Remote directory name under the repository root.
    pub fn remote_dir(self) -> &'static str {
        match self {
            BranchKind::Development => "dev",
            BranchKind::Release => "releases",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchKind::Development => write!(f, "development"),
            BranchKind::Release => write!(f, "release"),
        }
    }
}

const BRANCH_TABLE: &[BranchKind] = &[BranchKind::Development, BranchKind::Release];

/// Lookup from remote directory name to branch kind.
#[derive(Debug, Clone)]
pub struct BranchRegistry {
    by_remote_dir: BTreeMap<&'static str, BranchKind>,
}

impl BranchRegistry {
    /// Registry populated from the built-in table.
    pub fn builtin() -> Self {
        Self {
            by_remote_dir: BRANCH_TABLE
                .iter()
                .map(|kind| (kind.remote_dir(), *kind))
                .collect(),
        }
    }

    pub fn kind_for(&self, remote_dir: &str) -> Option<BranchKind> {
        self.by_remote_dir.get(remote_dir).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = BranchKind> + '_ {
        self.by_remote_dir.values().copied()
    }
}

impl Default for BranchRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dev", Some(BranchKind::Development))]
    #[case("releases", Some(BranchKind::Release))]
    #[case("trunk", None)]
    #[case("config", None)]
    fn registry_maps_remote_dirs(#[case] dir: &str, #[case] expected: Option<BranchKind>) {
        assert_eq!(BranchRegistry::builtin().kind_for(dir), expected);
    }

    #[test]
    fn every_kind_is_registered() {
        let registry = BranchRegistry::builtin();
        assert_eq!(registry.kinds().count(), BRANCH_TABLE.len());
    }
}
