//! Schema versions and log positions.
//!
//! [`DatawalletVersion`] is the schema counter tracked twice: once for the
//! identity (shared, advanced by identity migrations) and once per device
//! (local, advanced by device migrations).
//!
//! [`ModificationIndex`] is a position in the identity's shared modification
//! log. Indices are dense and start at 0; "nothing consumed yet" is modelled
//! as `Option::<ModificationIndex>::None`, never as a sentinel value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A datawallet schema version.
#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DatawalletVersion(u32);

impl DatawalletVersion {
    /// The version of a datawallet nothing has been migrated into.
    pub const ZERO: Self = Self(0);

    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// The version one step above this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Iterate the versions strictly above `self` up to and including `target`.
    ///
    /// Empty when `target <= self`.
    pub fn steps_to(self, target: Self) -> impl Iterator<Item = DatawalletVersion> {
        (self.0 + 1..=target.0).map(Self)
    }
}

impl From<u32> for DatawalletVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for DatawalletVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Position of an entry in the shared modification log.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModificationIndex(u64);

impl ModificationIndex {
    pub const FIRST: Self = Self(0);

    pub const fn new(i: u64) -> Self {
        Self(i)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The index the next appended entry receives, given the last consumed one.
    pub fn after(last: Option<Self>) -> Self {
        last.map_or(Self::FIRST, Self::next)
    }

    /// `count` contiguous indices directly following `last`.
    pub fn range_after(
        last: Option<Self>,
        count: usize,
    ) -> impl Iterator<Item = ModificationIndex> {
        let start = Self::after(last).0;
        (start..start + count as u64).map(Self)
    }
}

impl fmt::Display for ModificationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
