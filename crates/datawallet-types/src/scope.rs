//! What a caller asks a synchronization to cover.

use serde::{Deserialize, Serialize};

/// Requested synchronization scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncScope {
    /// External events plus datawallet reconciliation.
    Everything,
    /// Datawallet pull/push only.
    OnlyDatawallet,
}

impl SyncScope {
    /// Whether a running sync of scope `self` also satisfies a request for `requested`.
    ///
    /// `Everything` covers both scopes; `OnlyDatawallet` covers only itself.
    pub fn covers(self, requested: SyncScope) -> bool {
        match self {
            SyncScope::Everything => true,
            SyncScope::OnlyDatawallet => requested == SyncScope::OnlyDatawallet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::Everything => "everything",
            SyncScope::OnlyDatawallet => "only_datawallet",
        }
    }
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
