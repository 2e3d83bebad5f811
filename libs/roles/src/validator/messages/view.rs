//! View and epoch numbers.
use std::fmt;

/// A round of the protocol. Exactly one leader proposes per view.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View(pub u64);

impl View {
    /// View of the genesis vertex of every epoch.
    pub const fn genesis() -> Self {
        Self(0)
    }

    /// Whether this is the genesis view.
    pub fn is_genesis(self) -> bool {
        self.0 == 0
    }

    /// Get the next view number.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the previous view number.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for View {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// A validator set epoch. The validator set is fixed for the duration of an epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Get the next epoch number.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the previous epoch number.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}
