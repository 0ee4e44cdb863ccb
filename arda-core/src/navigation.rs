//! Navigation state published to federated modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location as seen by consumers. `search` is kept raw, including the `?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NavigationState {
    pub pathname: String,
    pub search: String,
}

impl NavigationState {
    pub fn new(pathname: impl Into<String>, search: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            search: search.into(),
        }
    }

    /// The root location `/`.
    pub fn root() -> Self {
        Self::new("/", "")
    }

    /// Split a navigation target into pathname and raw search.
    ///
    /// Any `#fragment` is dropped; it never reaches the engine.
    pub fn from_path(path: &str) -> Self {
        let without_fragment = path.split('#').next().unwrap_or_default();
        match without_fragment.find('?') {
            Some(idx) => Self::new(&without_fragment[..idx], &without_fragment[idx..]),
            None => Self::new(without_fragment, ""),
        }
    }

    /// Pathname and search joined back together.
    pub fn href(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

/// Options for a single navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigateOptions {
    /// Overwrite the current history entry instead of pushing a new one.
    pub replace: bool,
}

impl NavigateOptions {
    pub fn push() -> Self {
        Self { replace: false }
    }

    pub fn replace() -> Self {
        Self { replace: true }
    }
}
