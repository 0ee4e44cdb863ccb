//! In-memory history stack engine.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use arda_core::{NavigationError, NavigationState};

use crate::context::NavigationEngine;

#[derive(Debug)]
struct Stack {
    entries: Vec<NavigationState>,
    index: usize,
}

impl Stack {
    fn current(&self) -> &NavigationState {
        // `index` always points into a non-empty `entries`.
        &self.entries[self.index]
    }
}

/// History stack held in memory, for hosts without a browser and for tests.
///
/// `push` drops forward entries and appends; `replace` overwrites the
/// current entry.
pub struct MemoryHistory {
    stack: Mutex<Stack>,
}

fn parse(path: &str) -> Result<NavigationState, NavigationError> {
    if !path.starts_with('/') {
        return Err(NavigationError::InvalidPath {
            path: path.to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
    Ok(NavigationState::from_path(path))
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::with_initial(NavigationState::root())
    }

    pub fn with_initial(initial: NavigationState) -> Self {
        Self {
            stack: Mutex::new(Stack {
                entries: vec![initial],
                index: 0,
            }),
        }
    }

    /// Start at `path`.
    pub fn starting_at(path: &str) -> Result<Self, NavigationError> {
        parse(path).map(Self::with_initial)
    }

    fn stack(&self) -> MutexGuard<'_, Stack> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of entries in the stack.
    pub fn len(&self) -> usize {
        self.stack().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn index(&self) -> usize {
        self.stack().index
    }

    /// Step back one entry. Returns false at the start of history.
    pub fn back(&self) -> bool {
        let mut stack = self.stack();
        if stack.index == 0 {
            return false;
        }
        stack.index -= 1;
        true
    }

    /// Step forward one entry. Returns false at the end of history.
    pub fn forward(&self) -> bool {
        let mut stack = self.stack();
        if stack.index + 1 >= stack.entries.len() {
            return false;
        }
        stack.index += 1;
        true
    }

    pub fn entries(&self) -> Vec<NavigationState> {
        self.stack().entries.clone()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.stack();
        f.debug_struct("MemoryHistory")
            .field("len", &stack.entries.len())
            .field("index", &stack.index)
            .field("current", stack.current())
            .finish()
    }
}

impl NavigationEngine for MemoryHistory {
    fn push(&self, path: &str) -> Result<(), NavigationError> {
        let state = parse(path)?;
        let mut stack = self.stack();
        let keep = stack.index + 1;
        stack.entries.truncate(keep);
        stack.entries.push(state);
        stack.index = keep;
        Ok(())
    }

    fn replace(&self, path: &str) -> Result<(), NavigationError> {
        let state = parse(path)?;
        let mut stack = self.stack();
        let index = stack.index;
        stack.entries[index] = state;
        Ok(())
    }

    fn location(&self) -> NavigationState {
        self.stack().current().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_truncates_forward_entries() {
        let history = MemoryHistory::new();
        history.push("/menus").unwrap();
        history.push("/tenants").unwrap();
        assert!(history.back());
        history.push("/settings").unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history.location().pathname, "/settings");
        assert!(!history.forward());
    }

    #[test]
    fn test_replace_keeps_length() {
        let history = MemoryHistory::starting_at("/menus").unwrap();
        history.replace("/tenants?page=2").unwrap();
        assert_eq!(history.len(), 1);
        let location = history.location();
        assert_eq!(location.pathname, "/tenants");
        assert_eq!(location.search, "?page=2");
    }

    #[test]
    fn test_rejects_relative_path() {
        let history = MemoryHistory::new();
        let err = history.push("tenants").unwrap_err();
        assert!(matches!(err, NavigationError::InvalidPath { .. }));
        assert_eq!(history.len(), 1);
        assert!(MemoryHistory::starting_at("").is_err());
    }

    #[test]
    fn test_back_and_forward_bounds() {
        let history = MemoryHistory::new();
        assert!(!history.back());
        history.push("/a").unwrap();
        assert!(history.back());
        assert_eq!(history.location(), NavigationState::root());
        assert!(history.forward());
        assert_eq!(history.index(), 1);
    }
}
