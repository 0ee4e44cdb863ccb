//! Adapter exposing a concrete engine as a [`NavigationContext`].

use std::fmt;

use arda_core::{NavigateOptions, NavigationError, NavigationState};
use tokio::sync::watch;

use crate::context::{NavigationContext, NavigationEngine};

/// Pass-through wrapper around the host's navigation engine.
///
/// Nothing is buffered or queued. Successful navigations are published to
/// subscribers; engine errors come back unchanged.
pub struct RouterAdapter<E> {
    engine: E,
    publisher: watch::Sender<NavigationState>,
}

impl<E: NavigationEngine> RouterAdapter<E> {
    pub fn new(engine: E) -> Self {
        let (publisher, _) = watch::channel(engine.location());
        Self { engine, publisher }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Re-publish the engine's location after a change the adapter did not
    /// make, such as back/forward on the host. Returns whether it changed.
    pub fn sync(&self) -> bool {
        let location = self.engine.location();
        self.publisher.send_if_modified(|current| {
            if *current == location {
                return false;
            }
            *current = location;
            true
        })
    }
}

impl<E: NavigationEngine> NavigationContext for RouterAdapter<E> {
    fn navigate(&self, path: &str, options: NavigateOptions) -> Result<(), NavigationError> {
        let result = if options.replace {
            self.engine.replace(path)
        } else {
            self.engine.push(path)
        };
        if let Err(e) = &result {
            tracing::debug!(path, replace = options.replace, error = %e, "Navigation rejected");
            return result;
        }
        tracing::debug!(path, replace = options.replace, "Navigated");
        // Published even when unchanged so subscribers see every navigation.
        self.publisher.send_replace(self.engine.location());
        Ok(())
    }

    fn current_location(&self) -> NavigationState {
        self.engine.location()
    }

    fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.publisher.subscribe()
    }
}

impl<E: fmt::Debug> fmt::Debug for RouterAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterAdapter")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use std::sync::Arc;

    #[test]
    fn test_replace_does_not_grow_history() {
        let history = Arc::new(MemoryHistory::starting_at("/menus").unwrap());
        let adapter = RouterAdapter::new(Arc::clone(&history));

        adapter.navigate("/tenants", NavigateOptions::replace()).unwrap();
        assert_eq!(adapter.current_location().pathname, "/tenants");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_subscribers_see_navigation() {
        let adapter = RouterAdapter::new(MemoryHistory::new());
        let mut rx = adapter.subscribe();
        assert!(!rx.has_changed().unwrap());

        adapter.navigate("/menus?role=ADMIN", NavigateOptions::push()).unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.pathname, "/menus");
        assert_eq!(seen.search, "?role=ADMIN");
    }

    #[test]
    fn test_engine_error_propagates_unchanged() {
        let adapter = RouterAdapter::new(MemoryHistory::new());
        let mut rx = adapter.subscribe();
        let err = adapter.navigate("menus", NavigateOptions::push()).unwrap_err();
        assert_eq!(
            err,
            NavigationError::InvalidPath {
                path: "menus".to_string(),
                reason: "must start with '/'".to_string(),
            }
        );
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_sync_publishes_host_changes() {
        let history = Arc::new(MemoryHistory::new());
        let adapter = RouterAdapter::new(Arc::clone(&history));
        adapter.navigate("/menus", NavigateOptions::push()).unwrap();

        assert!(history.back());
        assert_eq!(adapter.current_location(), NavigationState::root());
        assert!(adapter.sync());
        assert_eq!(*adapter.subscribe().borrow(), NavigationState::root());
        assert!(!adapter.sync());
    }
}
