//! Navigation capability traits and the scope that binds them.

use std::fmt;
use std::sync::Arc;

use arda_core::{ContextError, NavigateOptions, NavigationError, NavigationState};
use tokio::sync::watch;

/// Capability handed to modules for reading and changing the location.
pub trait NavigationContext: Send + Sync {
    /// Move to `path`. Errors from the underlying engine are returned unchanged.
    fn navigate(&self, path: &str, options: NavigateOptions) -> Result<(), NavigationError>;

    /// The engine's location right now.
    fn current_location(&self) -> NavigationState;

    /// Receiver that always holds the latest published location.
    fn subscribe(&self) -> watch::Receiver<NavigationState>;
}

/// Primitive operations of a concrete host router.
pub trait NavigationEngine: Send + Sync {
    fn push(&self, path: &str) -> Result<(), NavigationError>;

    fn replace(&self, path: &str) -> Result<(), NavigationError>;

    fn location(&self) -> NavigationState;
}

impl<E: NavigationEngine + ?Sized> NavigationEngine for Arc<E> {
    fn push(&self, path: &str) -> Result<(), NavigationError> {
        (**self).push(path)
    }

    fn replace(&self, path: &str) -> Result<(), NavigationError> {
        (**self).replace(path)
    }

    fn location(&self) -> NavigationState {
        (**self).location()
    }
}

const NAVIGATION_CAPABILITY: &str = "navigation";

/// Binding point for the navigation capability.
///
/// Created unbound and bound once at the composition root. Handing out a
/// [`Navigator`] from an unbound scope is a wiring bug and fails immediately.
#[derive(Clone, Default)]
pub struct NavigationScope {
    context: Option<Arc<dyn NavigationContext>>,
}

impl NavigationScope {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn bind(context: Arc<dyn NavigationContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.context.is_some()
    }

    pub fn navigator(&self) -> Result<Navigator, ContextError> {
        self.context
            .clone()
            .map(|context| Navigator { context })
            .ok_or(ContextError::ContextMissing {
                capability: NAVIGATION_CAPABILITY,
            })
    }
}

impl fmt::Debug for NavigationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationScope")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Module-side handle on the bound navigation capability.
#[derive(Clone)]
pub struct Navigator {
    context: Arc<dyn NavigationContext>,
}

impl Navigator {
    pub fn navigate(&self, path: &str, options: NavigateOptions) -> Result<(), NavigationError> {
        self.context.navigate(path, options)
    }

    pub fn push(&self, path: &str) -> Result<(), NavigationError> {
        self.navigate(path, NavigateOptions::push())
    }

    pub fn replace(&self, path: &str) -> Result<(), NavigationError> {
        self.navigate(path, NavigateOptions::replace())
    }

    pub fn current_location(&self) -> NavigationState {
        self.context.current_location()
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.context.subscribe()
    }

    pub fn context(&self) -> Arc<dyn NavigationContext> {
        Arc::clone(&self.context)
    }
}

impl fmt::Debug for Navigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigator")
            .field("location", &self.current_location())
            .finish()
    }
}
