//! Capabilities handed to each hosted module.

use arda_core::ContextError;
use arda_query::QueryRuntime;
use arda_router::{NavigationScope, Navigator};

const QUERY_CAPABILITY: &str = "query";

/// What a module may use: navigation and the shared query runtime.
///
/// Built once at the composition root and cloned into each module.
/// Asking for a capability that was never bound fails with
/// [`ContextError::ContextMissing`].
#[derive(Clone, Default)]
pub struct ModuleContext {
    navigation: NavigationScope,
    query: Option<QueryRuntime>,
}

impl ModuleContext {
    /// Context with nothing bound.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(navigation: NavigationScope, query: QueryRuntime) -> Self {
        Self {
            navigation,
            query: Some(query),
        }
    }

    pub fn with_navigation(mut self, navigation: NavigationScope) -> Self {
        self.navigation = navigation;
        self
    }

    pub fn with_query(mut self, query: QueryRuntime) -> Self {
        self.query = Some(query);
        self
    }

    pub fn navigator(&self) -> Result<Navigator, ContextError> {
        self.navigation.navigator()
    }

    pub fn query(&self) -> Result<QueryRuntime, ContextError> {
        self.query.clone().ok_or(ContextError::ContextMissing {
            capability: QUERY_CAPABILITY,
        })
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("navigation", &self.navigation.is_bound())
            .field("query", &self.query.is_some())
            .finish()
    }
}
