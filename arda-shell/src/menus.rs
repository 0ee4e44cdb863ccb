//! Menu tree queries and the reorder mutation.

use std::sync::Arc;

use arda_core::{query_key, FetchError, QueryKey};
use arda_query::{
    MutationDefinition, MutationOutcome, QueryFilter, QueryObserver, QueryOptions, QueryResult,
    QueryRuntime,
};
use futures_util::future::BoxFuture;

use crate::api_client::{MenuApi, MenuNode, ReorderRequest};

pub const MENUS_NAMESPACE: &str = "menus";

/// Cache key of the tree served to `role`.
pub fn menu_tree_key(role: &str) -> QueryKey {
    query_key![MENUS_NAMESPACE, role]
}

/// Mutation key of the reorder operation.
pub fn reorder_key() -> QueryKey {
    query_key![MENUS_NAMESPACE, "reorder"]
}

/// Menu queries bound to one runtime and one API.
#[derive(Clone)]
pub struct MenuService {
    runtime: QueryRuntime,
    api: Arc<dyn MenuApi>,
}

impl MenuService {
    /// Register the reorder mutation on `runtime` and return the service.
    ///
    /// A successful reorder invalidates every cached menu tree.
    pub fn register(runtime: QueryRuntime, api: Arc<dyn MenuApi>) -> Self {
        let reorder_api = Arc::clone(&api);
        let definition = MutationDefinition::new(move |request: ReorderRequest| {
            let api = Arc::clone(&reorder_api);
            async move { api.reorder(&request).await }
        })
        .invalidates(QueryFilter::namespace(MENUS_NAMESPACE));
        runtime.register_mutation(reorder_key(), definition);
        Self { runtime, api }
    }

    pub fn runtime(&self) -> &QueryRuntime {
        &self.runtime
    }

    fn fetcher(&self, role: &str) -> impl Fn() -> BoxFuture<'static, Result<Vec<MenuNode>, FetchError>> + Send + Sync + 'static {
        let api = Arc::clone(&self.api);
        let role = role.to_string();
        move || -> BoxFuture<'static, Result<Vec<MenuNode>, FetchError>> {
            let api = Arc::clone(&api);
            let role = role.clone();
            Box::pin(async move { api.menu_tree(&role).await })
        }
    }

    /// The tree for `role`, from cache when fresh.
    pub async fn tree(&self, role: &str) -> QueryResult<Vec<MenuNode>> {
        self.runtime
            .fetch(menu_tree_key(role), self.fetcher(role), self.runtime.default_options())
            .await
    }

    /// Warm the cache for `role` without surfacing failures.
    pub async fn prefetch(&self, role: &str, options: QueryOptions) {
        self.runtime
            .prefetch(menu_tree_key(role), self.fetcher(role), options)
            .await;
    }

    /// Keep the tree for `role` cached and refreshed while the observer lives.
    pub fn observe(&self, role: &str) -> QueryObserver<Vec<MenuNode>> {
        self.runtime
            .observe(menu_tree_key(role), self.fetcher(role), self.runtime.default_options())
    }

    /// Submit a reorder. Offline submissions are paused until connectivity returns.
    pub async fn reorder(&self, request: &ReorderRequest) -> QueryResult<MutationOutcome> {
        self.runtime.mutate(reorder_key(), request).await
    }
}

