//! Boot, module wiring and restart behaviour of the shell.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arda_core::{FetchError, NavigateOptions};
use arda_query::{MemoryMedium, MutationOutcome, PersistenceBridge, QueryRuntime, StorageMedium};
use arda_shell::api_client::reorder_items;
use arda_shell::{
    menu_tree_key, open_medium, MenuApi, MenuNode, ReorderRequest, Shell, ShellConfig,
    StorageConfig, StorageKind,
};
use arda_test_utils::fixtures::{fast_options, persistence_config, sample_menu_tree};
use async_trait::async_trait;

#[derive(Default)]
struct FakeMenuApi {
    tree_calls: AtomicUsize,
    reorders: Mutex<Vec<ReorderRequest>>,
}

impl FakeMenuApi {
    fn tree_calls(&self) -> usize {
        self.tree_calls.load(Ordering::SeqCst)
    }

    fn reorders(&self) -> Vec<ReorderRequest> {
        self.reorders.lock().unwrap().clone()
    }
}

#[async_trait]
impl MenuApi for FakeMenuApi {
    async fn menu_tree(&self, role: &str) -> Result<Vec<MenuNode>, FetchError> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        serde_json::from_value(sample_menu_tree(role)).map_err(|e| FetchError::decode(e.to_string()))
    }

    async fn reorder(&self, request: &ReorderRequest) -> Result<(), FetchError> {
        self.reorders.lock().unwrap().push(request.clone());
        Ok(())
    }
}

fn test_config() -> ShellConfig {
    ShellConfig::from_toml(
        r#"
        api_base_url = "http://127.0.0.1:9"
        request_timeout_ms = 1000
        default_role = "ADMIN"
        initial_path = "/menus"

        [query]
        stale_time_ms = 60000
        retry = 0

        [persistence]
        buster = "v1.0.0"
        throttle_ms = 50

        [storage]
        medium = "memory"
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn boot_serves_restored_tree_without_fetching() {
    let medium = Arc::new(MemoryMedium::new());
    let seed = QueryRuntime::new();
    seed.set_query_data(&menu_tree_key("ADMIN"), &sample_menu_tree("ADMIN"), &fast_options())
        .unwrap();
    assert!(PersistenceBridge::new(medium.clone(), persistence_config()).persist(&seed).await);

    let api = Arc::new(FakeMenuApi::default());
    let shell = Shell::boot_with(test_config(), medium, api.clone()).await.unwrap();
    assert_eq!(shell.restore_report().entries, 1);

    let tree = shell.menus().tree("ADMIN").await.unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[1].children[0].label, "Tenants");
    assert_eq!(api.tree_calls(), 0);

    shell.shutdown().await.unwrap();
}

#[tokio::test]
async fn modules_share_one_navigation_context() {
    let shell = Shell::boot_with(
        test_config(),
        Arc::new(MemoryMedium::new()),
        Arc::new(FakeMenuApi::default()),
    )
    .await
    .unwrap();

    let host = shell.module_context();
    let admin = shell.module_context();
    let before = shell.history().len();

    host.navigator()
        .unwrap()
        .navigate("/tenants", NavigateOptions::replace())
        .unwrap();

    assert_eq!(admin.navigator().unwrap().current_location().pathname, "/tenants");
    assert_eq!(shell.history().len(), before);

    // Both modules read the same cache.
    let runtime = host.query().unwrap();
    runtime
        .set_query_data(&menu_tree_key("USER"), &sample_menu_tree("USER"), &fast_options())
        .unwrap();
    let seen: Option<Vec<MenuNode>> = admin
        .query()
        .unwrap()
        .get_query_data(&menu_tree_key("USER"))
        .unwrap();
    assert_eq!(seen.map(|tree| tree.len()), Some(2));

    shell.shutdown().await.unwrap();
}

#[tokio::test]
async fn reorder_refreshes_menu_trees() {
    let api = Arc::new(FakeMenuApi::default());
    let shell = Shell::boot_with(test_config(), Arc::new(MemoryMedium::new()), api.clone())
        .await
        .unwrap();

    let tree = shell.menus().tree("ADMIN").await.unwrap();
    assert_eq!(api.tree_calls(), 1);

    let request = ReorderRequest {
        items: reorder_items(&tree),
    };
    let outcome = shell.menus().reorder(&request).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Completed(_)));
    assert_eq!(api.reorders(), vec![request]);

    let state = shell
        .runtime()
        .query_state::<Vec<MenuNode>>(&menu_tree_key("ADMIN"))
        .unwrap()
        .unwrap();
    assert!(state.is_stale);
    assert_eq!(state.data.map(|tree| tree.len()), Some(2));

    shell.menus().tree("ADMIN").await.unwrap();
    assert_eq!(api.tree_calls(), 2);

    shell.shutdown().await.unwrap();
}

#[tokio::test]
async fn offline_reorder_survives_restart() {
    let medium: Arc<dyn StorageMedium> = Arc::new(MemoryMedium::new());
    let request = ReorderRequest {
        items: reorder_items(
            &serde_json::from_value::<Vec<MenuNode>>(sample_menu_tree("ADMIN")).unwrap(),
        ),
    };

    let first_api = Arc::new(FakeMenuApi::default());
    let first = Shell::boot_with(test_config(), Arc::clone(&medium), first_api.clone())
        .await
        .unwrap();
    first.set_online(false).await;
    let outcome = first.menus().reorder(&request).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Paused(_)));

    let report = first.shutdown().await.unwrap();
    assert!(report.snapshot_writes >= 1);
    assert!(first_api.reorders().is_empty());

    let second_api = Arc::new(FakeMenuApi::default());
    let second = Shell::boot_with(test_config(), medium, second_api.clone())
        .await
        .unwrap();
    assert_eq!(second.restore_report().mutations, 1);
    assert_eq!(second.restore_report().resumed.succeeded, 1);
    assert_eq!(second_api.reorders(), vec![request]);

    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn configured_media_open_and_store() {
    let dir = tempfile::tempdir().unwrap();
    for (medium, path) in [
        (StorageKind::Memory, None),
        (StorageKind::File, Some(dir.path().join("file"))),
        (StorageKind::Lmdb, Some(dir.path().join("lmdb"))),
    ] {
        let storage = StorageConfig {
            medium,
            path,
            map_size_mb: None,
        };
        let opened = open_medium(&storage).unwrap();
        opened.set_item("arda-menu-cache", "{}").await.unwrap();
        assert_eq!(
            opened.get_item("arda-menu-cache").await.unwrap().as_deref(),
            Some("{}"),
            "{medium:?}"
        );
    }
}

#[test]
fn lmdb_medium_without_path_is_a_config_error() {
    let storage = StorageConfig {
        medium: StorageKind::Lmdb,
        path: None,
        map_size_mb: None,
    };
    assert!(matches!(
        open_medium(&storage),
        Err(arda_shell::ShellError::Config(_))
    ));
}
