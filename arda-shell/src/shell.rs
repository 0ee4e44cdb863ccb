//! Boot and shutdown of a running shell.
//!
//! The snapshot is restored before the persister and GC tasks start.

use std::sync::Arc;

use arda_query::{
    spawn_gc_task, spawn_persister, FileMedium, LmdbMedium, MemoryMedium, PersistenceBridge,
    QueryRuntime, RestoreReport, ResumeSummary, StorageMedium, DEFAULT_MAP_SIZE_MB,
};
use arda_router::{MemoryHistory, NavigationContext, NavigationScope, RouterAdapter};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::{MenuApi, MenuClient};
use crate::config::{ShellConfig, StorageConfig, StorageKind};
use crate::context::ModuleContext;
use crate::error::{ShellError, ShellResult};
use crate::menus::MenuService;

pub type ShellRouter = RouterAdapter<Arc<MemoryHistory>>;

/// Counters returned by [`Shell::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub snapshot_writes: u64,
    pub gc_removed: u64,
}

/// Open the configured storage medium.
pub fn open_medium(storage: &StorageConfig) -> ShellResult<Arc<dyn StorageMedium>> {
    let path = || {
        storage.path.clone().ok_or_else(|| {
            ShellError::Config(crate::config::ConfigError::InvalidValue {
                field: "storage.path".to_string(),
                reason: "required for file and lmdb media".to_string(),
            })
        })
    };
    let medium: Arc<dyn StorageMedium> = match storage.medium {
        StorageKind::Memory => Arc::new(MemoryMedium::new()),
        StorageKind::File => Arc::new(FileMedium::new(path()?)),
        StorageKind::Lmdb => {
            let map_size = storage.map_size_mb.unwrap_or(DEFAULT_MAP_SIZE_MB);
            Arc::new(LmdbMedium::open(path()?, map_size)?)
        }
    };
    Ok(medium)
}

/// A booted shell: one query runtime, one router, background tasks.
pub struct Shell {
    config: ShellConfig,
    runtime: QueryRuntime,
    history: Arc<MemoryHistory>,
    router: Arc<ShellRouter>,
    bridge: Arc<PersistenceBridge>,
    menus: MenuService,
    restore: RestoreReport,
    shutdown_tx: watch::Sender<bool>,
    persister: JoinHandle<u64>,
    gc: JoinHandle<u64>,
}

impl Shell {
    /// Boot against the configured medium and the REST menu service.
    pub async fn boot(config: ShellConfig) -> ShellResult<Self> {
        let medium = open_medium(&config.storage)?;
        let api = Arc::new(MenuClient::new(&config)?);
        Self::boot_with(config, medium, api).await
    }

    /// Boot with an explicit medium and menu API.
    pub async fn boot_with(
        config: ShellConfig,
        medium: Arc<dyn StorageMedium>,
        api: Arc<dyn MenuApi>,
    ) -> ShellResult<Self> {
        let history = Arc::new(MemoryHistory::starting_at(&config.initial_path)?);
        let router = Arc::new(RouterAdapter::new(Arc::clone(&history)));

        let runtime = QueryRuntime::from_config(&config.query);
        let menus = MenuService::register(runtime.clone(), api);

        let bridge = Arc::new(PersistenceBridge::new(medium, config.persistence.clone()));
        let restore = bridge.restore_into(&runtime).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let persister = spawn_persister(runtime.clone(), Arc::clone(&bridge), shutdown_rx.clone());
        let gc = spawn_gc_task(runtime.clone(), config.gc_interval(), shutdown_rx);

        tracing::info!(
            restored_entries = restore.entries,
            restored_mutations = restore.mutations,
            resumed = restore.resumed.succeeded,
            rejected = restore.rejected.is_some(),
            location = %router.current_location(),
            "Shell booted"
        );

        Ok(Self {
            config,
            runtime,
            history,
            router,
            bridge,
            menus,
            restore,
            shutdown_tx,
            persister,
            gc,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn runtime(&self) -> &QueryRuntime {
        &self.runtime
    }

    pub fn history(&self) -> &Arc<MemoryHistory> {
        &self.history
    }

    pub fn router(&self) -> &Arc<ShellRouter> {
        &self.router
    }

    pub fn bridge(&self) -> &Arc<PersistenceBridge> {
        &self.bridge
    }

    pub fn menus(&self) -> &MenuService {
        &self.menus
    }

    /// What the boot-time restore did.
    pub fn restore_report(&self) -> &RestoreReport {
        &self.restore
    }

    /// Capabilities for a hosted module. Every module shares the same router and runtime.
    pub fn module_context(&self) -> ModuleContext {
        let router: Arc<ShellRouter> = Arc::clone(&self.router);
        ModuleContext::new(NavigationScope::bind(router), self.runtime.clone())
    }

    /// Report connectivity. Going online resumes paused mutations.
    pub async fn set_online(&self, online: bool) -> ResumeSummary {
        self.runtime.set_online(online).await
    }

    /// Stop background tasks. The persister flushes pending changes first.
    pub async fn shutdown(self) -> ShellResult<ShutdownReport> {
        // Receivers only go away when both tasks have already exited.
        let _ = self.shutdown_tx.send(true);

        let snapshot_writes = self.persister.await.map_err(|e| ShellError::Task {
            task: "persister",
            reason: e.to_string(),
        })?;
        let gc_removed = self.gc.await.map_err(|e| ShellError::Task {
            task: "gc",
            reason: e.to_string(),
        })?;

        let report = ShutdownReport {
            snapshot_writes,
            gc_removed,
        };
        tracing::info!(
            snapshot_writes,
            gc_removed,
            degraded = self.bridge.is_degraded(),
            "Shell stopped"
        );
        Ok(report)
    }
}
