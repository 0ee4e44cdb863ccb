//! ARDA application shell.
//!
//! The composition root for hosted modules: it loads configuration, opens
//! the storage medium, restores the shared query cache, starts the
//! persister and GC tasks, and hands each module a [`ModuleContext`] bound
//! to the shell's router and query runtime.

pub mod api_client;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod menus;
pub mod shell;

pub use api_client::{MenuApi, MenuClient, MenuNode, ReorderItem, ReorderRequest};
pub use config::{LogFormat, LoggingConfig, ShellConfig, StorageConfig, StorageKind};
pub use context::ModuleContext;
pub use error::{ShellError, ShellResult};
pub use menus::{menu_tree_key, reorder_key, MenuService, MENUS_NAMESPACE};
pub use shell::{open_medium, Shell, ShellRouter, ShutdownReport};
