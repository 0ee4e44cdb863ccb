//! ARDA Router
//!
//! Routing indirection for modules loaded into the shell. Modules never see
//! the host's navigation engine; they hold an `Arc<dyn NavigationContext>`
//! bound once at the composition root through a [`NavigationScope`].

pub mod adapter;
pub mod context;
pub mod history;

pub use adapter::RouterAdapter;
pub use context::{NavigationContext, NavigationEngine, NavigationScope, Navigator};
pub use history::MemoryHistory;

pub use arda_core::{ContextError, NavigateOptions, NavigationError, NavigationState};
