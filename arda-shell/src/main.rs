//! ARDA shell entry point.

use arda_router::NavigationContext;
use arda_shell::config::ShellConfig;
use arda_shell::error::ShellError;
use arda_shell::logging::init_tracing;
use arda_shell::Shell;

#[tokio::main]
async fn main() -> Result<(), ShellError> {
    let config = ShellConfig::load()?;
    init_tracing(&config.logging)?;

    let shell = Shell::boot(config).await?;
    let role = shell.config().default_role.clone();
    let mut menu = shell.menus().observe(&role);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                tracing::info!("Shutdown signal received");
                break;
            }
            event = menu.changed() => {
                if event.is_none() {
                    break;
                }
                match menu.state() {
                    Ok(Some(state)) => tracing::info!(
                        role = %role,
                        status = ?state.status,
                        items = state.data.as_ref().map_or(0, Vec::len),
                        stale = state.is_stale,
                        location = %shell.router().current_location(),
                        "Menu tree updated"
                    ),
                    Ok(None) => tracing::debug!(role = %role, "Menu tree evicted"),
                    Err(e) => tracing::warn!(role = %role, error = %e, "Menu tree unreadable"),
                }
            }
        }
    }

    drop(menu);
    let report = shell.shutdown().await?;
    tracing::info!(
        snapshot_writes = report.snapshot_writes,
        gc_removed = report.gc_removed,
        "Exiting"
    );
    Ok(())
}
