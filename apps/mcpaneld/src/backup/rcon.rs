use mcpanel_rcon::RconClient;
use tracing::{info, warn};

/// Flush the world and pause autosave so the archive sees a consistent copy.
/// Returns true if saves were paused and must be resumed afterwards.
pub(crate) async fn pause_saves(rcon: Option<&RconClient>, server_running: bool) -> bool {
    let Some(client) = rcon.filter(|client| client.rcon_enabled()) else {
        return false;
    };
    if !server_running {
        return false;
    }

    if let Err(err) = client.exec("save-all").await {
        warn!("rcon save-all failed: {}", err);
        return false;
    }
    if let Err(err) = client.exec("save-off").await {
        warn!("rcon save-off failed: {}", err);
        return false;
    }
    info!("autosave paused for backup");
    true
}

pub(crate) async fn resume_saves(rcon: Option<&RconClient>) {
    if let Some(client) = rcon {
        if let Err(err) = client.exec("save-on").await {
            warn!("rcon save-on failed: {}", err);
        }
    }
}
