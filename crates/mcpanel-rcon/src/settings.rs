use std::path::Path;

use tokio::fs;

use crate::{DEFAULT_RCON_PORT, RconConfig};

/// Read RCON settings from the instance's `server.properties`.
/// Returns `None` when the file does not exist.
pub async fn load_rcon_settings(instance_dir: &Path) -> Option<RconConfig> {
    let properties_path = instance_dir.join("server.properties");
    let content = fs::read_to_string(&properties_path).await.ok()?;
    Some(parse_server_properties(&content))
}

pub fn parse_server_properties(content: &str) -> RconConfig {
    let mut config = RconConfig::default();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        match key.trim() {
            "enable-rcon" => config.enabled = value.trim().eq_ignore_ascii_case("true"),
            "rcon.port" => config.port = value.trim().parse::<u16>().unwrap_or(DEFAULT_RCON_PORT),
            "rcon.password" => config.password = value.trim().to_string(),
            _ => {}
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rcon_keys_and_ignores_comments() {
        let content = "#Minecraft server properties\nenable-rcon=true\nrcon.port=25580\nrcon.password=hunter2\nmotd=A Server\n";
        let config = parse_server_properties(content);
        assert!(config.enabled);
        assert_eq!(config.port, 25580);
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.address(), "127.0.0.1:25580");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = parse_server_properties("enable-rcon=false\nrcon.port=abc\n");
        assert!(!config.enabled);
        assert_eq!(config.port, DEFAULT_RCON_PORT);
        assert!(config.password.is_empty());
    }
}
