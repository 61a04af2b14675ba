use async_trait::async_trait;
use minecraft_client_rs::Client;
use tokio::task::spawn_blocking;

use crate::{RconConnector, RconError, RconSession};

/// Production transport backed by the blocking `minecraft-client-rs` client.
/// Every wire call runs on the blocking pool.
pub struct MinecraftConnector;

#[async_trait]
impl RconConnector for MinecraftConnector {
    async fn connect(&self, address: &str, password: &str) -> Result<Box<dyn RconSession>, RconError> {
        let target = address.to_string();
        let password = password.to_string();

        let client = spawn_blocking(move || {
            let mut client = Client::new(target).map_err(|err| err.to_string())?;
            client
                .authenticate(password)
                .map_err(|err| format!("authentication failed: {err}"))?;
            Ok::<_, String>(client)
        })
        .await
        .map_err(|err| RconError::Connect {
            address: address.to_string(),
            message: format!("RCON task failed: {err}"),
        })?
        .map_err(|message| RconError::Connect {
            address: address.to_string(),
            message,
        })?;

        Ok(Box::new(MinecraftSession { client: Some(client) }))
    }
}

struct MinecraftSession {
    client: Option<Client>,
}

#[async_trait]
impl RconSession for MinecraftSession {
    async fn send(&mut self, command: &str) -> Result<String, RconError> {
        let mut client = self
            .client
            .take()
            .ok_or_else(|| RconError::Send("session already closed".into()))?;
        let command = command.to_string();

        let (client, result) = spawn_blocking(move || {
            let result = client
                .send_command(command)
                .map(|message| message.body)
                .map_err(|err| err.to_string());
            (client, result)
        })
        .await
        .map_err(|err| RconError::Send(format!("RCON task failed: {err}")))?;

        self.client = Some(client);
        result.map_err(RconError::Send)
    }

    async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            let _ = spawn_blocking(move || client.close().map_err(|err| err.to_string())).await;
        }
    }
}
