use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::discovery::ClientOptions;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Discovery server, `host:port` or `tcp://host:port`.
    pub server_uri: String,
    /// Identity attached to every discovery request.
    pub node_id: String,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    pub dns_bind: SocketAddr,
    /// Services to start watching at boot instead of on first query.
    pub watch: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_uri: "127.0.0.1:18000".into(),
            node_id: "meshglue".into(),
            backoff_initial_ms: 200,
            backoff_max_ms: 10_000,
            bind_ip: None,
            dns_bind: SocketAddr::from(([127, 0, 0, 1], 5353)),
            watch: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("meshglue.toml"))
                .merge(Json::file("meshglue.json"))
                .merge(Env::prefixed("MESHGLUE_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Identity may be mounted as a file
        if let Ok(node_id_file) = std::env::var("MESHGLUE_NODE_ID_FILE") {
            config.node_id = std::fs::read_to_string(&node_id_file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", node_id_file, e))?
                .trim()
                .to_string();
        }

        // If bind_ip is set, override the IP part of dns_bind
        if let Some(ref ip) = config.bind_ip {
            let port = config.dns_bind.port();
            config.dns_bind = format!("{}:{}", ip, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.is_empty() {
            anyhow::bail!("node_id must not be empty");
        }
        if self.backoff_initial_ms == 0 {
            anyhow::bail!("backoff_initial_ms must be greater than zero");
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            anyhow::bail!(
                "backoff_max_ms ({}) is lower than backoff_initial_ms ({})",
                self.backoff_max_ms,
                self.backoff_initial_ms
            );
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            node_id: self.node_id.clone(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(self.backoff_initial_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
        }
    }
}
