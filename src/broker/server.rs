//! Broker Server
//!
//! Serves the broker REST API until the process receives Ctrl-C.

use super::rest::BrokerRouter;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    /// REST API bind address
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Seconds a finished operation stays available for polling
    pub operation_retention_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            request_timeout_secs: 30,
            operation_retention_secs: 3600,
        }
    }
}

// =============================================================================
// Broker Server
// =============================================================================

pub struct BrokerServer {
    config: BrokerConfig,
    router: BrokerRouter,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig, router: BrokerRouter) -> Self {
        Self { config, router }
    }

    /// Serve until shutdown
    pub async fn run(self) -> Result<()> {
        let app = self.router.build().layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    self.config.request_timeout_secs,
                ))),
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind broker: {}", e)))?;
        info!("Broker listening on {}", self.config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Broker shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Broker server error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.bind_addr.port(), 8090);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.operation_retention_secs, 3600);
    }

    #[test]
    fn test_config_from_json() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"bindAddr":"127.0.0.1:9000","operationRetentionSecs":600}"#)
                .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.operation_retention_secs, 600);
    }
}
