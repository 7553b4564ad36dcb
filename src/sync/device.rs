//! Device conditions the sync client and scheduler depend on.

use std::future::Future;
use std::time::Duration;

use super::transport::{HttpTransport, TransportError};

/// Connectivity and power state of the device.
pub trait DeviceState: Send + Sync {
    fn is_network_available(&self) -> impl Future<Output = bool> + Send;

    /// Periodic sync is deferred while this is true.
    fn is_battery_low(&self) -> bool {
        false
    }
}

/// Treats the network as available when the server's health endpoint answers.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    transport: HttpTransport,
}

impl HealthProbe {
    pub const TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpTransport::new(server_url, Self::TIMEOUT)?,
        })
    }
}

impl DeviceState for HealthProbe {
    async fn is_network_available(&self) -> bool {
        match self.transport.health().await {
            Ok(health) => health.status == "ok",
            Err(e) => {
                tracing::debug!("Server not reachable: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_means_no_network() {
        let probe = HealthProbe::new("http://127.0.0.1:9").unwrap();

        assert!(!probe.is_network_available().await);
        assert!(!probe.is_battery_low());
    }
}
