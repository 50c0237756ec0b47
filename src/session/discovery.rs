//! Device discovery
//!
//! Opens the one transport/browser pair of a session and resolves the first
//! device that appears on it. A transport that cannot be opened, or whose
//! event stream ends, is reopened until the discovery deadline passes.

use crate::link::{Browser, BrowserConfig, Device, DiscoveryEvent, Endpoint, Protocol, Transport};
use sortie_shared::{policy, LinkError, MissionError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for device discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where the vehicle link lives
    pub endpoint: Endpoint,
    /// Passed through to the browsing process
    pub browser: BrowserConfig,
    /// Overall bound on waiting for the first device, transport opening included
    pub timeout: Duration,
    /// Pause before reopening a failed or dropped transport
    pub retry_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            browser: BrowserConfig::default(),
            timeout: Duration::from_millis(policy::DISCOVERY_TIMEOUT_MS),
            retry_interval: Duration::from_millis(policy::TRANSPORT_RETRY_INTERVAL_MS),
        }
    }
}

/// The transport and browser opened for one session
pub struct DiscoveryLink {
    pub transport: Box<dyn Transport>,
    pub browser: Box<dyn Browser>,
}

impl DiscoveryLink {
    /// Stop browsing, then shut the transport down
    pub async fn close(self) {
        let DiscoveryLink {
            mut transport,
            browser,
        } = self;
        drop(browser);
        if let Err(e) = transport.shutdown().await {
            warn!("[DISCOVERY] Transport shutdown failed: {}", e);
        }
    }
}

/// Opens the link and waits for the first device
pub struct DiscoveryManager {
    config: DiscoveryConfig,
}

impl DiscoveryManager {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Resolve the first device, keeping the opened link in `link`.
    ///
    /// Only the deadline (`DiscoveryTimeout`) or `cancel` (`Cancelled`) end
    /// the wait. Whatever link is open when it ends stays in `link` for the
    /// caller to release.
    pub async fn run(
        &self,
        protocol: &dyn Protocol,
        link: &mut Option<DiscoveryLink>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Device>, MissionError> {
        let deadline = Instant::now() + self.config.timeout;
        info!("[DISCOVERY] Searching for available drones...");

        loop {
            let current = match link.take() {
                Some(current) => current,
                None => self.open(protocol, deadline, cancel).await?,
            };
            let current = link.insert(current);

            match self.discover(current.browser.as_ref(), deadline, cancel).await {
                Err(MissionError::Disconnected(_)) => {
                    warn!(
                        "[DISCOVERY] Link dropped, reconnecting in {:?}",
                        self.config.retry_interval
                    );
                    if let Some(dropped) = link.take() {
                        dropped.close().await;
                    }
                    self.pause(deadline, cancel).await?;
                }
                result => return result,
            }
        }
    }

    /// Open the transport and start browsing on it, retrying until `deadline`
    pub async fn open(
        &self,
        protocol: &dyn Protocol,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryLink, MissionError> {
        loop {
            let attempt = tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(MissionError::Cancelled("transport open")),
                () = sleep_until(deadline) => return Err(self.timed_out()),
                attempt = self.try_open(protocol) => attempt,
            };

            match attempt {
                Ok(opened) => return Ok(opened),
                Err(e) => warn!(
                    "[DISCOVERY] {}. Retrying in {:?}",
                    e, self.config.retry_interval
                ),
            }
            self.pause(deadline, cancel).await?;
        }
    }

    async fn try_open(&self, protocol: &dyn Protocol) -> Result<DiscoveryLink, LinkError> {
        info!("[DISCOVERY] Opening transport {}", self.config.endpoint);
        let mut transport = protocol.open_transport(&self.config.endpoint).await?;

        match transport.start_discovery(&self.config.browser) {
            Ok(browser) => {
                debug!(
                    "[DISCOVERY] Browsing on {} (device timeout {:?}, check interval {:?})",
                    transport.name(),
                    self.config.browser.device_timeout,
                    self.config.browser.check_interval
                );
                Ok(DiscoveryLink { transport, browser })
            }
            Err(e) => {
                if let Err(close_err) = transport.shutdown().await {
                    warn!("[DISCOVERY] Failed to close transport: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Wait for the first device added on `browser`.
    ///
    /// Later devices are ignored. Fails with `DiscoveryTimeout` at `deadline`,
    /// `Cancelled` when `cancel` fires first, or `Disconnected` when the
    /// browser's event stream ends.
    pub async fn discover(
        &self,
        browser: &dyn Browser,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Device>, MissionError> {
        let mut events = browser.events();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    return Err(MissionError::Cancelled("discovery"));
                }

                () = sleep_until(deadline) => return Err(self.timed_out()),

                event = events.recv() => match event {
                    Some(DiscoveryEvent::Added(device)) => {
                        info!("[DISCOVERY] Drone found: id={}", device.id());
                        return Ok(device);
                    }
                    Some(DiscoveryEvent::Removed(id)) => {
                        debug!("[DISCOVERY] Ignoring removal of {}", id);
                    }
                    None => return Err(MissionError::Disconnected("discovery")),
                },
            }
        }
    }

    /// Sleep for the retry interval, bounded by `deadline`
    async fn pause(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(MissionError::Cancelled("discovery")),
            () = sleep_until(deadline) => Err(self.timed_out()),
            () = sleep(self.config.retry_interval) => Ok(()),
        }
    }

    fn timed_out(&self) -> MissionError {
        warn!("[DISCOVERY] Drone search timed out after {:?}", self.config.timeout);
        MissionError::DiscoveryTimeout(self.config.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimDevice, SimProtocol};
    use sortie_shared::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.browser.device_timeout, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_device_wins() {
        let first = Arc::new(SimDevice::new().with_id(1));
        let protocol = SimProtocol::announcing(first, Duration::from_secs(2));
        let manager = DiscoveryManager::new(DiscoveryConfig::default());

        let second = Arc::new(SimDevice::new().with_id(2));
        let sim = protocol.link.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            sim.announce(DiscoveryEvent::Added(second));
        });

        let mut link = None;
        let start = Instant::now();
        let device = manager
            .run(&protocol, &mut link, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(device.id().system_id, 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(link.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_for_any_bound() {
        for secs in [1, 5, 30, 60] {
            let protocol = SimProtocol::new();
            let manager = DiscoveryManager::new(DiscoveryConfig {
                timeout: Duration::from_secs(secs),
                ..Default::default()
            });

            let mut link = None;
            let start = Instant::now();
            let err = manager
                .run(&protocol, &mut link, &CancellationToken::new())
                .await
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
            assert!(start.elapsed() >= Duration::from_secs(secs));
            assert!(link.is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_beats_timeout() {
        let protocol = SimProtocol::new();
        let manager = DiscoveryManager::new(DiscoveryConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let mut link = None;
        let start = Instant::now();
        let err = manager.run(&protocol, &mut link, &cancel).await.err().unwrap();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_waits_out_the_deadline() {
        let protocol = SimProtocol::failing_open();
        let manager = DiscoveryManager::new(DiscoveryConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        });

        let mut link = None;
        let start = Instant::now();
        let err = manager
            .run(&protocol, &mut link, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
        // Attempts at 0, 2 and 4 seconds
        assert_eq!(protocol.link.opens(), 3);
        assert_eq!(protocol.link.transports_open(), 0);
        assert!(link.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_opens_after_refusals() {
        let device = Arc::new(SimDevice::new());
        let protocol = SimProtocol::announcing(device.clone(), Duration::ZERO).refusing_first(3);
        let manager = DiscoveryManager::new(DiscoveryConfig::default());

        let mut link = None;
        let start = Instant::now();
        let found = manager
            .run(&protocol, &mut link, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.id(), device.id());
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(protocol.link.opens(), 4);
        assert_eq!(protocol.link.transports_open(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_endpoint_refuses() {
        let protocol = SimProtocol::failing_open();
        let manager = DiscoveryManager::new(DiscoveryConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let mut link = None;
        let err = manager.run(&protocol, &mut link, &cancel).await.err().unwrap();
        assert!(err.is_cancelled());
        assert!(link.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_link_drop() {
        let device = Arc::new(SimDevice::new());
        let protocol = SimProtocol::new();
        let manager = DiscoveryManager::new(DiscoveryConfig::default());

        let sim = protocol.link.clone();
        let announced = device.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            sim.sever();
            sleep(Duration::from_secs(3)).await;
            sim.announce(DiscoveryEvent::Added(announced));
        });

        let mut link = None;
        let start = Instant::now();
        let found = manager
            .run(&protocol, &mut link, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.id(), device.id());
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(protocol.link.opens(), 2);
        assert_eq!(protocol.link.transports_open(), 1);
        assert_eq!(protocol.link.browsers_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_near_deadline_times_out() {
        let protocol = SimProtocol::new();
        let manager = DiscoveryManager::new(DiscoveryConfig {
            timeout: Duration::from_secs(3),
            ..Default::default()
        });

        let sim = protocol.link.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            sim.sever();
        });

        let mut link = None;
        let start = Instant::now();
        let err = manager
            .run(&protocol, &mut link, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(protocol.link.transports_open(), 0);
        assert!(link.is_none());
    }
}
