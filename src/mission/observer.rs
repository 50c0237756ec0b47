//! Position telemetry observer

use crate::link::{Device, RawPosition};
use sortie_shared::{Capability, PositionSample};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

impl From<RawPosition> for PositionSample {
    fn from(raw: RawPosition) -> Self {
        PositionSample::from_raw(raw.latitude, raw.longitude, raw.altitude_mm)
    }
}

/// Receives converted position samples
pub trait PositionSink: Send + Sync {
    fn on_position(&self, sample: PositionSample);
}

/// Writes every sample to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PositionSink for LogSink {
    fn on_position(&self, sample: PositionSample) {
        info!("[POSITION] Position update: {}", sample);
    }
}

struct ObserverTask {
    _guard: DropGuard,
    task: JoinHandle<()>,
}

/// Forwards a device's position stream to a sink.
///
/// At most one subscription is live at a time; attaching again replaces it.
pub struct PositionObserver {
    sink: Arc<dyn PositionSink>,
    active: Option<ObserverTask>,
}

impl PositionObserver {
    pub fn new(sink: Arc<dyn PositionSink>) -> Self {
        Self { sink, active: None }
    }

    /// Start forwarding positions of `device`.
    ///
    /// Returns `false` when the device has no position stream; this is
    /// logged and otherwise harmless.
    pub async fn attach(&mut self, device: &dyn Device) -> bool {
        self.detach().await;

        let Some(mut positions) = device.subscribe_position() else {
            error!(
                "[POSITION] Device {} has no {} capability",
                device.id(),
                Capability::Position
            );
            return false;
        };

        let token = CancellationToken::new();
        let stop = token.clone();
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    position = positions.recv() => match position {
                        Some(Some(raw)) => sink.on_position(raw.into()),
                        Some(None) => {}
                        None => {
                            debug!("[POSITION] Position stream closed");
                            break;
                        }
                    },
                }
            }
        });

        debug!("[POSITION] Observing device {}", device.id());
        self.active = Some(ObserverTask {
            _guard: token.drop_guard(),
            task,
        });
        true
    }

    /// Stop forwarding and release the subscription
    pub async fn detach(&mut self) {
        if let Some(ObserverTask { _guard: guard, task }) = self.active.take() {
            drop(guard);
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("[POSITION] Observer task failed: {}", e);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }
}
