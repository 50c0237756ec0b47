//! Mission sequencer
//!
//! Drives the flight phases of a connected session in strict order:
//! takeoff, then navigate and land. Every await races the caller's
//! cancellation token.

use super::observer::PositionObserver;
use crate::link::FlightControl;
use crate::logging::MissionLog;
use crate::session::SessionController;
use sortie_shared::{policy, Capability, GeoPoint, LinkError, MissionError, MissionPhase};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Mission parameters
#[derive(Debug, Clone)]
pub struct MissionConfig {
    /// Name reported on mission start and end
    pub name: String,
    /// Wait after the mode switch before throttling up
    pub mode_settle: Duration,
    /// Wait after takeoff before the next command
    pub takeoff_settle: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            name: "Ardu SITL Test Mission".into(),
            mode_settle: Duration::from_millis(policy::SETTLE_DELAY_MS),
            takeoff_settle: Duration::from_millis(policy::SETTLE_DELAY_MS),
        }
    }
}

pub struct MissionSequencer {
    config: MissionConfig,
    session: SessionController,
    observer: PositionObserver,
    log: Arc<dyn MissionLog>,
}

impl MissionSequencer {
    pub fn new(
        session: SessionController,
        observer: PositionObserver,
        config: MissionConfig,
        log: Arc<dyn MissionLog>,
    ) -> Self {
        Self {
            config,
            session,
            observer,
            log,
        }
    }

    pub fn phase(&self) -> MissionPhase {
        self.session.phase()
    }

    /// Establish the session
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MissionError> {
        let device = self.session.connect(cancel).await?;
        self.log.info(&format!("Drone connected: id={}", device.id()));
        Ok(())
    }

    /// Switch to guided mode and climb to `altitude_m`
    pub async fn take_off(
        &mut self,
        altitude_m: f64,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        let result = self.run_take_off(altitude_m, cancel).await;
        self.conclude(result)
    }

    async fn run_take_off(
        &mut self,
        altitude_m: f64,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        let control = self.control("take off")?;
        self.session.advance(MissionPhase::TakingOff, "take off")?;

        self.log.info("Switching to GUIDED mode");
        command(cancel, "set guided mode", control.set_guided_mode()).await?;
        settle(cancel, self.config.mode_settle).await?;

        self.log.info(&format!("Taking off to {:.1}m", altitude_m));
        command(cancel, "take off", control.take_off(altitude_m)).await?;
        settle(cancel, self.config.takeoff_settle).await?;

        self.log.info("Takeoff complete");
        Ok(())
    }

    /// Fly to `target` with the position observer attached, then land
    pub async fn fly_to_and_land(
        &mut self,
        target: GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        let result = self.run_fly_to_and_land(target, cancel).await;
        self.conclude(result)
    }

    async fn run_fly_to_and_land(
        &mut self,
        target: GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        let control = self.control("fly to")?;
        let device = self.session.device("fly to")?;
        self.session.advance(MissionPhase::EnRoute, "fly to")?;

        self.observer.attach(device.as_ref()).await;
        let result = self.navigate(control.as_ref(), target, cancel).await;
        self.observer.detach().await;
        result
    }

    async fn navigate(
        &mut self,
        control: &dyn FlightControl,
        target: GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        command(cancel, "set guided mode", control.set_guided_mode()).await?;

        self.log.info(&format!("Flying to {}", target));
        command(cancel, "go to", control.go_to(target)).await?;

        self.session.advance(MissionPhase::Landing, "land")?;
        self.log.info("Destination reached, landing");
        command(cancel, "land", control.land()).await?;

        self.session.advance(MissionPhase::Complete, "land")
    }

    /// Run the whole mission: connect, take off, fly to `target` and land.
    ///
    /// On failure every session resource is released and the original
    /// error is returned.
    pub async fn run_mission(
        &mut self,
        altitude_m: f64,
        target: GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<(), MissionError> {
        let name = self.config.name.clone();
        self.log.mission_start(&name);

        let result = async {
            self.connect(cancel).await?;
            self.take_off(altitude_m, cancel).await?;
            self.fly_to_and_land(target, cancel).await
        }
        .await;

        match result {
            Ok(()) => {
                self.log
                    .info("Mission complete: Drone reached destination and landed.");
                self.log.mission_end(&name);
                Ok(())
            }
            Err(e) => {
                self.log.error("Mission failed.", Some(&e as &dyn Error));
                self.dispose().await;
                Err(e)
            }
        }
    }

    /// Detach the observer and release the session. Idempotent.
    pub async fn dispose(&mut self) {
        self.observer.detach().await;
        self.session.dispose().await;
    }

    fn control(&self, operation: &'static str) -> Result<Arc<dyn FlightControl>, MissionError> {
        self.session
            .device(operation)?
            .control()
            .ok_or(MissionError::CapabilityMissing(Capability::FlightControl))
    }

    /// Cancellation and rejected out-of-order calls keep the phase;
    /// anything else fails the session.
    fn conclude(&mut self, result: Result<(), MissionError>) -> Result<(), MissionError> {
        if let Err(e) = &result {
            if !e.is_cancelled() && !matches!(e, MissionError::InvalidState { .. }) {
                self.session.fail();
            }
        }
        result
    }
}

async fn command<F>(
    cancel: &CancellationToken,
    command: &'static str,
    pending: F,
) -> Result<(), MissionError>
where
    F: Future<Output = Result<(), LinkError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MissionError::Cancelled(command)),
        result = pending => result.map_err(|source| MissionError::CommandFailure { command, source }),
    }
}

async fn settle(cancel: &CancellationToken, delay: Duration) -> Result<(), MissionError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MissionError::Cancelled("settle delay")),
        () = sleep(delay) => Ok(()),
    }
}
