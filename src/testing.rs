//! In-memory link doubles for tests

use crate::link::{
    Browser, BrowserConfig, Device, DeviceId, DeviceState, DiscoveryEvent, Endpoint, Feed,
    FlightControl, Protocol, RawHeartbeat, RawPosition, Subscription, Transport,
};
use crate::logging::MissionLog;
use crate::mission::PositionSink;
use async_trait::async_trait;
use sortie_shared::{Capability, GeoPoint, LinkError, PositionSample};
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Shared bookkeeping of everything a [`SimProtocol`] has opened
#[derive(Default)]
pub struct SimLink {
    feeds: Mutex<Vec<Weak<Feed<DiscoveryEvent>>>>,
    opens: AtomicUsize,
    transports: AtomicUsize,
    browsers: AtomicUsize,
}

impl SimLink {
    /// Publish `event` on every transport still open
    pub fn announce(&self, event: DiscoveryEvent) {
        for feed in self.live_feeds() {
            feed.publish(event.clone());
        }
    }

    /// End the event stream of every open transport, as a dropped link would
    pub fn sever(&self) {
        for feed in self.live_feeds() {
            feed.close();
        }
    }

    /// Calls to `open_transport`, refused ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn transports_open(&self) -> usize {
        self.transports.load(Ordering::SeqCst)
    }

    pub fn browsers_active(&self) -> usize {
        self.browsers.load(Ordering::SeqCst)
    }

    fn live_feeds(&self) -> Vec<Arc<Feed<DiscoveryEvent>>> {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|feed| feed.strong_count() > 0);
        feeds.iter().filter_map(Weak::upgrade).collect()
    }

    fn register(&self) -> Arc<Feed<DiscoveryEvent>> {
        let feed = Arc::new(Feed::with_first_replay());
        self.feeds.lock().unwrap().push(Arc::downgrade(&feed));
        feed
    }
}

pub struct SimProtocol {
    pub link: Arc<SimLink>,
    announce: Option<(Duration, Arc<SimDevice>)>,
    refusals: AtomicUsize,
}

impl SimProtocol {
    /// A link on which no device ever appears
    pub fn new() -> Self {
        Self {
            link: Arc::new(SimLink::default()),
            announce: None,
            refusals: AtomicUsize::new(0),
        }
    }

    /// A link that announces `device` after `delay` once browsing starts
    pub fn announcing(device: Arc<SimDevice>, delay: Duration) -> Self {
        Self {
            announce: Some((delay, device)),
            ..Self::new()
        }
    }

    /// An endpoint that never accepts a connection
    pub fn failing_open() -> Self {
        Self::new().refusing_first(usize::MAX)
    }

    /// Refuse the first `count` connection attempts
    pub fn refusing_first(self, count: usize) -> Self {
        self.refusals.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Protocol for SimProtocol {
    async fn open_transport(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, LinkError> {
        self.link.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        self.link.transports.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimTransport {
            link: self.link.clone(),
            events: self.link.register(),
            announce: self.announce.clone(),
            open: AtomicBool::new(true),
        }))
    }
}

struct SimTransport {
    link: Arc<SimLink>,
    events: Arc<Feed<DiscoveryEvent>>,
    announce: Option<(Duration, Arc<SimDevice>)>,
    open: AtomicBool,
}

impl SimTransport {
    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.close();
            self.link.transports.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn start_discovery(&self, _config: &BrowserConfig) -> Result<Box<dyn Browser>, LinkError> {
        let token = CancellationToken::new();
        if let Some((delay, device)) = self.announce.clone() {
            let events = self.events.clone();
            let stop = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = stop.cancelled() => {}
                    () = sleep(delay) => {
                        events.publish(DiscoveryEvent::Added(device));
                    }
                }
            });
        }
        self.link.browsers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimBrowser {
            link: self.link.clone(),
            events: self.events.clone(),
            _guard: token.drop_guard(),
        }))
    }

    async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.close();
        Ok(())
    }

    fn name(&self) -> String {
        "sim".into()
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct SimBrowser {
    link: Arc<SimLink>,
    events: Arc<Feed<DiscoveryEvent>>,
    _guard: DropGuard,
}

impl Browser for SimBrowser {
    fn events(&self) -> Subscription<DiscoveryEvent> {
        self.events.subscribe()
    }
}

impl Drop for SimBrowser {
    fn drop(&mut self) {
        self.link.browsers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A device whose streams are driven directly by the test
pub struct SimDevice {
    id: DeviceId,
    pub state: Feed<DeviceState>,
    pub heartbeat: Feed<RawHeartbeat>,
    pub position: Feed<Option<RawPosition>>,
    pub control: Arc<SimControl>,
    missing: Vec<Capability>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            id: DeviceId {
                system_id: 1,
                component_id: 1,
            },
            state: Feed::with_value(DeviceState::InProgress),
            heartbeat: Feed::new(),
            position: Feed::with_value(None),
            control: Arc::new(SimControl::default()),
            missing: Vec::new(),
        }
    }

    pub fn with_id(mut self, system_id: u8) -> Self {
        self.id.system_id = system_id;
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.missing.push(capability);
        self
    }

    pub fn with_control(mut self, control: Arc<SimControl>) -> Self {
        self.control = control;
        self
    }

    /// Subscriptions currently held on any of the device streams
    pub fn live_subscriptions(&self) -> usize {
        self.state.subscriber_count()
            + self.heartbeat.subscriber_count()
            + self.position.subscriber_count()
    }

    fn offers(&self, capability: Capability) -> bool {
        !self.missing.contains(&capability)
    }
}

impl Device for SimDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn subscribe_state(&self) -> Option<Subscription<DeviceState>> {
        self.offers(Capability::State).then(|| self.state.subscribe())
    }

    fn subscribe_heartbeat(&self) -> Option<Subscription<RawHeartbeat>> {
        self.offers(Capability::Heartbeat)
            .then(|| self.heartbeat.subscribe())
    }

    fn subscribe_position(&self) -> Option<Subscription<Option<RawPosition>>> {
        self.offers(Capability::Position)
            .then(|| self.position.subscribe())
    }

    fn control(&self) -> Option<Arc<dyn FlightControl>> {
        self.offers(Capability::FlightControl)
            .then(|| self.control.clone() as Arc<dyn FlightControl>)
    }
}

/// Flight control that records every command
#[derive(Default)]
pub struct SimControl {
    calls: Mutex<Vec<&'static str>>,
    targets: Mutex<Vec<GeoPoint>>,
    reject: Option<&'static str>,
    hold_go_to: bool,
    pub go_to_started: Notify,
}

impl SimControl {
    /// Rejects the named command
    pub fn rejecting(command: &'static str) -> Self {
        Self {
            reject: Some(command),
            ..Default::default()
        }
    }

    /// `go_to` never completes
    pub fn holding_go_to() -> Self {
        Self {
            hold_go_to: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<GeoPoint> {
        self.targets.lock().unwrap().clone()
    }

    fn record(&self, command: &'static str) -> Result<(), LinkError> {
        self.calls.lock().unwrap().push(command);
        if self.reject == Some(command) {
            return Err(LinkError::Rejected {
                command: command.into(),
                result: "MAV_RESULT_DENIED".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FlightControl for SimControl {
    async fn set_guided_mode(&self) -> Result<(), LinkError> {
        self.record("set_guided_mode")
    }

    async fn take_off(&self, _altitude_m: f64) -> Result<(), LinkError> {
        self.record("take_off")
    }

    async fn go_to(&self, target: GeoPoint) -> Result<(), LinkError> {
        self.record("go_to")?;
        self.targets.lock().unwrap().push(target);
        self.go_to_started.notify_one();
        if self.hold_go_to {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn land(&self) -> Result<(), LinkError> {
        self.record("land")
    }
}

/// Publish `count` heartbeats, the first after `start`, then every `period`
pub fn spawn_heartbeats(device: Arc<SimDevice>, start: Duration, period: Duration, count: usize) {
    let first = Instant::now() + start;
    tokio::spawn(async move {
        for i in 0..count {
            sleep_until(first + period * i as u32).await;
            device.heartbeat.publish(RawHeartbeat {
                custom_mode: 0,
                base_mode: 0,
                system_status: 4,
            });
        }
    });
}

/// Publish `state` after `delay`
pub fn spawn_state(device: Arc<SimDevice>, delay: Duration, state: DeviceState) {
    tokio::spawn(async move {
        sleep(delay).await;
        device.state.publish(state);
    });
}

/// Make `device` pass every connect gate: ready at once and beating steadily
pub fn spawn_ready(device: Arc<SimDevice>) {
    device.state.publish(DeviceState::Complete);
    spawn_heartbeats(
        device,
        Duration::from_millis(10),
        Duration::from_millis(150),
        100_000,
    );
}

/// Mission log that keeps every entry
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

impl MissionLog for RecordingLog {
    fn info(&self, message: &str) {
        self.push(format!("info: {}", message));
    }

    fn error(&self, message: &str, cause: Option<&dyn Error>) {
        match cause {
            Some(cause) => self.push(format!("error: {} ({})", message, cause)),
            None => self.push(format!("error: {}", message)),
        }
    }

    fn mission_start(&self, name: &str) {
        self.push(format!("start: {}", name));
    }

    fn mission_end(&self, name: &str) {
        self.push(format!("end: {}", name));
    }
}

/// Position sink that keeps every sample
#[derive(Default)]
pub struct CollectingSink {
    samples: Mutex<Vec<PositionSample>>,
}

impl CollectingSink {
    pub fn samples(&self) -> Vec<PositionSample> {
        self.samples.lock().unwrap().clone()
    }
}

impl PositionSink for CollectingSink {
    fn on_position(&self, sample: PositionSample) {
        self.samples.lock().unwrap().push(sample);
    }
}
