//! Command router and scan orchestrator.
//!
//! One radio is shared between autonomous discovery scans and GATT
//! sessions requested over the transport. Turning BLE on knocks the
//! co-located Wi-Fi link over, so every scan is followed by a bounded
//! wait for the transport to come back before results are published.
//!
//! [`Orchestrator::run`] drives three things on one executor:
//!
//! 1. **Scan loop** - periodic scan cycles while nothing else holds the radio.
//! 2. **Dispatch loop** - inbound commands, strictly one at a time.
//! 3. **Notify workers** - forward peer notifications to `notify/{uuid}`.

pub mod command;
pub mod events;
pub mod state;
pub mod topics;
pub mod transport;

use core::cell::Cell;
use core::fmt::{self, Write};

use embassy_futures::select::{select3, select_array, Either3};
use embassy_time::{Instant, Timer};
use heapless::String;
use serde::Serialize;

use crate::ble::bridge::{BleBridge, NotifyForward};
use crate::ble::uuid::NormalizedUuid;
use crate::ble::{CharacteristicDescriptor, PeerAddress, Radio};
use crate::config::{BridgeConfig, CONNECTED_JSON_CAPACITY, ERROR_TEXT_LEN, MAX_NOTIFY_SLOTS, SCAN_JSON_CAPACITY};
use crate::error::Error;
use command::{Command, CommandQueue, InboundMessage};
use events::{BridgeEvent, EventSink};
use state::{BridgeState, RadioClaim};
use topics::{Topics, STATUS_ONLINE};
use transport::{QoS, Transport};

/// How the transport came through a scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recovery {
    /// The link dropped and the reconnect handshake already ran.
    Resubscribed,
    /// The link stayed up; readiness restored here.
    Survived,
    /// The link did not come back within the recovery window.
    TimedOut,
}

#[derive(Serialize)]
struct ConnectedPayload<'a> {
    chars: &'a [CharacteristicDescriptor],
}

fn error_text(args: fmt::Arguments<'_>) -> String<ERROR_TEXT_LEN> {
    let mut text = String::new();
    // Over-long messages are cut at the buffer size.
    let _ = text.write_fmt(args);
    text
}

pub struct Orchestrator<'q, R: Radio, T: Transport, E: EventSink = ()> {
    bridge: BleBridge<R>,
    transport: T,
    sink: E,
    queue: &'q CommandQueue,
    topics: Topics,
    config: BridgeConfig,
    state: BridgeState,
    /// `write/#` and `read/#` are subscribed.
    command_topics: Cell<bool>,
}

impl<'q, R: Radio, T: Transport, E: EventSink> Orchestrator<'q, R, T, E> {
    pub fn new(radio: R, transport: T, sink: E, queue: &'q CommandQueue, topics: Topics, config: BridgeConfig) -> Self {
        Self {
            bridge: BleBridge::new(radio, &config),
            transport,
            sink,
            queue,
            topics,
            config,
            state: BridgeState::new(),
            command_topics: Cell::new(false),
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn bridge(&self) -> &BleBridge<R> {
        &self.bridge
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Bring the transport up, then run forever.
    pub async fn run(&self) -> ! {
        self.bring_up().await;

        let workers: [_; MAX_NOTIFY_SLOTS] = core::array::from_fn(|i| self.bridge.run_notify_worker(i, self));
        match select3(self.scan_loop(), self.command_loop(), select_array(workers)).await {
            Either3::First(never) | Either3::Second(never) => never,
            Either3::Third((never, _)) => never,
        }
    }

    async fn bring_up(&self) {
        loop {
            match self.transport.connect().await {
                Ok(()) => match self.on_transport_connected().await {
                    Ok(()) => return,
                    Err(e) => warn!("transport handshake failed: {}", e),
                },
                Err(e) => warn!("transport connect failed: {}", e),
            }
            Timer::after(self.config.transport_retry).await;
        }
    }

    /// Handshake after every transport (re)connect.
    ///
    /// Re-subscribes the command topics, marks the transport ready and
    /// announces `status = online` (retained).
    pub async fn on_transport_connected(&self) -> Result<(), Error> {
        self.state.set_transport_ready(false);

        self.transport.subscribe(&self.topics.connect()?, QoS::AtMostOnce).await?;
        self.transport.subscribe(&self.topics.disconnect()?, QoS::AtMostOnce).await?;
        if self.command_topics.get() {
            self.subscribe_command_topics().await?;
        }

        self.state.set_transport_ready(true);
        self.transport
            .publish(&self.topics.status()?, STATUS_ONLINE, QoS::AtLeastOnce, true)
            .await?;
        info!("transport ready on {}", self.topics.base());
        Ok(())
    }

    async fn subscribe_command_topics(&self) -> Result<(), Error> {
        self.transport.subscribe(&self.topics.write_filter()?, QoS::AtMostOnce).await?;
        self.transport.subscribe(&self.topics.read_filter()?, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn report_error(&self, text: &str) {
        self.sink.on_event(BridgeEvent::Error { message: text });
        let published = match self.topics.error() {
            Ok(topic) => self
                .transport
                .publish(&topic, text.as_bytes(), QoS::AtMostOnce, false)
                .await
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            warn!("could not publish error \"{}\": {}", text, e);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Scan loop
    // ═══════════════════════════════════════════════════════════════════════

    async fn scan_loop(&self) -> ! {
        loop {
            if !(self.transport.is_connected() && self.state.transport_ready()) {
                Timer::after(self.config.idle_poll).await;
                continue;
            }
            if self.state.scan_paused() || self.state.busy() {
                Timer::after(self.config.idle_poll).await;
                continue;
            }
            if let Some(last) = self.state.last_scan_start() {
                if last.elapsed() < self.config.scan_interval {
                    Timer::after(self.config.interval_poll).await;
                    continue;
                }
            }
            self.run_scan_cycle().await;
        }
    }

    async fn run_scan_cycle(&self) {
        let Some(_claim) = self.state.try_claim_radio() else {
            return;
        };
        self.state.set_last_scan_start(Instant::now());
        self.sink.on_event(BridgeEvent::ScanStarted);

        if let Err(e) = self.scan_and_publish().await {
            warn!("scan cycle failed: {}", e);
            self.report_error(&error_text(format_args!("Scan failed: {}", e))).await;
        }
    }

    async fn scan_and_publish(&self) -> Result<(), Error> {
        self.state.set_transport_ready(false);
        let scanned = self.bridge.scan(&self.config.scan).await;
        self.settle_transport().await;

        let results = scanned?;
        let mut json = [0u8; SCAN_JSON_CAPACITY];
        let len = serde_json_core::to_slice(&results, &mut json).map_err(|_| Error::BufferOverflow)?;
        self.transport
            .publish(&self.topics.scan_results()?, &json[..len], QoS::AtMostOnce, false)
            .await?;
        self.sink.on_event(BridgeEvent::ScanComplete { devices: results.len() });
        Ok(())
    }

    /// Runs after every radio activation, whatever its outcome.
    async fn settle_transport(&self) -> Recovery {
        let recovery = self.recover_transport().await;
        match recovery {
            Recovery::Resubscribed => info!("transport reconnected after radio use"),
            Recovery::Survived => debug!("transport survived radio use"),
            Recovery::TimedOut => warn!("{}", Error::TransportDisrupted),
        }
        recovery
    }

    /// Wait for the transport after a scan or connect.
    ///
    /// Seeing it connected and ready means the reconnect handshake ran;
    /// connected but not ready means the link never dropped.
    async fn recover_transport(&self) -> Recovery {
        for _ in 0..self.config.recovery_polls {
            if self.transport.is_connected() {
                if self.state.transport_ready() {
                    return Recovery::Resubscribed;
                }
                self.state.set_transport_ready(true);
                return Recovery::Survived;
            }
            Timer::after(self.config.recovery_poll).await;
        }
        Recovery::TimedOut
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Command dispatch
    // ═══════════════════════════════════════════════════════════════════════

    async fn command_loop(&self) -> ! {
        loop {
            let message = self.queue.receive().await;
            if let Err(e) = self.dispatch(&message).await {
                warn!("command on {} failed: {}", message.topic.as_str(), e);
                self.report_error(&error_text(format_args!("{}", e))).await;
            }
        }
    }

    async fn dispatch(&self, message: &InboundMessage) -> Result<(), Error> {
        let Some(route) = self.topics.route(&message.topic) else {
            debug!("ignoring {}", message.topic.as_str());
            return Ok(());
        };
        match Command::parse(route, &message.payload)? {
            Command::Connect(peer) => self.handle_connect(&peer).await,
            Command::Disconnect => self.handle_disconnect().await,
            Command::Write { uuid, data } => self.bridge.write(&uuid, &data).await,
            Command::Read { uuid } => self.handle_read(&uuid).await,
        }
    }

    async fn wait_for_radio(&self) -> Option<RadioClaim<'_>> {
        let deadline = Instant::now() + self.config.busy_wait;
        loop {
            if let Some(claim) = self.state.try_claim_radio() {
                return Some(claim);
            }
            if Instant::now() >= deadline {
                return None;
            }
            Timer::after(self.config.busy_poll).await;
        }
    }

    async fn handle_connect(&self, peer: &PeerAddress) -> Result<(), Error> {
        let was_paused = self.state.scan_paused();
        self.state.set_scan_paused(true);

        let Some(claim) = self.wait_for_radio().await else {
            self.state.set_scan_paused(was_paused);
            return Err(Error::Busy);
        };

        let result = self.open_session(peer).await;
        if result.is_err() {
            // Scanning must never stay suspended behind a half-open session.
            self.bridge.disconnect().await;
            self.state.set_scan_paused(false);
        }
        drop(claim);
        result
    }

    async fn open_session(&self, peer: &PeerAddress) -> Result<(), Error> {
        self.bridge.disconnect().await;

        // Connecting powers the radio up, which can drop the transport.
        self.state.set_transport_ready(false);
        let connected = self.bridge.connect(peer, self.config.connect_timeout).await;
        let recovery = self.settle_transport().await;
        let descriptors = connected?;
        if recovery == Recovery::TimedOut {
            return Err(Error::TransportDisrupted);
        }

        if !self.command_topics.get() {
            self.subscribe_command_topics().await?;
            self.command_topics.set(true);
        }

        for descriptor in descriptors.iter().filter(|d| d.properties.can_push()) {
            self.bridge.start_notify(&descriptor.uuid);
        }

        let mut json = [0u8; CONNECTED_JSON_CAPACITY];
        let payload = ConnectedPayload { chars: &descriptors };
        let len = serde_json_core::to_slice(&payload, &mut json).map_err(|_| Error::BufferOverflow)?;
        self.transport
            .publish(&self.topics.connected()?, &json[..len], QoS::AtMostOnce, false)
            .await?;

        self.sink.on_event(BridgeEvent::Connected {
            address: &peer.address,
            characteristics: descriptors.len(),
        });
        Ok(())
    }

    async fn handle_disconnect(&self) -> Result<(), Error> {
        self.bridge.disconnect().await;
        self.command_topics.set(false);
        self.state.set_scan_paused(false);

        self.transport
            .publish(&self.topics.disconnected()?, b"", QoS::AtMostOnce, false)
            .await?;
        self.sink.on_event(BridgeEvent::Disconnected);
        Ok(())
    }

    async fn handle_read(&self, uuid: &NormalizedUuid) -> Result<(), Error> {
        let value = self.bridge.read(uuid).await?;
        self.transport
            .publish(&self.topics.read_response(uuid)?, &value, QoS::AtMostOnce, false)
            .await?;
        self.sink.on_event(BridgeEvent::ReadValue { uuid, value: &value });
        Ok(())
    }
}

impl<R: Radio, T: Transport, E: EventSink> NotifyForward for Orchestrator<'_, R, T, E> {
    async fn forward(&self, uuid: &NormalizedUuid, value: &[u8]) {
        self.sink.on_event(BridgeEvent::Notification { uuid, value });
        let topic = match self.topics.notify(uuid) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("notify topic for {}: {}", uuid, e);
                return;
            }
        };
        if let Err(e) = self.transport.publish(&topic, value, QoS::AtMostOnce, false).await {
            warn!("notify publish failed: {}", e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
