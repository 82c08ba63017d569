//! Host-side doubles for the radio, the transport and the event sink.

use core::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::string::String;
use std::vec::Vec;

use embassy_time::{Duration, Instant, Timer};

use crate::ble::scanner::ScanCollector;
use crate::ble::uuid::BleUuid;
use crate::ble::{
    AddrType, Address, AttValue, CharProperties, Discovered, PeerAddress, Radio, RemoteCharacteristic, ScanParams,
};
use crate::config::BridgeConfig;
use crate::error::{RadioError, TransportError};
use crate::router::events::{BridgeEvent, EventSink};
use crate::router::transport::{QoS, Transport};

pub const HEART_RATE_MEASUREMENT: &str = "00002a3700001000800000805f9b34fb";

/// Millisecond-scale timings so loops turn over quickly under `block_on`.
pub fn fast_config() -> BridgeConfig {
    let ms = Duration::from_millis;
    let mut c = BridgeConfig::new();
    c.scan.duration = ms(5);
    c.scan.grace = ms(1);
    c.scan_interval = Duration::from_secs(3600);
    c.idle_poll = ms(1);
    c.interval_poll = ms(1);
    c.recovery_polls = 5;
    c.recovery_poll = ms(1);
    c.busy_wait = ms(500);
    c.busy_poll = ms(1);
    c.connect_timeout = ms(200);
    c.notify_wait = ms(20);
    c.teardown_timeout = ms(500);
    c.transport_retry = ms(1);
    c
}

/// Poll `cond` every millisecond; panic after two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        Timer::after_millis(1).await;
    }
}

fn att(bytes: &[u8]) -> AttValue {
    AttValue::from_slice(bytes).unwrap()
}

// ── Radio ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRadio {
    pub adverts: RefCell<Vec<(Address, AddrType, i8, Vec<u8>)>>,
    pub characteristics: RefCell<Vec<(BleUuid, u8)>>,
    pub values: RefCell<HashMap<u16, Vec<u8>>>,
    pending: RefCell<HashMap<u16, VecDeque<Vec<u8>>>>,

    pub fail_activation: Cell<bool>,
    pub fail_scan: Cell<bool>,
    pub fail_connect: Cell<bool>,
    pub connect_delay: Cell<Option<Duration>>,

    active: Cell<bool>,
    pub activations: Cell<usize>,
    pub scans: Cell<usize>,
    pub connects: Cell<usize>,
    pub disconnects: Cell<usize>,
    pub last_peer: Cell<Option<PeerAddress>>,
    connection: Cell<Option<u32>>,
    next_conn: Cell<u32>,
    pub writes: RefCell<Vec<(u16, Vec<u8>)>>,
    pub subscriptions: RefCell<Vec<(u16, bool)>>,
}

impl MockRadio {
    /// Heart-rate sensor: HR measurement (notify, handle 1), battery level
    /// (read, handle 2), HR control point (write, handle 3), temperature
    /// measurement (indicate, handle 4).
    pub fn sensor() -> Self {
        let radio = Self::default();
        *radio.characteristics.borrow_mut() = vec![
            (BleUuid::Short(0x2A37), CharProperties::NOTIFY),
            (BleUuid::Short(0x2A19), CharProperties::READ),
            (BleUuid::Short(0x2A39), CharProperties::WRITE),
            (BleUuid::Short(0x2A1C), CharProperties::INDICATE),
        ];
        radio.values.borrow_mut().insert(2, vec![87]);
        radio
    }

    pub fn advertise(&self, address: Address, rssi: i8, data: &[u8]) {
        self.adverts.borrow_mut().push((address, AddrType::Public, rssi, data.to_vec()));
    }

    /// Queue a notification on `handle`.
    pub fn notify(&self, handle: u16, value: &[u8]) {
        self.pending.borrow_mut().entry(handle).or_default().push_back(value.to_vec());
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Simulate the peer going away.
    pub fn drop_link(&self) {
        self.connection.set(None);
    }
}

impl Radio for MockRadio {
    type Connection = u32;
    type Characteristic = u16;

    async fn set_active(&self, active: bool) -> Result<(), RadioError> {
        if active {
            if self.fail_activation.get() {
                return Err(RadioError::Activation);
            }
            self.activations.set(self.activations.get() + 1);
        }
        self.active.set(active);
        Ok(())
    }

    async fn scan(&self, _params: &ScanParams, collector: &mut ScanCollector) -> Result<(), RadioError> {
        assert!(self.active.get(), "scan on inactive radio");
        self.scans.set(self.scans.get() + 1);
        if self.fail_scan.get() {
            return Err(RadioError::ScanFailed);
        }
        for (address, addr_type, rssi, data) in self.adverts.borrow().iter() {
            collector.record(*address, *addr_type, *rssi, data);
        }
        core::future::pending::<()>().await;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<u32, RadioError> {
        assert!(self.active.get(), "connect on inactive radio");
        self.connects.set(self.connects.get() + 1);
        self.last_peer.set(Some(*peer));
        if let Some(delay) = self.connect_delay.get() {
            Timer::after(delay).await;
        }
        if self.fail_connect.get() {
            return Err(RadioError::ConnectFailed);
        }
        let id = self.next_conn.get() + 1;
        self.next_conn.set(id);
        self.connection.set(Some(id));
        Ok(id)
    }

    async fn discover(&self, _conn: &u32) -> Result<Discovered<u16>, RadioError> {
        let mut found = Discovered::new();
        for (i, (uuid, bits)) in self.characteristics.borrow().iter().enumerate() {
            let _ = found.push(RemoteCharacteristic {
                uuid: *uuid,
                properties: CharProperties::from_bits(*bits),
                handle: i as u16 + 1,
            });
        }
        Ok(found)
    }

    async fn read(&self, _conn: &u32, ch: &u16) -> Result<AttValue, RadioError> {
        Ok(self.values.borrow().get(ch).map(|v| att(v)).unwrap_or_default())
    }

    async fn write(&self, _conn: &u32, ch: &u16, data: &[u8]) -> Result<(), RadioError> {
        self.writes.borrow_mut().push((*ch, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, _conn: &u32, ch: &u16, indicate: bool) -> Result<(), RadioError> {
        self.subscriptions.borrow_mut().push((*ch, indicate));
        Ok(())
    }

    async fn notified(&self, conn: &u32, ch: &u16) -> Result<AttValue, RadioError> {
        loop {
            let next = self.pending.borrow_mut().get_mut(ch).and_then(|q| q.pop_front());
            if let Some(value) = next {
                return Ok(att(&value));
            }
            if !self.is_connected(conn) {
                return Err(RadioError::Disconnected);
            }
            Timer::after_millis(1).await;
        }
    }

    fn is_connected(&self, conn: &u32) -> bool {
        self.connection.get() == Some(*conn)
    }

    async fn disconnect(&self, conn: &u32) -> Result<(), RadioError> {
        self.disconnects.set(self.disconnects.get() + 1);
        if self.connection.get() == Some(*conn) {
            self.connection.set(None);
        }
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Default)]
pub struct MockTransport {
    pub connected: Cell<bool>,
    /// Number of upcoming `connect` calls that fail.
    pub failing_connects: Cell<usize>,
    pub connect_attempts: Cell<usize>,
    pub published: RefCell<Vec<Published>>,
    pub subscriptions: RefCell<Vec<String>>,
}

impl MockTransport {
    pub fn online() -> Self {
        let t = Self::default();
        t.connected.set(true);
        t
    }

    /// Payloads published on `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .borrow()
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.published.borrow().iter().filter(|p| p.topic == topic).count()
    }

    pub fn texts(&self, topic: &str) -> Vec<String> {
        self.payloads(topic)
            .into_iter()
            .map(|p| String::from_utf8(p).unwrap())
            .collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.borrow().iter().any(|t| t == topic)
    }
}

impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_attempts.set(self.connect_attempts.get() + 1);
        let failing = self.failing_connects.get();
        if failing > 0 {
            self.failing_connects.set(failing - 1);
            return Err(TransportError::ConnectFailed);
        }
        self.connected.set(true);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        if !self.connected.get() {
            return Err(TransportError::NotConnected);
        }
        self.published.borrow_mut().push(Published {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        if !self.connected.get() {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.borrow_mut().push(topic.into());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

// ── Event sink ──────────────────────────────────────────────────────────────

/// Keeps the `Debug` rendering of every event.
#[derive(Default)]
pub struct RecordingSink(pub RefCell<Vec<String>>);

impl RecordingSink {
    pub fn count(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: BridgeEvent<'_>) {
        self.0.borrow_mut().push(format!("{:?}", event));
    }
}
