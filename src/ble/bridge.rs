//! BLE bridge - owns the radio on behalf of the orchestrator.
//!
//! Runs scan cycles, holds at most one GATT session and forwards
//! notifications through a fixed pool of workers. Scanning and the
//! session are mutually exclusive: whichever holds the radio makes the
//! other fail with [`Error::Busy`].
//!
//! The radio is powered down after every scan and every disconnect so
//! that a co-located Wi-Fi link gets the antenna back.

use core::cell::{Cell, RefCell};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, TimeoutError};
use heapless::Vec;

use crate::ble::scanner::{deduplicate, ScanCollector, ScanResults};
use crate::ble::uuid::{normalize, NormalizedUuid};
use crate::ble::{AttValue, CharProperties, CharacteristicDescriptor, PeerAddress, Radio};
use crate::config::{BridgeConfig, ScanSettings, MAX_CHARACTERISTICS, MAX_NOTIFY_SLOTS};
use crate::error::{Error, RadioError};

/// Characteristics reported after a successful connect.
pub type Descriptors = Vec<CharacteristicDescriptor, MAX_CHARACTERISTICS>;

/// Session slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Receives every non-empty notified value.
pub trait NotifyForward {
    async fn forward(&self, uuid: &NormalizedUuid, value: &[u8]);
}

struct SessionChar<H> {
    uuid: NormalizedUuid,
    handle: H,
    properties: CharProperties,
}

struct GattSession<C, H> {
    conn: C,
    characteristics: Vec<SessionChar<H>, MAX_CHARACTERISTICS>,
}

impl<C, H> GattSession<C, H> {
    /// Duplicate UUIDs (same characteristic in two services): last one wins.
    fn insert(&mut self, entry: SessionChar<H>) {
        match self.characteristics.iter_mut().find(|c| c.uuid == entry.uuid) {
            Some(existing) => *existing = entry,
            None => {
                let _ = self.characteristics.push(entry);
            }
        }
    }

    fn find(&self, uuid: &NormalizedUuid) -> Option<&SessionChar<H>> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

struct Subscription<C, H> {
    conn: C,
    handle: H,
    uuid: NormalizedUuid,
    indicate: bool,
}

/// Lifecycle of one forwarding worker.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Idle,
    Forwarding(NormalizedUuid),
    /// Cancelled but the worker has not exited yet; not reusable.
    Draining,
}

/// One forwarding worker. Leaves `Idle` on assignment and only returns
/// to it once the worker has fully exited.
struct NotifySlot<C, H> {
    assigned: Signal<NoopRawMutex, Subscription<C, H>>,
    cancel: Signal<NoopRawMutex, ()>,
    stopped: Signal<NoopRawMutex, ()>,
    state: RefCell<SlotState>,
}

impl<C, H> NotifySlot<C, H> {
    fn new() -> Self {
        Self {
            assigned: Signal::new(),
            cancel: Signal::new(),
            stopped: Signal::new(),
            state: RefCell::new(SlotState::Idle),
        }
    }

    fn is_free(&self) -> bool {
        *self.state.borrow() == SlotState::Idle
    }

    fn is_active(&self) -> bool {
        matches!(*self.state.borrow(), SlotState::Forwarding(_))
    }

    fn forwards(&self, uuid: &NormalizedUuid) -> bool {
        matches!(&*self.state.borrow(), SlotState::Forwarding(u) if u == uuid)
    }

    fn release(&self) {
        *self.state.borrow_mut() = SlotState::Idle;
        self.stopped.signal(());
    }
}

pub struct BleBridge<R: Radio> {
    radio: R,
    link: Cell<LinkState>,
    scanning: Cell<bool>,
    powered: Cell<bool>,
    session: RefCell<Option<GattSession<R::Connection, R::Characteristic>>>,
    slots: [NotifySlot<R::Connection, R::Characteristic>; MAX_NOTIFY_SLOTS],
    notify_wait: Duration,
    teardown_timeout: Duration,
}

impl<R: Radio> BleBridge<R> {
    pub fn new(radio: R, config: &BridgeConfig) -> Self {
        Self {
            radio,
            link: Cell::new(LinkState::Disconnected),
            scanning: Cell::new(false),
            powered: Cell::new(false),
            session: RefCell::new(None),
            slots: core::array::from_fn(|_| NotifySlot::new()),
            notify_wait: config.notify_wait,
            teardown_timeout: config.teardown_timeout,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn link_state(&self) -> LinkState {
        self.link.get()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.get()
    }

    /// Workers currently assigned to a characteristic.
    pub fn active_notifications(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    fn radio_in_use(&self) -> bool {
        self.scanning.get() || self.link.get() != LinkState::Disconnected
    }

    async fn power_up(&self) -> Result<(), RadioError> {
        if !self.powered.get() {
            self.radio.set_active(true).await?;
            self.powered.set(true);
        }
        Ok(())
    }

    async fn power_down(&self) {
        if !self.powered.get() {
            return;
        }
        match self.radio.set_active(false).await {
            Ok(()) => self.powered.set(false),
            Err(e) => warn!("radio power-down failed: {}", e),
        }
    }

    // ── Scanning ──────────────────────────────────────────────────────────

    /// Run one scan cycle and return the deduplicated, filtered results.
    ///
    /// The radio is off again when this returns, whatever the outcome.
    pub async fn scan(&self, settings: &ScanSettings) -> Result<ScanResults, Error> {
        if self.radio_in_use() {
            return Err(Error::Busy);
        }
        self.scanning.set(true);
        info!("BLE scan starting ({} ms window)", settings.duration.as_millis());

        let mut collector = ScanCollector::new(settings.max_entries);
        let outcome = self.collect(settings, &mut collector).await;

        self.scanning.set(false);
        self.power_down().await;
        outcome?;

        if collector.dropped() > 0 {
            warn!("scan buffer full - {} reports dropped", collector.dropped());
        }
        let results = deduplicate(collector.entries());
        info!("BLE scan complete - {} reports, {} devices", collector.len(), results.len());
        Ok(results)
    }

    async fn collect(&self, settings: &ScanSettings, collector: &mut ScanCollector) -> Result<(), Error> {
        self.power_up().await.map_err(Error::ScanFailure)?;

        let window = settings.duration + settings.grace;
        let scanned = with_timeout(window, self.radio.scan(&settings.params, collector)).await;

        if let Err(e) = self.radio.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
        match scanned {
            Ok(Err(e)) => Err(Error::ScanFailure(e)),
            Ok(Ok(())) | Err(TimeoutError) => Ok(()),
        }
    }

    // ── Session ───────────────────────────────────────────────────────────

    /// Connect and enumerate every characteristic.
    ///
    /// Fails with [`Error::Busy`] while scanning or while a session
    /// exists; the caller tears down the previous session first.
    pub async fn connect(&self, peer: &PeerAddress, timeout: Duration) -> Result<Descriptors, Error> {
        if self.radio_in_use() {
            return Err(Error::Busy);
        }
        self.link.set(LinkState::Connecting);
        info!("connecting to {}", peer.address);

        match self.open_session(peer, timeout).await {
            Ok(descriptors) => {
                self.link.set(LinkState::Connected);
                info!("connected to {} - {} characteristics", peer.address, descriptors.len());
                Ok(descriptors)
            }
            Err(e) => {
                self.link.set(LinkState::Disconnected);
                self.power_down().await;
                warn!("connect to {} failed: {}", peer.address, e);
                Err(e)
            }
        }
    }

    async fn open_session(&self, peer: &PeerAddress, timeout: Duration) -> Result<Descriptors, Error> {
        self.power_up().await?;

        let conn = match with_timeout(timeout, self.radio.connect(peer)).await {
            Ok(conn) => conn?,
            Err(TimeoutError) => return Err(Error::ConnectTimeout),
        };

        let discovered = match self.radio.discover(&conn).await {
            Ok(discovered) => discovered,
            Err(e) => {
                if let Err(close) = self.radio.disconnect(&conn).await {
                    debug!("close after failed discovery: {}", close);
                }
                return Err(e.into());
            }
        };

        let mut session = GattSession {
            conn,
            characteristics: Vec::new(),
        };
        let mut descriptors = Descriptors::new();
        for remote in discovered {
            let uuid = normalize(&remote.uuid);
            let _ = descriptors.push(CharacteristicDescriptor {
                uuid: uuid.clone(),
                properties: remote.properties,
            });
            session.insert(SessionChar {
                uuid,
                handle: remote.handle,
                properties: remote.properties,
            });
        }

        *self.session.borrow_mut() = Some(session);
        Ok(descriptors)
    }

    fn lookup(&self, uuid: &NormalizedUuid) -> Result<(R::Connection, R::Characteristic, CharProperties), Error> {
        let session = self.session.borrow();
        let session = session.as_ref().ok_or(Error::CharacteristicNotFound)?;
        let ch = session.find(uuid).ok_or(Error::CharacteristicNotFound)?;
        Ok((session.conn.clone(), ch.handle.clone(), ch.properties))
    }

    /// Write with response. Unknown characteristics are ignored.
    pub async fn write(&self, uuid: &NormalizedUuid, data: &[u8]) -> Result<(), Error> {
        let (conn, handle, _) = match self.lookup(uuid) {
            Ok(found) => found,
            Err(_) => {
                debug!("write to unknown {} ignored", uuid);
                return Ok(());
            }
        };
        self.radio.write(&conn, &handle, data).await?;
        Ok(())
    }

    /// Read a value. Unknown characteristics read as empty.
    pub async fn read(&self, uuid: &NormalizedUuid) -> Result<AttValue, Error> {
        let (conn, handle, _) = match self.lookup(uuid) {
            Ok(found) => found,
            Err(_) => {
                debug!("read of unknown {} ignored", uuid);
                return Ok(AttValue::new());
            }
        };
        Ok(self.radio.read(&conn, &handle).await?)
    }

    /// Hand a characteristic to a free forwarding worker.
    ///
    /// Returns `false` when nothing was started: unknown characteristic,
    /// already forwarded, or no free worker.
    pub fn start_notify(&self, uuid: &NormalizedUuid) -> bool {
        let Ok((conn, handle, properties)) = self.lookup(uuid) else {
            debug!("notify on unknown {} ignored", uuid);
            return false;
        };
        if self.slots.iter().any(|s| s.forwards(uuid)) {
            return false;
        }
        let Some(slot) = self.slots.iter().find(|s| s.is_free()) else {
            warn!("no free notify worker for {}", uuid);
            return false;
        };

        slot.cancel.reset();
        slot.stopped.reset();
        *slot.state.borrow_mut() = SlotState::Forwarding(uuid.clone());
        slot.assigned.signal(Subscription {
            conn,
            handle,
            uuid: uuid.clone(),
            indicate: !properties.contains(CharProperties::NOTIFY),
        });
        true
    }

    /// Body of forwarding worker `index` (`0..MAX_NOTIFY_SLOTS`).
    ///
    /// All workers must be polled alongside whatever calls
    /// [`disconnect`](Self::disconnect).
    pub async fn run_notify_worker<F: NotifyForward>(&self, index: usize, forward: &F) -> ! {
        let slot = &self.slots[index];
        loop {
            let sub = slot.assigned.wait().await;
            self.forward_notifications(slot, &sub, forward).await;
            slot.release();
            debug!("notify worker {} released {}", index, sub.uuid);
        }
    }

    async fn forward_notifications<F: NotifyForward>(
        &self,
        slot: &NotifySlot<R::Connection, R::Characteristic>,
        sub: &Subscription<R::Connection, R::Characteristic>,
        forward: &F,
    ) {
        match select(slot.cancel.wait(), self.radio.subscribe(&sub.conn, &sub.handle, sub.indicate)).await {
            Either::First(()) => return,
            Either::Second(Err(e)) => {
                warn!("enable notifications on {} failed: {}", sub.uuid, e);
                return;
            }
            Either::Second(Ok(())) => info!("forwarding notifications from {}", sub.uuid),
        }

        while self.radio.is_connected(&sub.conn) {
            let next = with_timeout(self.notify_wait, self.radio.notified(&sub.conn, &sub.handle));
            match select(slot.cancel.wait(), next).await {
                Either::First(()) => return,
                Either::Second(Err(TimeoutError)) => {}
                Either::Second(Ok(Ok(value))) => {
                    if !value.is_empty() {
                        forward.forward(&sub.uuid, &value).await;
                    }
                }
                Either::Second(Ok(Err(e))) => {
                    warn!("notification wait on {} failed: {}", sub.uuid, e);
                    return;
                }
            }
        }
        debug!("link dropped, stop forwarding {}", sub.uuid);
    }

    async fn stop_notify_all(&self) {
        for slot in self.slots.iter() {
            if !slot.is_active() {
                continue;
            }
            slot.cancel.signal(());
            if with_timeout(self.teardown_timeout, slot.stopped.wait()).await.is_err() {
                // The worker still owns the slot; it frees it on exit.
                error!("notify worker did not stop in time");
                *slot.state.borrow_mut() = SlotState::Draining;
            }
        }
    }

    /// Tear down the session. Idempotent.
    ///
    /// Forwarding workers are cancelled and awaited before the link is
    /// closed; close failures are swallowed.
    pub async fn disconnect(&self) {
        self.stop_notify_all().await;

        let session = self.session.borrow_mut().take();
        if let Some(session) = session {
            self.link.set(LinkState::Disconnecting);
            if let Err(e) = self.radio.disconnect(&session.conn).await {
                debug!("close: {}", e);
            }
            info!("disconnected");
        }
        self.link.set(LinkState::Disconnected);

        if !self.scanning.get() {
            self.power_down().await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuid::BleUuid;
    use crate::ble::{AddrType, Address};
    use crate::testing::{fast_config, wait_until, MockRadio, HEART_RATE_MEASUREMENT};
    use embassy_futures::block_on;
    use embassy_futures::select::select_array;
    use embassy_time::Timer;
    use std::vec::Vec as StdVec;

    const PEER: PeerAddress = PeerAddress {
        address: Address::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]),
        addr_type: AddrType::Random,
    };

    #[derive(Default)]
    struct Collected(RefCell<StdVec<(std::string::String, StdVec<u8>)>>);

    impl NotifyForward for Collected {
        async fn forward(&self, uuid: &NormalizedUuid, value: &[u8]) {
            self.0.borrow_mut().push((uuid.as_str().into(), value.to_vec()));
        }
    }

    /// Spends `delay` on every value before recording it.
    struct Sluggish {
        delay: Duration,
        entered: Cell<usize>,
        inner: Collected,
    }

    impl NotifyForward for Sluggish {
        async fn forward(&self, uuid: &NormalizedUuid, value: &[u8]) {
            self.entered.set(self.entered.get() + 1);
            Timer::after(self.delay).await;
            self.inner.forward(uuid, value).await;
        }
    }

    fn bridge() -> BleBridge<MockRadio> {
        BleBridge::new(MockRadio::sensor(), &fast_config())
    }

    /// Run `script` with every notify worker alive.
    fn with_workers<F: NotifyForward, T>(
        bridge: &BleBridge<MockRadio>,
        sink: &F,
        script: impl core::future::Future<Output = T>,
    ) -> T {
        block_on(async {
            let workers: [_; MAX_NOTIFY_SLOTS] = core::array::from_fn(|i| bridge.run_notify_worker(i, sink));
            match select(select_array(workers), script).await {
                Either::First((never, _)) => never,
                Either::Second(out) => out,
            }
        })
    }

    #[test]
    fn scan_returns_named_devices_and_powers_down() {
        let b = bridge();
        b.radio().advertise(Address::new([1, 2, 3, 4, 5, 6]), -50, &[0x04, 0x09, b'H', b'R', b'M']);
        b.radio().advertise(Address::new([1, 2, 3, 4, 5, 6]), -40, &[0x02, 0x01, 0x06]);
        b.radio().advertise(Address::new([9, 9, 9, 9, 9, 9]), -80, &[0x02, 0x01, 0x06]);

        let results = block_on(b.scan(&fast_config().scan)).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.as_str(), "HRM");
        assert_eq!(results[0].rssi, -40);
        assert!(!b.radio().is_active());
        assert!(!b.is_scanning());
    }

    #[test]
    fn failed_scan_still_powers_down() {
        let b = bridge();
        b.radio().fail_scan.set(true);
        let err = block_on(b.scan(&fast_config().scan)).unwrap_err();
        assert_eq!(err, Error::ScanFailure(RadioError::ScanFailed));
        assert!(!b.radio().is_active());
        assert_eq!(b.radio().activations.get(), 1);
    }

    #[test]
    fn activation_failure_is_a_scan_failure() {
        let b = bridge();
        b.radio().fail_activation.set(true);
        let err = block_on(b.scan(&fast_config().scan)).unwrap_err();
        assert_eq!(err, Error::ScanFailure(RadioError::Activation));
        assert!(!b.radio().is_active());
    }

    #[test]
    fn connect_normalizes_and_reports_properties() {
        let b = bridge();
        let descriptors = block_on(b.connect(&PEER, fast_config().connect_timeout)).unwrap();

        assert_eq!(b.link_state(), LinkState::Connected);
        assert_eq!(b.radio().last_peer.get(), Some(PEER));
        let hr = descriptors.iter().find(|d| d.uuid.as_str() == HEART_RATE_MEASUREMENT).unwrap();
        assert!(hr.properties.contains(CharProperties::NOTIFY));
        assert!(descriptors.iter().all(|d| d.uuid.as_str().len() == 32));
    }

    #[test]
    fn radio_is_exclusive() {
        let b = bridge();
        block_on(b.connect(&PEER, fast_config().connect_timeout)).unwrap();
        assert_eq!(block_on(b.scan(&fast_config().scan)).unwrap_err(), Error::Busy);
        assert_eq!(block_on(b.connect(&PEER, fast_config().connect_timeout)).unwrap_err(), Error::Busy);
    }

    #[test]
    fn connect_timeout_leaves_link_down() {
        let b = bridge();
        b.radio().connect_delay.set(Some(Duration::from_secs(3600)));
        let err = block_on(b.connect(&PEER, Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, Error::ConnectTimeout);
        assert_eq!(b.link_state(), LinkState::Disconnected);
        assert!(!b.radio().is_active());
    }

    #[test]
    fn unknown_characteristics_are_no_ops() {
        let b = bridge();
        block_on(b.connect(&PEER, fast_config().connect_timeout)).unwrap();
        let unknown = normalize(&BleUuid::Short(0xFFF1));

        block_on(b.write(&unknown, &[1, 2, 3])).unwrap();
        assert!(b.radio().writes.borrow().is_empty());
        assert!(block_on(b.read(&unknown)).unwrap().is_empty());
        assert!(!b.start_notify(&unknown));
    }

    #[test]
    fn write_and_read_reach_the_peer() {
        let b = bridge();
        block_on(b.connect(&PEER, fast_config().connect_timeout)).unwrap();
        let level = normalize(&BleUuid::Short(0x2A19));
        let control = normalize(&BleUuid::Short(0x2A39));

        block_on(b.write(&control, &[0x01])).unwrap();
        assert_eq!(b.radio().writes.borrow().as_slice(), &[(3, vec![0x01])]);
        assert_eq!(block_on(b.read(&level)).unwrap().as_slice(), &[87]);
    }

    #[test]
    fn notifications_are_forwarded_until_disconnect() {
        let b = bridge();
        let sink = Collected::default();
        let hr = NormalizedUuid::parse(HEART_RATE_MEASUREMENT).unwrap();

        with_workers(&b, &sink, async {
            b.connect(&PEER, fast_config().connect_timeout).await.unwrap();
            assert!(b.start_notify(&hr));
            assert!(!b.start_notify(&hr));
            assert_eq!(b.active_notifications(), 1);

            b.radio().notify(1, &[0x00, 72]);
            b.radio().notify(1, &[]);
            b.radio().notify(1, &[0x00, 74]);
            wait_until(|| sink.0.borrow().len() == 2).await;

            b.disconnect().await;
            assert_eq!(b.active_notifications(), 0);
            assert_eq!(b.link_state(), LinkState::Disconnected);
        });

        let got = sink.0.borrow();
        assert_eq!(got[0], (HEART_RATE_MEASUREMENT.into(), vec![0x00, 72]));
        assert_eq!(got[1].1, vec![0x00, 74]);
        assert_eq!(b.radio().subscriptions.borrow().as_slice(), &[(1, false)]);
        assert!(!b.radio().is_active());
    }

    #[test]
    fn indicate_only_characteristic_uses_indications() {
        let b = bridge();
        let sink = Collected::default();
        let temp = normalize(&BleUuid::Short(0x2A1C));

        with_workers(&b, &sink, async {
            b.connect(&PEER, fast_config().connect_timeout).await.unwrap();
            assert!(b.start_notify(&temp));
            wait_until(|| !b.radio().subscriptions.borrow().is_empty()).await;
            b.disconnect().await;
        });
        assert_eq!(b.radio().subscriptions.borrow().as_slice(), &[(4, true)]);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let b = bridge();
        let sink = Collected::default();
        with_workers(&b, &sink, async {
            b.disconnect().await;
            b.connect(&PEER, fast_config().connect_timeout).await.unwrap();
            b.disconnect().await;
            b.disconnect().await;
        });
        assert_eq!(b.radio().disconnects.get(), 1);
        assert_eq!(b.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn stalled_worker_keeps_its_slot_until_it_exits() {
        let mut config = fast_config();
        config.teardown_timeout = Duration::from_millis(10);
        let b = BleBridge::new(MockRadio::sensor(), &config);
        let sink = Sluggish {
            delay: Duration::from_millis(100),
            entered: Cell::new(0),
            inner: Collected::default(),
        };
        let hr = NormalizedUuid::parse(HEART_RATE_MEASUREMENT).unwrap();

        with_workers(&b, &sink, async {
            b.connect(&PEER, config.connect_timeout).await.unwrap();
            assert!(b.start_notify(&hr));
            b.radio().notify(1, &[0x00, 72]);
            wait_until(|| sink.entered.get() == 1).await;

            // Worker 0 is stuck forwarding; teardown gives up on it.
            b.disconnect().await;
            assert_eq!(b.active_notifications(), 0);

            b.connect(&PEER, config.connect_timeout).await.unwrap();
            assert!(b.start_notify(&hr));
            wait_until(|| sink.inner.0.borrow().len() == 1).await;
            Timer::after_millis(5).await;
            // The stalled worker exiting must not clobber the new assignment.
            assert_eq!(b.active_notifications(), 1);

            b.radio().notify(1, &[0x00, 80]);
            wait_until(|| sink.inner.0.borrow().len() == 2).await;
            b.disconnect().await;
            assert_eq!(b.active_notifications(), 0);
        });

        assert_eq!(sink.inner.0.borrow()[1].1, vec![0x00, 80]);
    }
}
