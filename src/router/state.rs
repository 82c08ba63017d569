use core::cell::Cell;

use embassy_time::Instant;

/// Coordination flags between the scan loop and command dispatch.
///
/// Everything runs on one executor, so a check followed by a set with no
/// `.await` in between is atomic.
pub struct BridgeState {
    busy: Cell<bool>,
    scan_paused: Cell<bool>,
    transport_ready: Cell<bool>,
    last_scan_start: Cell<Option<Instant>>,
}

impl BridgeState {
    pub const fn new() -> Self {
        Self {
            busy: Cell::new(false),
            scan_paused: Cell::new(false),
            transport_ready: Cell::new(false),
            last_scan_start: Cell::new(None),
        }
    }

    /// A scan cycle or connect sequence holds the radio.
    pub fn busy(&self) -> bool {
        self.busy.get()
    }

    /// A GATT session (or a connect in progress) suspends autonomous scanning.
    pub fn scan_paused(&self) -> bool {
        self.scan_paused.get()
    }

    /// Command subscriptions are in place and the link is usable.
    pub fn transport_ready(&self) -> bool {
        self.transport_ready.get()
    }

    pub fn last_scan_start(&self) -> Option<Instant> {
        self.last_scan_start.get()
    }

    pub(crate) fn set_scan_paused(&self, paused: bool) {
        self.scan_paused.set(paused);
    }

    pub(crate) fn set_transport_ready(&self, ready: bool) {
        self.transport_ready.set(ready);
    }

    pub(crate) fn set_last_scan_start(&self, at: Instant) {
        self.last_scan_start.set(Some(at));
    }

    /// Take the radio if nobody holds it.
    pub(crate) fn try_claim_radio(&self) -> Option<RadioClaim<'_>> {
        if self.busy.get() {
            return None;
        }
        self.busy.set(true);
        Some(RadioClaim { state: self })
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds `busy` until dropped, on every exit path.
pub(crate) struct RadioClaim<'a> {
    state: &'a BridgeState,
}

impl Drop for RadioClaim<'_> {
    fn drop(&mut self) {
        self.state.busy.set(false);
    }
}
