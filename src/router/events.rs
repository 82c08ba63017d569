//! Fire-and-forget events for passive observers (status display, LEDs).

use crate::ble::uuid::NormalizedUuid;
use crate::ble::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent<'a> {
    ScanStarted,
    ScanComplete { devices: usize },
    Connected { address: &'a Address, characteristics: usize },
    Disconnected,
    Notification { uuid: &'a NormalizedUuid, value: &'a [u8] },
    ReadValue { uuid: &'a NormalizedUuid, value: &'a [u8] },
    /// Text also published on the `error` topic.
    Error { message: &'a str },
}

/// Observer of bridge activity. Must not block.
pub trait EventSink {
    fn on_event(&self, event: BridgeEvent<'_>);
}

/// No observer.
impl EventSink for () {
    fn on_event(&self, _event: BridgeEvent<'_>) {}
}

impl<S: EventSink> EventSink for &S {
    fn on_event(&self, event: BridgeEvent<'_>) {
        (**self).on_event(event)
    }
}
