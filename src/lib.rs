//! ble2mqtt - transparent BLE-central-to-MQTT bridge core.
//!
//! Exposes generic GATT operations (scan, connect, read, write,
//! notify) as pub/sub messages without knowing anything about the
//! peripherals on the other end.
//!
//! Board firmware supplies three pieces and runs one future:
//!
//! ```text
//!   Radio (BLE host stack) ─┐
//!   Transport (MQTT)       ─┼─> Orchestrator::run()
//!   EventSink (display)    ─┘
//! ```
//!
//! The transport glue feeds inbound messages to
//! [`CommandQueue::on_message`] and calls
//! [`Orchestrator::on_transport_connected`] after each reconnect.
//!
//! Pure logic (advertisement parsing, UUID normalization, dedup, topic
//! routing) is `no_std` and unit-tested on the host: `cargo test`.

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod router;

#[cfg(test)]
mod testing;

pub use ble::bridge::{BleBridge, LinkState, NotifyForward};
pub use ble::uuid::{normalize, BleUuid, NormalizedUuid};
pub use ble::{AddrType, Address, PeerAddress, Radio};
pub use config::{BridgeConfig, DeviceConfig};
pub use error::{Error, RadioError, TransportError};
pub use router::command::CommandQueue;
pub use router::events::{BridgeEvent, EventSink};
pub use router::topics::Topics;
pub use router::transport::{QoS, Transport};
pub use router::Orchestrator;
