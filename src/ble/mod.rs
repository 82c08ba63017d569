//! Bluetooth Low Energy subsystem (Central role).
//!
//! 1. **Advertisement parser** - decodes raw AD structures.
//! 2. **UUID normalizer** - one canonical text form for every UUID.
//! 3. **Scanner** - bounded collection and per-cycle deduplication.
//! 4. **Bridge** - scan cycles, the single GATT session and the
//!    notification forwarding workers.
//!
//! The host stack itself is reached through the [`Radio`] trait.

pub mod adv_parser;
pub mod bridge;
pub mod scanner;
pub mod uuid;

use core::fmt::{self, Write};
use core::str::FromStr;

use embassy_time::Duration;
use heapless::{String, Vec};
use serde::{Serialize, Serializer};

use crate::config::{MAX_ATT_VALUE, MAX_CHARACTERISTICS};
use crate::error::{Error, RadioError};
use scanner::ScanCollector;
use uuid::{BleUuid, NormalizedUuid};

/// Raw attribute value as read, written or notified.
pub type AttValue = Vec<u8, MAX_ATT_VALUE>;

/// BLE device address, most significant octet first (display order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// `AA:BB:CC:DD:EE:FF` form used on the wire.
    pub fn to_text(&self) -> String<17> {
        let mut s = String::new();
        let _ = write!(s, "{}", self);
        s
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Address {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.to_text().as_str())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses six colon-separated hex octets, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(Error::InvalidAddress)?;
            if part.len() != 2 {
                return Err(Error::InvalidAddress);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| Error::InvalidAddress)?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidAddress);
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.to_text().as_str())
    }
}

/// GAP address type as carried on the wire (0 = public, 1 = random).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrType {
    #[default]
    Public,
    Random,
}

impl AddrType {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => AddrType::Public,
            _ => AddrType::Random,
        }
    }

    pub const fn to_raw(self) -> u8 {
        match self {
            AddrType::Public => 0,
            AddrType::Random => 1,
        }
    }
}

impl Serialize for AddrType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.to_raw())
    }
}

/// Connection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub address: Address,
    pub addr_type: AddrType,
}

/// Controller scan parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub interval: Duration,
    pub window: Duration,
    /// Request scan responses (needed for most device names).
    pub active: bool,
}

/// GATT characteristic property bits (Core spec Vol 3, Part G, 3.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharProperties(u8);

impl CharProperties {
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    /// Wire names, in the order they are reported.
    const NAMES: [(u8, &'static str); 5] = [
        (Self::READ, "read"),
        (Self::WRITE, "write"),
        (Self::NOTIFY, "notify"),
        (Self::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (Self::INDICATE, "indicate"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// The peer can push values (notify or indicate).
    pub const fn can_push(self) -> bool {
        self.contains(Self::NOTIFY) || self.contains(Self::INDICATE)
    }

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(bit, _)| self.contains(*bit))
            .map(|(_, name)| name)
    }
}

impl Serialize for CharProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// A characteristic as reported to the command side after connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicDescriptor {
    pub uuid: NormalizedUuid,
    pub properties: CharProperties,
}

/// A characteristic found by GATT discovery, with the stack's handle.
#[derive(Debug, Clone)]
pub struct RemoteCharacteristic<C> {
    pub uuid: BleUuid,
    pub properties: CharProperties,
    pub handle: C,
}

/// Characteristics of one discovery pass.
pub type Discovered<C> = Vec<RemoteCharacteristic<C>, MAX_CHARACTERISTICS>;

/// Seam to the BLE host stack.
///
/// Implementations wrap the board's stack (trouble, SoftDevice, ESP-IDF
/// NimBLE, ...). Handles are cheap clones; the bridge never holds a
/// borrow of its own state across a call.
pub trait Radio {
    type Connection: Clone;
    type Characteristic: Clone;

    /// Power the controller up or down.
    async fn set_active(&self, active: bool) -> Result<(), RadioError>;

    /// Feed advertisement reports into `collector` until cancelled.
    /// Returning early ends the scan window.
    async fn scan(&self, params: &ScanParams, collector: &mut ScanCollector) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, peer: &PeerAddress) -> Result<Self::Connection, RadioError>;

    /// Every characteristic of every primary service.
    async fn discover(&self, conn: &Self::Connection) -> Result<Discovered<Self::Characteristic>, RadioError>;

    async fn read(&self, conn: &Self::Connection, ch: &Self::Characteristic) -> Result<AttValue, RadioError>;

    /// Write with response.
    async fn write(&self, conn: &Self::Connection, ch: &Self::Characteristic, data: &[u8]) -> Result<(), RadioError>;

    /// Enable notifications (or indications) through the CCCD.
    async fn subscribe(&self, conn: &Self::Connection, ch: &Self::Characteristic, indicate: bool) -> Result<(), RadioError>;

    /// Wait for the next notified/indicated value.
    async fn notified(&self, conn: &Self::Connection, ch: &Self::Characteristic) -> Result<AttValue, RadioError>;

    fn is_connected(&self, conn: &Self::Connection) -> bool;

    async fn disconnect(&self, conn: &Self::Connection) -> Result<(), RadioError>;
}
