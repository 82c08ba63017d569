//! Unified error type for ble2mqtt.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! `Display` renders the text published on the `error` topic;
//! `defmt::Format` is derived for on-target logging.

use core::fmt;

/// Top-level error type used across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// The peripheral did not accept the connection within the timeout.
    ConnectTimeout,

    /// A connect was requested while a scan held the radio past the wait ceiling.
    Busy,

    /// No characteristic with that UUID in the current session.
    CharacteristicNotFound,

    /// The scan could not start or aborted.
    ScanFailure(RadioError),

    /// The BLE stack returned an error outside of scanning.
    Radio(RadioError),

    // Transport
    /// The messaging link did not come back after a scan or connect.
    TransportDisrupted,

    /// Publish / subscribe / connect on the messaging link failed.
    Transport(TransportError),

    // Commands
    /// Address is not six colon-separated hex octets.
    InvalidAddress,

    /// UUID is neither 4 nor 32 hex digits.
    InvalidUuid,

    /// Command or provisioning payload could not be decoded.
    InvalidPayload,

    /// Topic does not fit the fixed topic buffer.
    TopicTooLong,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// Subset of BLE stack errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Raw error code from the host stack.
    Raw(u32),
    /// The controller could not be powered up or down.
    Activation,
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery failed.
    DiscoveryFailed,
    /// Attribute read failed.
    ReadFailed,
    /// Attribute write failed.
    WriteFailed,
    /// CCCD write or notification wait failed.
    NotifyFailed,
    /// The link dropped underneath the operation.
    Disconnected,
}

/// Errors reported by the messaging transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Not connected to the broker.
    NotConnected,
    /// Broker connect / handshake failed.
    ConnectFailed,
    /// Publish was rejected or the link dropped mid-write.
    PublishFailed,
    /// Subscribe was rejected.
    SubscribeFailed,
}

// Convenience conversions

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Error::Radio(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::Raw(code) => write!(f, "stack error {:#x}", code),
            RadioError::Activation => f.write_str("radio activation failed"),
            RadioError::ScanFailed => f.write_str("scan failed"),
            RadioError::ConnectFailed => f.write_str("connect failed"),
            RadioError::DiscoveryFailed => f.write_str("service discovery failed"),
            RadioError::ReadFailed => f.write_str("read failed"),
            RadioError::WriteFailed => f.write_str("write failed"),
            RadioError::NotifyFailed => f.write_str("notify failed"),
            RadioError::Disconnected => f.write_str("peer disconnected"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportError::NotConnected => "not connected",
            TransportError::ConnectFailed => "broker connect failed",
            TransportError::PublishFailed => "publish failed",
            TransportError::SubscribeFailed => "subscribe failed",
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectTimeout => f.write_str("Connect timed out"),
            Error::Busy => f.write_str("Busy: BLE operation in progress"),
            Error::CharacteristicNotFound => f.write_str("Characteristic not found"),
            Error::ScanFailure(e) => write!(f, "{}", e),
            Error::Radio(e) => write!(f, "BLE: {}", e),
            Error::TransportDisrupted => f.write_str("Transport did not recover after BLE activity"),
            Error::Transport(e) => write!(f, "Transport: {}", e),
            Error::InvalidAddress => f.write_str("Invalid address"),
            Error::InvalidUuid => f.write_str("Invalid UUID"),
            Error::InvalidPayload => f.write_str("Invalid payload"),
            Error::TopicTooLong => f.write_str("Topic too long"),
            Error::BufferOverflow => f.write_str("Buffer overflow"),
        }
    }
}
