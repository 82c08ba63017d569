//! Application-wide constants and runtime configuration.
//!
//! Buffer capacities are compile-time constants; timing lives in
//! [`BridgeConfig`] so boards (and tests) can tune it. The provisioning
//! file is decoded by [`DeviceConfig::from_json`].

use embassy_time::Duration;
use serde::Deserialize;

use crate::ble::ScanParams;
use crate::error::Error;

// BLE

/// Hard ceiling on raw advertisements buffered in one scan cycle.
pub const MAX_SCAN_ENTRIES: usize = 200;

/// Legacy advertising payload size; longer reports are truncated.
pub const MAX_ADV_DATA: usize = 31;

/// Maximum characteristics tracked for one GATT session.
pub const MAX_CHARACTERISTICS: usize = 32;

/// Concurrent notification forwarding workers.
pub const MAX_NOTIFY_SLOTS: usize = 8;

/// Largest attribute value we read, write or forward.
pub const MAX_ATT_VALUE: usize = 512;

/// Scan window (ms).
pub const SCAN_DURATION_MS: u64 = 8_000;

/// Extra time granted to the stack after the scan window (ms).
pub const SCAN_GRACE_MS: u64 = 500;

/// Scan interval / window passed to the controller (ms).
pub const SCAN_INTERVAL_MS: u64 = 100;
pub const SCAN_WINDOW_MS: u64 = 30;

/// GAP connect timeout (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Bounded wait for one notification before re-checking the link (ms).
pub const NOTIFY_WAIT_MS: u64 = 60_000;

// Transport

/// Inbound messages buffered between the transport callback and dispatch.
pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Longest topic we build or accept.
pub const MAX_TOPIC_LEN: usize = 128;

/// Longest `{prefix}/{device_id}` base.
pub const MAX_BASE_TOPIC_LEN: usize = 64;

/// Inbound payload ceiling (a full attribute write).
pub const MAX_PAYLOAD_LEN: usize = MAX_ATT_VALUE;

/// Serialized scan results buffer; holds a full cycle at its worst.
pub const SCAN_JSON_CAPACITY: usize = crate::ble::scanner::MAX_ENCODED_RESULTS;

/// `connected` payload buffer.
pub const CONNECTED_JSON_CAPACITY: usize = 4 * 1024;

/// Error-topic text buffer.
pub const ERROR_TEXT_LEN: usize = 128;

/// MQTT keep-alive handed to the transport glue (seconds).
pub const MQTT_KEEPALIVE_SECS: u16 = 30;

/// Scan-cycle tunables handed to [`crate::ble::bridge::BleBridge::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// How long advertisements are collected.
    pub duration: Duration,
    /// Extra time before the scan is force-stopped.
    pub grace: Duration,
    /// Runtime cap on raw advertisements (clamped to [`MAX_SCAN_ENTRIES`]).
    pub max_entries: usize,
    pub params: ScanParams,
}

impl ScanSettings {
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_millis(SCAN_DURATION_MS),
            grace: Duration::from_millis(SCAN_GRACE_MS),
            max_entries: MAX_SCAN_ENTRIES,
            params: ScanParams {
                interval: Duration::from_millis(SCAN_INTERVAL_MS),
                window: Duration::from_millis(SCAN_WINDOW_MS),
                active: true,
            },
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing of the orchestrator and the BLE session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub scan: ScanSettings,
    /// Minimum time between the starts of two scan cycles.
    pub scan_interval: Duration,
    /// Poll period while the transport is not ready or scanning is deferred.
    pub idle_poll: Duration,
    /// Poll period while waiting for the scan interval to elapse.
    pub interval_poll: Duration,
    /// Post-scan transport recovery: number of polls and their period.
    pub recovery_polls: u32,
    pub recovery_poll: Duration,
    /// How long a connect command waits for a running scan to finish.
    pub busy_wait: Duration,
    pub busy_poll: Duration,
    pub connect_timeout: Duration,
    pub notify_wait: Duration,
    /// Upper bound on waiting for notify workers to exit on disconnect.
    pub teardown_timeout: Duration,
    /// Delay between failed transport bring-up attempts.
    pub transport_retry: Duration,
}

impl BridgeConfig {
    pub const fn new() -> Self {
        Self {
            scan: ScanSettings::new(),
            scan_interval: Duration::from_secs(5),
            idle_poll: Duration::from_secs(1),
            interval_poll: Duration::from_millis(500),
            recovery_polls: 30,
            recovery_poll: Duration::from_secs(1),
            busy_wait: Duration::from_secs(30),
            busy_poll: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            notify_wait: Duration::from_millis(NOTIFY_WAIT_MS),
            teardown_timeout: Duration::from_secs(5),
            transport_retry: Duration::from_secs(5),
        }
    }

    /// Single-antenna modules where BLE and Wi-Fi share the radio:
    /// the defaults, spelled out for board code.
    pub const fn compact() -> Self {
        Self::new()
    }

    /// Boards with hardware Wi-Fi/BLE coexistence tolerate back-to-back scans.
    pub const fn coexistence() -> Self {
        let mut config = Self::new();
        config.scan_interval = Duration::from_secs(2);
        config
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Provisioning file (`config.json`) written by the flashing tool.
///
/// All strings borrow from the input buffer, so the buffer must outlive
/// the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig<'a> {
    pub topic_prefix: &'a str,
    pub device_id: &'a str,
    pub wifi_ssid: &'a str,
    pub wifi_password: &'a str,
    pub mqtt_broker: &'a str,
    pub mqtt_port: u16,
    #[serde(borrow, default)]
    pub mqtt_user: Option<&'a str>,
    #[serde(borrow, default)]
    pub mqtt_password: Option<&'a str>,
}

impl<'a> DeviceConfig<'a> {
    pub fn from_json(json: &'a [u8]) -> Result<Self, Error> {
        let (config, _) =
            serde_json_core::from_slice::<DeviceConfig<'a>>(json).map_err(|_| Error::InvalidPayload)?;
        if config.topic_prefix.is_empty() || config.device_id.is_empty() {
            return Err(Error::InvalidPayload);
        }
        Ok(config)
    }
}
