//! Scan-cycle bookkeeping.
//!
//! The radio pushes every advertisement report into a [`ScanCollector`]
//! while the scan window is open. Once it closes, [`deduplicate`] merges
//! the reports into one [`ScanResult`] per address and drops the noise.

use heapless::{String, Vec};
use serde::Serialize;

use crate::ble::adv_parser::{parse_advertisement, MAX_MFR_HEX, MAX_NAME_LEN, MAX_SERVICES};
use crate::ble::{AddrType, Address};
use crate::config::{MAX_ADV_DATA, MAX_SCAN_ENTRIES};

/// One advertisement report, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub address: Address,
    pub addr_type: AddrType,
    pub rssi: i8,
    pub data: Vec<u8, MAX_ADV_DATA>,
}

/// Bounded buffer the radio fills during one scan window.
///
/// Reports beyond the limit are counted and dropped; nothing is ever
/// queued past the cap.
pub struct ScanCollector {
    entries: Vec<RawAdvertisement, MAX_SCAN_ENTRIES>,
    limit: usize,
    dropped: usize,
}

impl ScanCollector {
    /// `limit` is clamped to [`MAX_SCAN_ENTRIES`].
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: limit.min(MAX_SCAN_ENTRIES),
            dropped: 0,
        }
    }

    /// Store one report. Returns `false` when it was dropped.
    pub fn record(&mut self, address: Address, addr_type: AddrType, rssi: i8, data: &[u8]) -> bool {
        if self.entries.len() >= self.limit {
            self.dropped += 1;
            return false;
        }
        let data = &data[..data.len().min(MAX_ADV_DATA)];
        let mut payload = Vec::new();
        // Length clamped above.
        let _ = payload.extend_from_slice(data);
        let _ = self.entries.push(RawAdvertisement {
            address,
            addr_type,
            rssi,
            data: payload,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limit
    }

    /// Reports discarded because the collector was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn entries(&self) -> &[RawAdvertisement] {
        &self.entries
    }
}

/// 16-bit service UUID rendered as four lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceUuid16(pub u16);

impl Serialize for ServiceUuid16 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use core::fmt::Write;
        let mut s: String<4> = String::new();
        let _ = write!(s, "{:04x}", self.0);
        serializer.serialize_str(s.as_str())
    }
}

/// Best-known view of one device over a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub address: Address,
    pub name: String<MAX_NAME_LEN>,
    pub rssi: i8,
    pub services: Vec<ServiceUuid16, MAX_SERVICES>,
    pub addr_type: AddrType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer_data: Option<String<MAX_MFR_HEX>>,
}

impl ScanResult {
    fn from_report(raw: &RawAdvertisement) -> Self {
        let parsed = parse_advertisement(&raw.data);
        let (manufacturer_id, manufacturer_data) = match parsed.manufacturer {
            Some(m) => (Some(m.company_id), Some(m.data)),
            None => (None, None),
        };
        Self {
            address: raw.address,
            name: parsed.name,
            rssi: raw.rssi,
            services: parsed.services.iter().map(|s| ServiceUuid16(*s)).collect(),
            addr_type: raw.addr_type,
            manufacturer_id,
            manufacturer_data,
        }
    }

    /// Fold a later sighting of the same address into this record.
    fn merge(&mut self, other: ScanResult) {
        if other.rssi > self.rssi {
            self.rssi = other.rssi;
        }
        if self.name.is_empty() && !other.name.is_empty() {
            self.name = other.name;
        }
        if self.manufacturer_data.is_none() && other.manufacturer_data.is_some() {
            self.manufacturer_id = other.manufacturer_id;
            self.manufacturer_data = other.manufacturer_data;
        }
    }

    /// Anything worth reporting: a name or manufacturer data.
    pub fn is_identifiable(&self) -> bool {
        !self.name.is_empty() || self.manufacturer_data.is_some()
    }
}

/// Results of one scan cycle.
pub type ScanResults = Vec<ScanResult, MAX_SCAN_ENTRIES>;

/// Longest JSON encoding of one [`ScanResult`]: every field at capacity,
/// every name byte a control character (escaped as `\u00XX`).
pub const MAX_ENCODED_RESULT: usize = r#"{"address":""#.len()
    + 17
    + r#"","name":""#.len()
    + 6 * MAX_NAME_LEN
    + r#"","rssi":"#.len()
    + "-128".len()
    + r#","services":["#.len()
    + MAX_SERVICES * r#""ffff","#.len()
    + "]".len()
    + r#","addr_type":"#.len()
    + "255".len()
    + r#","manufacturer_id":"#.len()
    + "65535".len()
    + r#","manufacturer_data":""#.len()
    + MAX_MFR_HEX
    + r#""}"#.len();

/// Longest JSON encoding of a full [`ScanResults`] array.
pub const MAX_ENCODED_RESULTS: usize = 2 + MAX_SCAN_ENTRIES * (MAX_ENCODED_RESULT + 1);

/// Merge raw reports per address and drop unidentifiable devices.
///
/// The first report of an address fixes its address type and service
/// list; later ones raise RSSI and fill in a missing name or missing
/// manufacturer data.
pub fn deduplicate(reports: &[RawAdvertisement]) -> ScanResults {
    let mut results = ScanResults::new();

    for raw in reports {
        let sighting = ScanResult::from_report(raw);
        match results.iter_mut().find(|r| r.address == raw.address) {
            Some(existing) => existing.merge(sighting),
            None => {
                // Never more distinct addresses than reports, which are capped alike.
                let _ = results.push(sighting);
            }
        }
    }

    results.retain(|r| r.is_identifiable());
    results
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
