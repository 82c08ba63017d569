//! Advertising data (AD structure) decoding.
//!
//! Payload layout: `[len][type][len - 1 bytes of value]...`. A zero length
//! or a dangling length byte stops the walk. A structure whose declared
//! length runs past the end of the buffer is decoded from the bytes that
//! are present and ends the walk, so a name cut short by a truncated
//! report still comes through.

use core::fmt::Write;

use heapless::{String, Vec};

/// Longest local name we keep (a legacy payload carries at most 29 bytes).
pub const MAX_NAME_LEN: usize = 32;

/// Service UUIDs kept per advertisement.
pub const MAX_SERVICES: usize = 16;

/// Manufacturer data, hex-encoded.
pub const MAX_MFR_HEX: usize = 64;

pub const AD_INCOMPLETE_UUID16: u8 = 0x02;
pub const AD_COMPLETE_UUID16: u8 = 0x03;
pub const AD_SHORTENED_NAME: u8 = 0x08;
pub const AD_COMPLETE_NAME: u8 = 0x09;
pub const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// One AD structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdStructure<'a> {
    CompleteLocalName(&'a [u8]),
    ShortenedLocalName(&'a [u8]),
    /// Little-endian 16-bit UUID list (complete or incomplete).
    ServiceUuids16(&'a [u8]),
    ManufacturerSpecificData { company_identifier: u16, payload: &'a [u8] },
    Unknown { ty: u8, data: &'a [u8] },
}

impl<'a> AdStructure<'a> {
    fn decode(ty: u8, data: &'a [u8]) -> Self {
        match ty {
            AD_COMPLETE_NAME => AdStructure::CompleteLocalName(data),
            AD_SHORTENED_NAME => AdStructure::ShortenedLocalName(data),
            AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => AdStructure::ServiceUuids16(data),
            // Company id plus at least one byte of data.
            AD_MANUFACTURER_DATA if data.len() >= 3 => AdStructure::ManufacturerSpecificData {
                company_identifier: u16::from_le_bytes([data[0], data[1]]),
                payload: &data[2..],
            },
            _ => AdStructure::Unknown { ty, data },
        }
    }
}

/// Iterator over the AD structures of one payload.
pub struct AdStructureIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for AdStructureIter<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.offset;
        if i >= self.data.len() {
            return None;
        }
        let len = self.data[i] as usize;
        if len == 0 || i + 1 >= self.data.len() {
            self.offset = self.data.len();
            return None;
        }
        let ty = self.data[i + 1];
        let end = (i + 1 + len).min(self.data.len());
        let value = &self.data[i + 2..end];
        self.offset = i + len + 1;
        Some(AdStructure::decode(ty, value))
    }
}

pub fn ad_structures(data: &[u8]) -> AdStructureIter<'_> {
    AdStructureIter { data, offset: 0 }
}

/// Manufacturer-specific data of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub company_id: u16,
    /// Lowercase hex of the bytes following the company id.
    pub data: String<MAX_MFR_HEX>,
}

/// Fields extracted from one advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAdvertisement {
    /// Empty when absent or not valid UTF-8.
    pub name: String<MAX_NAME_LEN>,
    /// Distinct 16-bit service UUIDs in order of appearance.
    pub services: Vec<u16, MAX_SERVICES>,
    pub manufacturer: Option<ManufacturerData>,
}

/// Decode the fields the bridge reports. Never fails: unknown types are
/// skipped and a truncated tail yields whatever bytes it carries.
pub fn parse_advertisement(data: &[u8]) -> ParsedAdvertisement {
    let mut parsed = ParsedAdvertisement::default();

    for ad in ad_structures(data) {
        match ad {
            AdStructure::CompleteLocalName(bytes) | AdStructure::ShortenedLocalName(bytes) => {
                if let Ok(name) = core::str::from_utf8(bytes) {
                    parsed.name = truncate_name(name);
                }
            }
            AdStructure::ServiceUuids16(bytes) => {
                for pair in bytes.chunks_exact(2) {
                    let uuid = u16::from_le_bytes([pair[0], pair[1]]);
                    if !parsed.services.contains(&uuid) {
                        let _ = parsed.services.push(uuid);
                    }
                }
            }
            AdStructure::ManufacturerSpecificData { company_identifier, payload } => {
                parsed.manufacturer = Some(ManufacturerData {
                    company_id: company_identifier,
                    data: hex_lower(payload),
                });
            }
            AdStructure::Unknown { .. } => {}
        }
    }

    parsed
}

fn truncate_name(name: &str) -> String<MAX_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn hex_lower<const N: usize>(bytes: &[u8]) -> String<N> {
    let mut out = String::new();
    for b in bytes {
        if write!(out, "{:02x}", b).is_err() {
            break;
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
