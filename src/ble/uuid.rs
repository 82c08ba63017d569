//! Canonical UUID form shared with everything that talks to the bridge:
//! 32 lowercase hex digits, no dashes, 16-bit UUIDs expanded over the
//! Bluetooth base UUID.

use core::fmt::{self, Write};

use heapless::String;
use serde::{Serialize, Serializer};

use crate::error::Error;

/// Tail of the Bluetooth base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.
pub const BASE_UUID_SUFFIX: &str = "00001000800000805f9b34fb";

/// UUID as handed over by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleUuid {
    /// SIG-assigned 16-bit alias.
    Short(u16),
    /// Full 128-bit value, most significant byte first.
    Long([u8; 16]),
}

impl From<u16> for BleUuid {
    fn from(v: u16) -> Self {
        BleUuid::Short(v)
    }
}

impl From<[u8; 16]> for BleUuid {
    fn from(v: [u8; 16]) -> Self {
        BleUuid::Long(v)
    }
}

/// Lowercase 32-hex-digit UUID. Only constructible through normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUuid(String<32>);

impl NormalizedUuid {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Normalize textual input: `2a9d`, `0x2A9D`, dashed or bare 128-bit forms.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);

        if text.len() == 4 {
            let short = u16::from_str_radix(text, 16).map_err(|_| Error::InvalidUuid)?;
            return Ok(normalize(&BleUuid::Short(short)));
        }

        let mut out = String::new();
        for c in text.chars().filter(|c| *c != '-') {
            if !c.is_ascii_hexdigit() {
                return Err(Error::InvalidUuid);
            }
            out.push(c.to_ascii_lowercase()).map_err(|_| Error::InvalidUuid)?;
        }
        if out.len() != 32 {
            return Err(Error::InvalidUuid);
        }
        Ok(Self(out))
    }
}

/// Canonicalize a stack-level UUID.
pub fn normalize(uuid: &BleUuid) -> NormalizedUuid {
    let mut out = String::new();
    // Both arms produce exactly 32 characters, so writes cannot overflow.
    let _ = match uuid {
        BleUuid::Short(v) => write!(out, "0000{:04x}{}", v, BASE_UUID_SUFFIX),
        BleUuid::Long(bytes) => bytes.iter().try_for_each(|b| write!(out, "{:02x}", b)),
    };
    NormalizedUuid(out)
}

impl From<&BleUuid> for NormalizedUuid {
    fn from(uuid: &BleUuid) -> Self {
        normalize(uuid)
    }
}

impl fmt::Display for NormalizedUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for NormalizedUuid {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}

impl Serialize for NormalizedUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
