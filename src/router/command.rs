//! Inbound command queue and command decoding.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};
use serde::Deserialize;

use crate::ble::uuid::NormalizedUuid;
use crate::ble::{AddrType, Address, AttValue, PeerAddress};
use crate::config::{COMMAND_QUEUE_DEPTH, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use crate::error::Error;
use crate::router::topics::Route;

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl InboundMessage {
    /// `None` if topic or payload exceed the fixed buffers.
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut t = String::new();
        t.push_str(topic).ok()?;
        Some(Self {
            topic: t,
            payload: Vec::from_slice(payload).ok()?,
        })
    }
}

/// FIFO between the transport callback and the dispatch loop.
pub struct CommandQueue {
    channel: Channel<CriticalSectionRawMutex, InboundMessage, COMMAND_QUEUE_DEPTH>,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self { channel: Channel::new() }
    }

    /// Transport callback. Never blocks: oversized messages and messages
    /// arriving while the queue is full are dropped.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(message) = InboundMessage::new(topic, payload) else {
            warn!("oversized message on {} dropped", topic);
            return false;
        };
        if self.channel.try_send(message).is_err() {
            warn!("command queue full - dropping {}", topic);
            return false;
        }
        true
    }

    pub async fn receive(&self) -> InboundMessage {
        self.channel.receive().await
    }

    pub fn pending(&self) -> usize {
        self.channel.len()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ConnectRequest<'a> {
    address: &'a str,
    #[serde(default)]
    addr_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(PeerAddress),
    Disconnect,
    Write { uuid: NormalizedUuid, data: AttValue },
    Read { uuid: NormalizedUuid },
}

impl Command {
    pub fn parse(route: Route<'_>, payload: &[u8]) -> Result<Self, Error> {
        match route {
            Route::Connect => {
                let (req, _) =
                    serde_json_core::from_slice::<ConnectRequest<'_>>(payload).map_err(|_| Error::InvalidPayload)?;
                Ok(Command::Connect(PeerAddress {
                    address: req.address.parse::<Address>()?,
                    addr_type: AddrType::from_raw(req.addr_type),
                }))
            }
            Route::Disconnect => Ok(Command::Disconnect),
            Route::Write(uuid) => Ok(Command::Write {
                uuid: NormalizedUuid::parse(uuid)?,
                data: AttValue::from_slice(payload).map_err(|_| Error::BufferOverflow)?,
            }),
            Route::Read(uuid) => Ok(Command::Read {
                uuid: NormalizedUuid::parse(uuid)?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_payload_with_and_without_type() {
        let cmd = Command::parse(Route::Connect, br#"{"address":"aa:bb:cc:dd:ee:ff","addr_type":1}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Connect(PeerAddress {
                address: Address::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
                addr_type: AddrType::Random,
            })
        );

        let Command::Connect(peer) = Command::parse(Route::Connect, br#"{"address":"AA:BB:CC:DD:EE:FF"}"#).unwrap() else {
            panic!("expected connect");
        };
        assert_eq!(peer.addr_type, AddrType::Public);
    }

    #[test]
    fn bad_connect_payloads() {
        assert_eq!(Command::parse(Route::Connect, b"not json"), Err(Error::InvalidPayload));
        assert_eq!(Command::parse(Route::Connect, br#"{"addr_type":0}"#), Err(Error::InvalidPayload));
        assert_eq!(
            Command::parse(Route::Connect, br#"{"address":"AA:BB"}"#),
            Err(Error::InvalidAddress)
        );
    }

    #[test]
    fn write_keeps_raw_bytes() {
        let cmd = Command::parse(Route::Write("0x2A39"), &[0x00, 0xFF]).unwrap();
        let Command::Write { uuid, data } = cmd else { panic!("expected write") };
        assert_eq!(uuid.as_str(), "00002a3900001000800000805f9b34fb");
        assert_eq!(data.as_slice(), &[0x00, 0xFF]);
    }

    #[test]
    fn bad_uuid_segment() {
        assert_eq!(Command::parse(Route::Read("nope"), b""), Err(Error::InvalidUuid));
    }

    #[test]
    fn queue_is_bounded_and_fifo() {
        let q = CommandQueue::new();
        for i in 0..COMMAND_QUEUE_DEPTH {
            assert!(q.on_message("ble/gw/read/2a19", &[i as u8]));
        }
        assert!(!q.on_message("ble/gw/disconnect", b""));
        assert_eq!(q.pending(), COMMAND_QUEUE_DEPTH);

        let first = embassy_futures::block_on(q.receive());
        assert_eq!(first.payload.as_slice(), &[0]);
    }

    #[test]
    fn oversized_payload_dropped() {
        let q = CommandQueue::new();
        assert!(!q.on_message("ble/gw/write/2a39", &[0u8; MAX_PAYLOAD_LEN + 1]));
        assert_eq!(q.pending(), 0);
    }
}
