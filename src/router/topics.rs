//! Topic namespace `{prefix}/{device_id}/...` and inbound routing.

use core::fmt::Write;

use heapless::String;

use crate::ble::uuid::NormalizedUuid;
use crate::config::{DeviceConfig, MAX_BASE_TOPIC_LEN, MAX_TOPIC_LEN};
use crate::error::Error;
use crate::router::transport::{LastWill, QoS};

pub type Topic = String<MAX_TOPIC_LEN>;

pub const STATUS_ONLINE: &[u8] = b"online";
pub const STATUS_OFFLINE: &[u8] = b"offline";

/// Where an inbound message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Connect,
    Disconnect,
    /// UUID segment exactly as received.
    Write(&'a str),
    Read(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String<MAX_BASE_TOPIC_LEN>,
}

impl Topics {
    pub fn new(prefix: &str, device_id: &str) -> Result<Self, Error> {
        let mut base = String::new();
        write!(base, "{}/{}", prefix, device_id).map_err(|_| Error::TopicTooLong)?;
        Ok(Self { base })
    }

    pub fn from_config(config: &DeviceConfig<'_>) -> Result<Self, Error> {
        Self::new(config.topic_prefix, config.device_id)
    }

    pub fn base(&self) -> &str {
        self.base.as_str()
    }

    fn build(&self, parts: &[&str]) -> Result<Topic, Error> {
        let mut topic = Topic::new();
        topic.push_str(&self.base).map_err(|_| Error::TopicTooLong)?;
        for part in parts {
            topic.push('/').map_err(|_| Error::TopicTooLong)?;
            topic.push_str(part).map_err(|_| Error::TopicTooLong)?;
        }
        Ok(topic)
    }

    pub fn status(&self) -> Result<Topic, Error> {
        self.build(&["status"])
    }

    pub fn connect(&self) -> Result<Topic, Error> {
        self.build(&["connect"])
    }

    pub fn disconnect(&self) -> Result<Topic, Error> {
        self.build(&["disconnect"])
    }

    pub fn connected(&self) -> Result<Topic, Error> {
        self.build(&["connected"])
    }

    pub fn disconnected(&self) -> Result<Topic, Error> {
        self.build(&["disconnected"])
    }

    pub fn scan_results(&self) -> Result<Topic, Error> {
        self.build(&["scan", "results"])
    }

    pub fn error(&self) -> Result<Topic, Error> {
        self.build(&["error"])
    }

    /// `write/#`
    pub fn write_filter(&self) -> Result<Topic, Error> {
        self.build(&["write", "#"])
    }

    /// `read/#`
    pub fn read_filter(&self) -> Result<Topic, Error> {
        self.build(&["read", "#"])
    }

    pub fn read_response(&self, uuid: &NormalizedUuid) -> Result<Topic, Error> {
        self.build(&["read", uuid.as_str(), "response"])
    }

    pub fn notify(&self, uuid: &NormalizedUuid) -> Result<Topic, Error> {
        self.build(&["notify", uuid.as_str()])
    }

    /// `status = offline`, retained, for the broker to publish on our behalf.
    pub fn last_will(&self) -> Result<LastWill, Error> {
        Ok(LastWill {
            topic: self.status()?,
            payload: STATUS_OFFLINE,
            qos: QoS::AtLeastOnce,
            retain: true,
        })
    }

    /// Classify an inbound topic. `None` for anything that is not a
    /// command, including our own `read/{uuid}/response` echoes.
    pub fn route<'t>(&self, topic: &'t str) -> Option<Route<'t>> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        match rest {
            "connect" => Some(Route::Connect),
            "disconnect" => Some(Route::Disconnect),
            _ => {
                if let Some(uuid) = rest.strip_prefix("write/") {
                    single_segment(uuid).map(Route::Write)
                } else if let Some(uuid) = rest.strip_prefix("read/") {
                    single_segment(uuid).map(Route::Read)
                } else {
                    None
                }
            }
        }
    }
}

fn single_segment(s: &str) -> Option<&str> {
    (!s.is_empty() && !s.contains('/')).then_some(s)
}
