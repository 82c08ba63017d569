//! Seam to the messaging transport (MQTT in deployment).
//!
//! The transport owns its socket, keep-alive and reconnect handling. It
//! hands inbound messages to [`CommandQueue::on_message`] and calls
//! [`Orchestrator::on_transport_connected`] after every (re)connect.
//!
//! [`CommandQueue::on_message`]: crate::router::command::CommandQueue::on_message
//! [`Orchestrator::on_transport_connected`]: crate::router::Orchestrator::on_transport_connected

use crate::error::TransportError;
use crate::router::topics::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Messaging link as seen by the orchestrator.
///
/// `publish` and `subscribe` may fail fast with
/// [`TransportError::NotConnected`] while the link is down; they are not
/// expected to wait for a reconnect. Powering the radio up can drop the
/// link, so the orchestrator waits for [`is_connected`](Self::is_connected)
/// after every scan and connect before it publishes anything.
pub trait Transport {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

impl<T: Transport> Transport for &T {
    async fn connect(&self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        (**self).publish(topic, payload, qos, retain).await
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        (**self).subscribe(topic, qos).await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Last-will registration for the broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: Topic,
    pub payload: &'static [u8],
    pub qos: QoS,
    pub retain: bool,
}
