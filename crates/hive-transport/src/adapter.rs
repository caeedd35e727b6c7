use hive_codec::Message;
use hive_core::NodeAddress;

use crate::error::TransportError;

/// Point-to-point request/reply contract used by the routing engine.
///
/// A call either yields the peer's reply or an error. Implementations hide retries
/// and connection reuse; callers inspect [`TransportError::is_dead`] to decide whether
/// to evict the peer.
pub trait Transmitter: Send + Sync {
    fn transmit(&self, address: &NodeAddress, message: &Message)
        -> Result<Message, TransportError>;
}

/// Inbound side: turns one received message into an optional reply.
///
/// `None` means the message produced no reply; connection-oriented transports close
/// the connection in that case.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> Option<Message>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Option<Message> + Send + Sync,
{
    fn handle(&self, message: Message) -> Option<Message> {
        self(message)
    }
}
