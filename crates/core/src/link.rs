//! Remote link transport contract.

use thiserror::Error;
use xachain_messages::RemoteMessage;
use xachain_types::ServerId;

/// Errors from the remote link transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("{0} is unreachable")]
    Unreachable(ServerId),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers remote protocol messages to other coordinators.
///
/// The transport only has to report whether a send succeeded. Retrying and
/// exactly-once effects are the engine's job: every message is safe to
/// deliver more than once.
///
/// `send` may block; the runtime calls it off the async workers. Messages
/// to one server must arrive in the order they were sent.
///
/// The chaining extension calls of the resource contract map onto messages:
/// `reportReady(xid)` is [`RemoteMessage::Ready`], `reportDone(xid)` is
/// [`RemoteMessage::Done`] and `retry(server)` is
/// [`RemoteMessage::RetryRequest`].
pub trait RemoteLink: Send + Sync {
    fn send(&self, to: &ServerId, message: &RemoteMessage) -> Result<(), LinkError>;
}
