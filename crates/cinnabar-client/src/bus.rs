//! The transport seam between the client and the host's I/O driver.

use cinnabar_types::ReplicaId;

use crate::MessageRef;

/// Outbound message transport.
///
/// The client hands fully checksummed messages to the bus and returns; send
/// completion is invisible to it. The bus may clone the reference and hold
/// it for as long as the send is in flight; the buffer returns to its pool
/// when the last reference drops.
///
/// Inbound delivery goes the other way: the I/O driver calls
/// [`crate::SessionClient::on_message_received`] with each message addressed
/// to the client.
pub trait MessageBus {
    /// Hands `message` to the transport for delivery to `replica`.
    fn send_message_to_replica(&mut self, replica: ReplicaId, message: MessageRef);
}
