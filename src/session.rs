//! Communication session management
//!
//! This module defines the trait for tunneling messages between the
//! session and connected participants. The tunnel abstraction keeps the
//! game logic independent of the transport actually carrying the messages.

use tokio::sync::mpsc::UnboundedSender;

use super::UpdateMessage;

/// Trait for sending messages through a communication tunnel
///
/// Implementations might wrap a WebSocket, a socket.io-style channel or an
/// in-process queue. Sending is fire-and-forget: the transport owns delivery,
/// so implementations must not block.
pub trait Tunnel {
    /// Sends an update message to the participant
    ///
    /// # Arguments
    ///
    /// * `message` - The update message to send
    fn send_message(&self, message: &UpdateMessage);
}

/// Tunnel over an unbounded channel of serialized JSON messages
///
/// The receiving half is typically drained by the task writing to the
/// participant's socket.
impl Tunnel for UnboundedSender<String> {
    fn send_message(&self, message: &UpdateMessage) {
        if self.send(message.to_message()).is_err() {
            log::debug!("dropping message for a closed tunnel");
        }
    }
}
