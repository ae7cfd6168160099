//! # cinnabar-client: Session client for `Cinnabar`
//!
//! This crate implements the client half of the `Cinnabar` session protocol:
//! a single-connection, single-inflight-request state machine that provides
//! linearizable operation semantics against a replica group running a
//! Viewstamped-Replication-style consensus protocol.
//!
//! The core pieces:
//! - [`SessionClient`]: the protocol state machine
//! - [`MessageBus`]: the transport seam the host's I/O driver implements
//! - [`MessagePool`] / [`Message`]: reference-counted send buffers under a
//!   per-client budget
//! - [`RingQueue`]: the bounded request queue
//! - [`Timeout`]: tick-driven retransmission and ping timers
//!
//! ## Scheduling model
//!
//! Everything here is single-threaded and cooperative. The host event loop
//! drives the client with [`SessionClient::tick`] at a fixed rate and
//! delivers inbound messages via [`SessionClient::on_message_received`];
//! the client never blocks and never re-enters itself.
//!
//! ## Usage
//!
//! ```ignore
//! use cinnabar_client::{ClientConfig, SessionClient};
//! use cinnabar_types::{ClientId, ClusterId, Operation};
//!
//! let mut client = SessionClient::new(
//!     ClientId::random(),
//!     ClusterId::new(7),
//!     3,
//!     bus,
//!     ClientConfig::default(),
//! );
//!
//! let message = client.acquire_message()?;
//! message.borrow_mut().body_mut().extend_from_slice(b"transfer");
//! client.submit(
//!     1,
//!     Box::new(|user_data, operation, reply| { /* ... */ }),
//!     Operation::new(10),
//!     message,
//!     8,
//! )?;
//!
//! loop {
//!     client.tick(); // every tick_ms, from the host event loop
//! }
//! ```

mod bus;
mod error;
mod message;
mod ring_queue;
mod session;
mod timeout;

pub use bus::MessageBus;
pub use error::{ClientError, ClientResult};
pub use message::{Message, MessagePool, MessageRef};
pub use ring_queue::RingQueue;
pub use session::{ClientConfig, ReplyCallback, SessionClient, SessionState};
pub use timeout::Timeout;
