//! The client session state machine.
//!
//! A [`SessionClient`] owns one logical stream of operations against the
//! replica group and guarantees the session hash chain:
//! - at most one request is in flight at any time (the queue head)
//! - every request's `parent` is the checksum of the most recent reply
//! - every reply's `parent` must equal the checksum of the request it
//!   answers
//!
//! # State machine
//!
//! ```text
//! Unregistered ──first submit──► Registering ──register reply──► Active
//!       │                             │                            │
//!       └──────────────── eviction ───┴────────────────────────────┘
//!                                     ▼
//!                                  Evicted (terminal, fatal)
//! ```
//!
//! Registration is implicit: the first submit prepends an internal
//! `register` request, and the user's request runs behind it. The register
//! reply's commit number becomes the session number.
//!
//! # Failure semantics
//!
//! Protocol violations (bad checksums, stale replies, broken hash chain,
//! wrong cluster) are logged and dropped; the request timeout retransmits
//! with backoff and round-robins across replicas until a valid reply
//! arrives. Eviction by the cluster is fatal: the host must promote
//! [`ClientError::SessionEvicted`] to process termination.

use std::cell::Cell;
use std::rc::Rc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cinnabar_types::{
    Checksum, ClientId, ClusterId, Operation, ReplicaId, RequestNumber, SessionNumber, ViewNumber,
};
use cinnabar_wire::{Command, Header, HEADER_SIZE};

use crate::{ClientError, MessageBus, MessagePool, MessageRef, RingQueue, Timeout};

/// Reply handler: receives the request's user data, the operation, and the
/// reply body.
pub type ReplyCallback = Box<dyn FnMut(u128, Operation, &[u8])>;

/// Client configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Request queue capacity; also the message budget. One slot is
    /// consumed by the internal register request.
    pub request_queue_max: usize,

    /// Body capacity of each pooled message.
    pub body_size_max: usize,

    /// Host tick period in milliseconds. The client never reads a clock;
    /// all timers count ticks.
    pub tick_ms: u64,

    /// Expected round trip in ticks; seeds the request timeout.
    pub rtt_ticks: u64,

    /// Multiple of the round trip to wait before retransmitting.
    pub rtt_multiple: u64,

    /// Ticks between ping broadcasts.
    pub ping_interval_ticks: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_queue_max: 32,
            body_size_max: 16 * 1024,
            tick_ms: 10,
            rtt_ticks: 30,
            rtt_multiple: 2,
            // 30 seconds at the default tick rate.
            ping_interval_ticks: 3_000,
        }
    }
}

impl ClientConfig {
    /// Configuration for testing (small limits, short timeouts).
    pub fn testing() -> Self {
        Self {
            request_queue_max: 4,
            body_size_max: 256,
            tick_ms: 10,
            rtt_ticks: 2,
            rtt_multiple: 2,
            ping_interval_ticks: 1_000,
        }
    }
}

/// The session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request submitted yet; no session number.
    Unregistered,

    /// The register request is queued or in flight.
    Registering,

    /// The cluster assigned a session number.
    Active,

    /// The cluster evicted this session. Terminal.
    Evicted,
}

/// One queued unit of application work.
struct Request {
    user_data: u128,

    /// Absent for the internal register request.
    callback: Option<ReplyCallback>,

    message: MessageRef,
}

/// The client session protocol machine.
///
/// Owned by a single executor; driven by [`SessionClient::tick`] and
/// [`SessionClient::on_message_received`] from the host's event loop.
pub struct SessionClient<B: MessageBus> {
    id: ClientId,
    cluster: ClusterId,
    replica_count: u8,

    state: SessionState,
    session: SessionNumber,
    request_number: RequestNumber,
    view: ViewNumber,

    /// Hash-chain anchor: checksum of the most recent reply, or of the most
    /// recent sent request while its reply is outstanding.
    parent: Checksum,

    bus: B,
    pool: MessagePool,
    request_queue: RingQueue<Request>,

    /// Message budget, shared with pooled messages so the free path credits
    /// it synchronously. Mutated only there and in
    /// [`SessionClient::acquire_message`].
    messages_available: Rc<Cell<u32>>,

    request_timeout: Timeout,
    ping_timeout: Timeout,
    rng: ChaCha8Rng,
}

impl<B: MessageBus> SessionClient<B> {
    /// Creates a client for the given session identity.
    ///
    /// # Panics
    ///
    /// Panics if `id` is zero or `replica_count` is zero.
    pub fn new(
        id: ClientId,
        cluster: ClusterId,
        replica_count: u8,
        bus: B,
        config: ClientConfig,
    ) -> Self {
        assert!(!id.is_zero(), "client id must be non-zero");
        assert!(replica_count > 0, "replica group cannot be empty");

        // One buffer beyond the budget so pings never contend with requests.
        let pool = MessagePool::new(config.request_queue_max + 1, config.body_size_max);

        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(&id.as_u128().to_le_bytes());
        seed[16..].copy_from_slice(&id.as_u128().to_le_bytes());

        let mut ping_timeout = Timeout::new("ping", config.ping_interval_ticks);
        ping_timeout.start();

        Self {
            id,
            cluster,
            replica_count,
            state: SessionState::Unregistered,
            session: SessionNumber::ZERO,
            request_number: RequestNumber::ZERO,
            view: ViewNumber::ZERO,
            parent: Checksum::ZERO,
            bus,
            pool,
            request_queue: RingQueue::new(config.request_queue_max),
            messages_available: Rc::new(Cell::new(config.request_queue_max as u32)),
            request_timeout: Timeout::new("request", config.rtt_ticks * config.rtt_multiple),
            ping_timeout,
            rng: ChaCha8Rng::from_seed(seed),
        }
    }

    /// Advances internal timers. Call at a fixed rate (`tick_ms`).
    pub fn tick(&mut self) {
        if self.state == SessionState::Evicted {
            return;
        }

        self.ping_timeout.tick();
        if self.ping_timeout.fired() {
            self.ping_timeout.reset();
            self.on_ping_timeout();
        }

        self.request_timeout.tick();
        if self.request_timeout.fired() {
            self.on_request_timeout();
        }
    }

    /// Obtains a send buffer under the message budget.
    ///
    /// # Errors
    ///
    /// [`ClientError::BudgetExceeded`] once the budget is exhausted; the
    /// budget replenishes as replies release their request messages.
    pub fn acquire_message(&mut self) -> Result<MessageRef, ClientError> {
        self.check_not_evicted()?;
        if self.messages_available.get() == 0 {
            return Err(ClientError::BudgetExceeded);
        }
        let message = self
            .pool
            .acquire_with_budget(Some(Rc::clone(&self.messages_available)))
            .ok_or(ClientError::BudgetExceeded)?;
        self.messages_available.set(self.messages_available.get() - 1);
        Ok(message)
    }

    /// Releases a reference obtained from [`SessionClient::acquire_message`].
    ///
    /// Dropping the handle is equivalent; this exists for hosts that prefer
    /// an explicit release call.
    pub fn release_message(&mut self, message: MessageRef) {
        drop(message);
    }

    /// Enqueues a typed request. The message body must already be written.
    ///
    /// The first submit of a session implicitly prepends a `register`
    /// request; the user request runs behind it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ReservedOperation`] if `operation` is reserved
    /// - [`ClientError::BudgetExceeded`] if the queue is full
    /// - [`ClientError::SessionEvicted`] after eviction
    pub fn submit(
        &mut self,
        user_data: u128,
        callback: ReplyCallback,
        operation: Operation,
        message: MessageRef,
        body_size: usize,
    ) -> Result<(), ClientError> {
        self.check_not_evicted()?;
        if operation.is_reserved() {
            return Err(ClientError::ReservedOperation { operation });
        }

        {
            let mut m = message.borrow_mut();
            assert_eq!(
                m.body().len(),
                body_size,
                "body_size disagrees with the written body"
            );
            m.header.command = Command::Request;
            m.header.cluster = self.cluster;
            m.header.client = self.id;
            m.header.operation = operation;
            m.header.size = (HEADER_SIZE + body_size) as u32;
        }

        self.register_if_unregistered()?;
        self.enqueue(Request {
            user_data,
            callback: Some(callback),
            message,
        })
    }

    /// Enqueues a pre-formatted request, used for replay.
    ///
    /// The message header must already carry its operation and size; the
    /// request is renumbered when it is first sent.
    ///
    /// # Errors
    ///
    /// As [`SessionClient::submit`].
    pub fn submit_raw(
        &mut self,
        user_data: u128,
        callback: ReplyCallback,
        message: MessageRef,
    ) -> Result<(), ClientError> {
        self.check_not_evicted()?;
        let operation = message.borrow().header.operation;
        if operation.is_reserved() {
            return Err(ClientError::ReservedOperation { operation });
        }

        {
            let mut m = message.borrow_mut();
            debug_assert_eq!(
                m.header.size as usize,
                HEADER_SIZE + m.body().len(),
                "pre-formatted size disagrees with the body"
            );
            m.header.command = Command::Request;
            m.header.cluster = self.cluster;
            m.header.client = self.id;
        }

        self.register_if_unregistered()?;
        self.enqueue(Request {
            user_data,
            callback: Some(callback),
            message,
        })
    }

    /// Handles a message delivered by the I/O driver.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionEvicted`] on a valid eviction at a view at or
    /// above ours. Fatal; see [`ClientError`].
    pub fn on_message_received(&mut self, message: MessageRef) -> Result<(), ClientError> {
        if self.state == SessionState::Evicted {
            tracing::warn!(client = %self.id, "message received after eviction dropped");
            return Ok(());
        }

        let header = {
            let m = message.borrow();
            if !m.valid_checksums() {
                tracing::warn!(client = %self.id, "message with invalid checksum dropped");
                return Ok(());
            }
            m.header
        };

        if header.cluster != self.cluster {
            tracing::warn!(
                client = %self.id,
                ours = %self.cluster,
                theirs = %header.cluster,
                "message from wrong cluster dropped"
            );
            return Ok(());
        }
        if header.client != self.id {
            tracing::trace!(client = %self.id, "message for another client dropped");
            return Ok(());
        }

        match header.command {
            Command::Reply => {
                self.on_reply(&message, header);
                Ok(())
            }
            Command::Eviction => self.on_eviction(header),
            Command::PongClient => {
                self.on_pong_client(header);
                Ok(())
            }
            command => {
                tracing::warn!(client = %self.id, %command, "misdirected message dropped");
                Ok(())
            }
        }
    }

    /// Returns the session lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the session number (zero until registered).
    pub fn session(&self) -> SessionNumber {
        self.session
    }

    /// Returns the highest view seen from the cluster.
    pub fn view(&self) -> ViewNumber {
        self.view
    }

    /// Returns the number of the most recently issued request.
    pub fn request_number(&self) -> RequestNumber {
        self.request_number
    }

    /// Returns the remaining message budget.
    pub fn messages_available(&self) -> u32 {
        self.messages_available.get()
    }

    // ========================================================================
    // Request path
    // ========================================================================

    fn check_not_evicted(&self) -> Result<(), ClientError> {
        if self.state == SessionState::Evicted {
            return Err(ClientError::SessionEvicted {
                client: self.id,
                view: self.view,
            });
        }
        Ok(())
    }

    fn register_if_unregistered(&mut self) -> Result<(), ClientError> {
        if self.state != SessionState::Unregistered {
            return Ok(());
        }
        assert_eq!(self.request_number, RequestNumber::ZERO);
        assert!(self.request_queue.is_empty());

        let message = self.acquire_message()?;
        {
            let mut m = message.borrow_mut();
            m.header.command = Command::Request;
            m.header.cluster = self.cluster;
            m.header.client = self.id;
            m.header.operation = Operation::REGISTER;
            m.header.size = HEADER_SIZE as u32;
        }

        self.state = SessionState::Registering;
        tracing::debug!(client = %self.id, "registering session");
        self.enqueue(Request {
            user_data: 0,
            callback: None,
            message,
        })
    }

    fn enqueue(&mut self, request: Request) -> Result<(), ClientError> {
        let was_empty = self.request_queue.is_empty();
        if self.request_queue.push(request).is_err() {
            return Err(ClientError::BudgetExceeded);
        }
        if self.request_queue.is_full() {
            debug_assert_eq!(
                self.messages_available.get(),
                0,
                "a full queue implies an exhausted budget"
            );
        }
        if was_empty {
            self.send_request_for_the_first_time();
        }
        Ok(())
    }

    /// Seals and sends the queue head. Called exactly once per request, when
    /// it reaches the head.
    fn send_request_for_the_first_time(&mut self) {
        self.request_number = self.request_number.next();

        let (message, header) = {
            let request = self
                .request_queue
                .head_mut()
                .expect("send requires a queue head");
            let mut m = request.message.borrow_mut();
            debug_assert_eq!(m.header.command, Command::Request);

            m.header.parent = self.parent;
            m.header.context = u128::from(self.session.as_u64());
            m.header.request = self.request_number;
            m.header.view = self.view;
            m.set_checksums();

            let header = m.header;
            drop(m);
            (Rc::clone(&request.message), header)
        };

        // This request's checksum anchors the chain until its reply arrives.
        self.parent = header.checksum;

        let replica = self.replica_for_view();
        tracing::debug!(
            client = %self.id,
            request = %header.request,
            operation = %header.operation,
            %replica,
            "sending request for the first time"
        );

        self.request_timeout.start();
        self.bus.send_message_to_replica(replica, message);
    }

    fn on_request_timeout(&mut self) {
        self.request_timeout.backoff(&mut self.rng);

        let Some(request) = self.request_queue.head() else {
            self.request_timeout.stop();
            return;
        };
        let message = Rc::clone(&request.message);
        let request_number = message.borrow().header.request;

        // Round-robin past the presumed-dead primary.
        let attempts = u32::from(self.request_timeout.attempts());
        let replica = ReplicaId::new(
            ((self.view.as_u32().wrapping_add(attempts)) % u32::from(self.replica_count)) as u8,
        );

        tracing::warn!(
            client = %self.id,
            request = %request_number,
            attempts = self.request_timeout.attempts(),
            %replica,
            "request timed out, retransmitting"
        );
        self.bus.send_message_to_replica(replica, message);
    }

    fn replica_for_view(&self) -> ReplicaId {
        ReplicaId::new((self.view.as_u32() % u32::from(self.replica_count)) as u8)
    }

    // ========================================================================
    // Reply path
    // ========================================================================

    fn on_reply(&mut self, message: &MessageRef, header: Header) {
        let Some(inflight) = self.request_queue.head() else {
            tracing::trace!(client = %self.id, "reply with no inflight request dropped");
            return;
        };
        let inflight_header = inflight.message.borrow().header;

        if header.request != inflight_header.request {
            tracing::trace!(
                client = %self.id,
                got = %header.request,
                inflight = %inflight_header.request,
                "stale reply dropped"
            );
            return;
        }
        if header.parent != self.parent {
            tracing::warn!(client = %self.id, request = %header.request, "reply with broken hash chain dropped");
            return;
        }
        if header.operation != inflight_header.operation {
            tracing::warn!(client = %self.id, request = %header.request, "reply with wrong operation dropped");
            return;
        }
        if header.operation == Operation::REGISTER && header.context == 0 {
            tracing::warn!(client = %self.id, "register reply with zero commit dropped");
            return;
        }

        let request = self
            .request_queue
            .pop()
            .expect("inflight request is the queue head");
        self.request_timeout.stop();

        // The chain advances: this reply's checksum is the parent of our
        // next request.
        self.parent = header.checksum;
        if header.view > self.view {
            self.view = header.view;
        }

        let Request {
            user_data,
            mut callback,
            message: request_message,
        } = request;
        // Release the client's reference before anything user-visible runs;
        // the budget credit must be observable from the callback.
        drop(request_message);

        if header.operation == Operation::REGISTER {
            debug_assert!(header.context >> 64 == 0, "commit must fit a session number");
            let session = SessionNumber::new(header.context as u64);
            assert_eq!(self.state, SessionState::Registering);
            self.session = session;
            self.state = SessionState::Active;
            tracing::debug!(client = %self.id, %session, "session registered");
        }

        // Dispatch the next request before the callback runs, so work
        // submitted from inside the callback cannot double-send the head.
        if !self.request_queue.is_empty() {
            self.send_request_for_the_first_time();
        }

        if let Some(callback) = callback.as_mut() {
            let reply = message.borrow();
            callback(user_data, header.operation, reply.body());
        }
    }

    fn on_eviction(&mut self, header: Header) -> Result<(), ClientError> {
        if header.view < self.view {
            tracing::warn!(
                client = %self.id,
                got = %header.view,
                current = %self.view,
                "stale eviction dropped"
            );
            return Ok(());
        }

        self.view = header.view;
        self.state = SessionState::Evicted;
        tracing::error!(
            client = %self.id,
            view = %self.view,
            "session evicted: too many concurrent client sessions"
        );
        Err(ClientError::SessionEvicted {
            client: self.id,
            view: self.view,
        })
    }

    // ========================================================================
    // Ping path
    // ========================================================================

    fn on_ping_timeout(&mut self) {
        let Some(message) = self.pool.acquire() else {
            tracing::warn!(client = %self.id, "no free buffer for ping, skipping");
            return;
        };
        {
            let mut m = message.borrow_mut();
            m.header.command = Command::PingClient;
            m.header.cluster = self.cluster;
            m.header.client = self.id;
            m.header.view = self.view;
            m.header.size = HEADER_SIZE as u32;
            m.set_checksums();
        }

        for replica in 0..self.replica_count {
            self.bus
                .send_message_to_replica(ReplicaId::new(replica), Rc::clone(&message));
        }
    }

    fn on_pong_client(&mut self, header: Header) {
        if header.view > self.view {
            tracing::debug!(client = %self.id, old = %self.view, new = %header.view, "view advanced by pong");
            self.view = header.view;
        }
        if self.state == SessionState::Unregistered {
            if let Err(error) = self.register_if_unregistered() {
                tracing::warn!(client = %self.id, %error, "registration from pong failed");
            }
        }
    }
}
