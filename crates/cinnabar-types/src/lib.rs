//! # cinnabar-types: Core types for `Cinnabar`
//!
//! This crate contains shared types used across the `Cinnabar` system:
//! - Session identity ([`ClientId`], [`ClusterId`], [`SessionNumber`])
//! - Protocol counters ([`RequestNumber`], [`ViewNumber`])
//! - Replica addressing ([`ReplicaId`])
//! - Message integrity ([`Checksum`])
//! - Operation numbering ([`Operation`])
//!
//! All types are cheap `Copy` newtypes. Wrapping the raw integers prevents
//! mismatch bugs like passing a request number where a view is expected.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// ClientId
// ============================================================================

/// Unique identifier for a client session.
///
/// Client ids are 128-bit random values, ephemeral per process, generated by
/// a cryptographic RNG. The zero id is reserved: a live session always has
/// `client_id != 0`, and the replica group uses zero to mean "no client".
///
/// # Examples
///
/// ```
/// # use cinnabar_types::ClientId;
/// let id = ClientId::random();
/// assert_ne!(id, ClientId::ZERO);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u128);

impl ClientId {
    /// The reserved zero id. Never a valid session identity.
    pub const ZERO: ClientId = ClientId(0);

    /// Creates a client id from a raw value.
    pub fn new(id: u128) -> Self {
        Self(id)
    }

    /// Generates a fresh random client id from the OS entropy source.
    ///
    /// Loops until a non-zero value is drawn; the zero id is reserved.
    pub fn random() -> Self {
        use rand::Rng;
        loop {
            let id: u128 = rand::rngs::OsRng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Returns the client id as a u128.
    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// Returns true if this is the reserved zero id.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{:032x}", self.0)
    }
}

impl From<u128> for ClientId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<ClientId> for u128 {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

// ============================================================================
// ClusterId
// ============================================================================

/// Identifier shared by all replicas of one cluster.
///
/// A client only accepts messages whose cluster id matches its own; anything
/// else is a protocol violation and is dropped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ClusterId(u32);

impl ClusterId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster#{}", self.0)
    }
}

impl From<u32> for ClusterId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ============================================================================
// ReplicaId
// ============================================================================

/// Index of a replica within the group, addressed `0..replica_count`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(u8);

impl ReplicaId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica#{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

// ============================================================================
// SessionNumber
// ============================================================================

/// The session number assigned by the cluster at registration.
///
/// Zero until registration succeeds, then fixed for the lifetime of the
/// session. The cluster never assigns session number zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SessionNumber(u64);

impl SessionNumber {
    /// The unregistered session number.
    pub const ZERO: SessionNumber = SessionNumber(0);

    pub fn new(session: u64) -> Self {
        Self(session)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true once the cluster has assigned a session.
    pub fn is_registered(self) -> bool {
        self.0 != 0
    }
}

impl Display for SessionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

// ============================================================================
// RequestNumber
// ============================================================================

/// Monotonic per-session request counter.
///
/// Starts at zero; the register request is number 1, the first user request
/// number 2, and so on. Each reply must carry the number of the request it
/// answers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestNumber(u32);

impl RequestNumber {
    pub const ZERO: RequestNumber = RequestNumber(0);

    pub fn new(request: u32) -> Self {
        Self(request)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next request number.
    ///
    /// # Panics
    ///
    /// Panics on overflow. A session issuing 2^32 requests has outlived any
    /// reasonable process lifetime; wrapping would break the chain.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("request number overflow"))
    }
}

impl Display for RequestNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

// ============================================================================
// ViewNumber
// ============================================================================

/// Monotonically advancing identifier of a replica configuration / primary.
///
/// The client tracks the highest view it has seen from the cluster and
/// routes new requests to `view mod replica_count`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewNumber(u32);

impl ViewNumber {
    pub const ZERO: ViewNumber = ViewNumber(0);

    pub fn new(view: u32) -> Self {
        Self(view)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

// ============================================================================
// Checksum
// ============================================================================

/// A 128-bit message checksum (a cryptographic digest truncated to 16 bytes).
///
/// Checksums double as hash-chain links: each request's `parent` is the
/// checksum of the most recent reply, and each reply's `parent` is the
/// checksum of the request it answers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Checksum(u128);

impl Checksum {
    /// The zero checksum, used as the hash-chain anchor before any reply.
    pub const ZERO: Checksum = Checksum(0);

    pub fn new(checksum: u128) -> Self {
        Self(checksum)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// Reads a checksum from its 16-byte little-endian wire form.
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    /// Returns the 16-byte little-endian wire form.
    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ============================================================================
// Operation
// ============================================================================

/// An operation number carried in a request or reply header.
///
/// Values below [`Operation::RESERVED_COUNT`] are reserved for protocol
/// messages; application operations occupy values at or above it. Submitting
/// a reserved operation through the public client API is a programming error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Operation(u8);

impl Operation {
    /// Number of operation values reserved for the protocol.
    pub const RESERVED_COUNT: u8 = 3;

    /// The invalid zero operation.
    pub const RESERVED: Operation = Operation(0);

    /// The root operation, used only by the cluster bootstrap.
    pub const ROOT: Operation = Operation(1);

    /// Session registration. Issued internally by the client; never by users.
    pub const REGISTER: Operation = Operation(2);

    pub fn new(operation: u8) -> Self {
        Self(operation)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns true if this operation is reserved for protocol messages.
    pub fn is_reserved(self) -> bool {
        self.0 < Self::RESERVED_COUNT
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Operation::RESERVED => write!(f, "reserved"),
            Operation::ROOT => write!(f, "root"),
            Operation::REGISTER => write!(f, "register"),
            Operation(op) => write!(f, "op#{op}"),
        }
    }
}

impl From<u8> for Operation {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_client_ids_are_nonzero_and_distinct() {
        let a = ClientId::random();
        let b = ClientId::random();
        assert!(!a.is_zero());
        assert!(!b.is_zero());
        assert_ne!(a, b);
    }

    #[test]
    fn session_number_registration() {
        assert!(!SessionNumber::ZERO.is_registered());
        assert!(SessionNumber::new(100).is_registered());
    }

    #[test]
    fn request_number_next_is_monotonic() {
        let r = RequestNumber::ZERO;
        assert_eq!(r.next(), RequestNumber::new(1));
        assert_eq!(r.next().next(), RequestNumber::new(2));
    }

    #[test]
    fn operation_reserved_boundary() {
        assert!(Operation::RESERVED.is_reserved());
        assert!(Operation::ROOT.is_reserved());
        assert!(Operation::REGISTER.is_reserved());
        assert!(!Operation::new(Operation::RESERVED_COUNT).is_reserved());
        assert!(!Operation::new(10).is_reserved());
    }

    #[test]
    fn operation_display() {
        assert_eq!(format!("{}", Operation::REGISTER), "register");
        assert_eq!(format!("{}", Operation::new(10)), "op#10");
    }

    #[test]
    fn checksum_le_roundtrip() {
        let checksum = Checksum::new(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        assert_eq!(Checksum::from_le_bytes(checksum.to_le_bytes()), checksum);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_checksum_wire_roundtrip(raw in any::<u128>()) {
            let checksum = Checksum::new(raw);
            prop_assert_eq!(Checksum::from_le_bytes(checksum.to_le_bytes()), checksum);
        }

        #[test]
        fn prop_operation_reserved_iff_below_threshold(op in any::<u8>()) {
            prop_assert_eq!(
                Operation::new(op).is_reserved(),
                op < Operation::RESERVED_COUNT
            );
        }
    }
}
