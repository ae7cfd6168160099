//! # cinnabar-wire: Wire protocol for `Cinnabar`
//!
//! This crate defines the bit-exact binary protocol spoken between a client
//! session and the replica group:
//! - [`Header`]: the fixed 128-byte little-endian message header
//! - [`Command`]: the protocol commands directed at clients
//! - [`checksum`]: the 128-bit truncated BLAKE3 digest used for both message
//!   integrity and hash-chain linkage
//!
//! The header layout is shared with the replica implementation and must not
//! change without a protocol version bump.

mod command;
mod error;
mod header;

pub use command::Command;
pub use error::WireError;
pub use header::{Header, HEADER_SIZE};

use cinnabar_types::Checksum;

/// Computes the 128-bit checksum of `data`.
///
/// BLAKE3 truncated to 16 bytes. Truncation preserves the collision
/// resistance needed for hash-chain linkage while keeping headers at a fixed
/// 128 bytes.
///
/// # Examples
///
/// ```
/// # use cinnabar_wire::checksum;
/// let a = checksum(b"debits");
/// let b = checksum(b"credits");
/// assert_ne!(a, b);
/// assert_eq!(a, checksum(b"debits"));
/// ```
pub fn checksum(data: &[u8]) -> Checksum {
    let digest = blake3::hash(data);
    let mut truncated = [0u8; 16];
    truncated.copy_from_slice(&digest.as_bytes()[..16]);
    Checksum::from_le_bytes(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(checksum(b"ledger"), checksum(b"ledger"));
    }

    #[test]
    fn checksum_of_empty_is_nonzero() {
        assert_ne!(checksum(b""), Checksum::ZERO);
    }
}
