//! The fixed 128-byte message header.
//!
//! # Header Format
//!
//! All integers are little-endian:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Field                      │
//! ├─────────────────────────────────────────────────┤
//! │  0       │  16    │  checksum                   │
//! │  16      │  16    │  checksum_body              │
//! │  32      │  16    │  parent                     │
//! │  48      │  16    │  client                     │
//! │  64      │  16    │  context                    │
//! │  80      │  4     │  request                    │
//! │  84      │  4     │  cluster                    │
//! │  88      │  4     │  view                       │
//! │  92      │  4     │  size                       │
//! │  96      │  2     │  reserved (zero)            │
//! │  98      │  2     │  command                    │
//! │  100     │  1     │  replica                    │
//! │  101     │  1     │  operation                  │
//! │  102     │  26    │  padding (zero)             │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! `checksum` covers header bytes 16..128 (everything after itself);
//! `checksum_body` covers the message body. Reserved and padding bytes must
//! be zero and are verified on decode.

use cinnabar_types::{
    Checksum, ClientId, ClusterId, Operation, ReplicaId, RequestNumber, ViewNumber,
};
use serde::{Deserialize, Serialize};

use crate::{checksum, Command, WireError};

/// Size of the wire header in bytes.
pub const HEADER_SIZE: usize = 128;

// Field offsets - typed constants prevent mismatch bugs when the layout
// changes.
const CHECKSUM_OFFSET: usize = 0;
const CHECKSUM_BODY_OFFSET: usize = 16;
const PARENT_OFFSET: usize = 32;
const CLIENT_OFFSET: usize = 48;
const CONTEXT_OFFSET: usize = 64;
const REQUEST_OFFSET: usize = 80;
const CLUSTER_OFFSET: usize = 84;
const VIEW_OFFSET: usize = 88;
const SIZE_OFFSET: usize = 92;
const RESERVED_OFFSET: usize = 96;
const COMMAND_OFFSET: usize = 98;
const REPLICA_OFFSET: usize = 100;
const OPERATION_OFFSET: usize = 101;
const PADDING_OFFSET: usize = 102;

/// A decoded message header.
///
/// The reserved and padding regions are not represented; they are zero on
/// the wire and verified by [`Header::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Checksum of header bytes 16..128.
    pub checksum: Checksum,

    /// Checksum of the message body.
    pub checksum_body: Checksum,

    /// Hash-chain link.
    ///
    /// For a request: the checksum of the most recent reply (zero before any
    /// reply). For a reply: the checksum of the request it answers.
    pub parent: Checksum,

    /// The client session this message belongs to.
    pub client: ClientId,

    /// Per-command context.
    ///
    /// For a request: the session number (zero during registration). For a
    /// reply: the commit number assigned by the cluster; on a register reply
    /// this is the new session number and must be non-zero.
    pub context: u128,

    /// The request number this message carries or answers.
    pub request: RequestNumber,

    /// The cluster this message belongs to.
    pub cluster: ClusterId,

    /// The sender's view at the time of sending.
    pub view: ViewNumber,

    /// Total message size: header plus body.
    pub size: u32,

    /// The protocol command.
    pub command: Command,

    /// The replica that sent this message (zero for client-originated).
    pub replica: ReplicaId,

    /// The operation, meaningful for `request` and `reply`.
    pub operation: Operation,
}

impl Header {
    /// Creates a header for the given command with all other fields zeroed
    /// and `size` set to a bare header.
    pub fn new(command: Command) -> Self {
        Self {
            checksum: Checksum::ZERO,
            checksum_body: Checksum::ZERO,
            parent: Checksum::ZERO,
            client: ClientId::ZERO,
            context: 0,
            request: RequestNumber::ZERO,
            cluster: ClusterId::default(),
            view: ViewNumber::ZERO,
            size: HEADER_SIZE as u32,
            command,
            replica: ReplicaId::default(),
            operation: Operation::RESERVED,
        }
    }

    /// Returns the body size implied by the `size` field.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `size` is smaller than the header; encoded
    /// headers always satisfy this after [`Header::decode`].
    pub fn body_size(&self) -> usize {
        debug_assert!(self.size as usize >= HEADER_SIZE, "size {} < header", self.size);
        self.size as usize - HEADER_SIZE
    }

    /// Serializes the header to its 128-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[CHECKSUM_BODY_OFFSET..CHECKSUM_BODY_OFFSET + 16]
            .copy_from_slice(&self.checksum_body.to_le_bytes());
        buf[PARENT_OFFSET..PARENT_OFFSET + 16].copy_from_slice(&self.parent.to_le_bytes());
        buf[CLIENT_OFFSET..CLIENT_OFFSET + 16]
            .copy_from_slice(&self.client.as_u128().to_le_bytes());
        buf[CONTEXT_OFFSET..CONTEXT_OFFSET + 16].copy_from_slice(&self.context.to_le_bytes());
        buf[REQUEST_OFFSET..REQUEST_OFFSET + 4]
            .copy_from_slice(&self.request.as_u32().to_le_bytes());
        buf[CLUSTER_OFFSET..CLUSTER_OFFSET + 4]
            .copy_from_slice(&self.cluster.as_u32().to_le_bytes());
        buf[VIEW_OFFSET..VIEW_OFFSET + 4].copy_from_slice(&self.view.as_u32().to_le_bytes());
        buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        // reserved bytes 96..98 stay zero
        buf[COMMAND_OFFSET..COMMAND_OFFSET + 2]
            .copy_from_slice(&self.command.as_u16().to_le_bytes());
        buf[REPLICA_OFFSET] = self.replica.as_u8();
        buf[OPERATION_OFFSET] = self.operation.as_u8();
        // padding bytes 102..128 stay zero

        buf
    }

    /// Deserializes a header from its wire form.
    ///
    /// # Errors
    ///
    /// - [`WireError::UnexpectedEof`] if fewer than 128 bytes are available
    /// - [`WireError::InvalidCommand`] if the command word is unknown
    /// - [`WireError::InvalidSize`] if the size field is below 128
    /// - [`WireError::NonZeroReserved`] if reserved or padding bytes are set
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::UnexpectedEof {
                need: HEADER_SIZE,
                have: data.len(),
            });
        }

        let command_word = u16::from_le_bytes(
            data[COMMAND_OFFSET..COMMAND_OFFSET + 2]
                .try_into()
                .expect("slice is exactly 2 bytes after bounds check"),
        );
        let command =
            Command::from_u16(command_word).ok_or(WireError::InvalidCommand { word: command_word })?;

        let size = u32::from_le_bytes(
            data[SIZE_OFFSET..SIZE_OFFSET + 4]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        );
        if (size as usize) < HEADER_SIZE {
            return Err(WireError::InvalidSize {
                size,
                minimum: HEADER_SIZE as u32,
            });
        }

        if data[RESERVED_OFFSET..RESERVED_OFFSET + 2] != [0, 0] {
            return Err(WireError::NonZeroReserved {
                offset: RESERVED_OFFSET,
            });
        }
        if let Some(set) = data[PADDING_OFFSET..HEADER_SIZE].iter().position(|&b| b != 0) {
            return Err(WireError::NonZeroReserved {
                offset: PADDING_OFFSET + set,
            });
        }

        Ok(Self {
            checksum: Checksum::from_le_bytes(read_16(data, CHECKSUM_OFFSET)),
            checksum_body: Checksum::from_le_bytes(read_16(data, CHECKSUM_BODY_OFFSET)),
            parent: Checksum::from_le_bytes(read_16(data, PARENT_OFFSET)),
            client: ClientId::new(u128::from_le_bytes(read_16(data, CLIENT_OFFSET))),
            context: u128::from_le_bytes(read_16(data, CONTEXT_OFFSET)),
            request: RequestNumber::new(u32::from_le_bytes(read_4(data, REQUEST_OFFSET))),
            cluster: ClusterId::new(u32::from_le_bytes(read_4(data, CLUSTER_OFFSET))),
            view: ViewNumber::new(u32::from_le_bytes(read_4(data, VIEW_OFFSET))),
            size,
            command,
            replica: ReplicaId::new(data[REPLICA_OFFSET]),
            operation: Operation::new(data[OPERATION_OFFSET]),
        })
    }

    /// Computes the header checksum: the digest of bytes 16..128.
    pub fn compute_checksum(&self) -> Checksum {
        let encoded = self.encode();
        checksum(&encoded[CHECKSUM_BODY_OFFSET..])
    }

    /// Sets `checksum_body` from the message body.
    ///
    /// Must be called before [`Header::set_checksum`]: the body checksum is
    /// itself covered by the header checksum.
    pub fn set_checksum_body(&mut self, body: &[u8]) {
        debug_assert_eq!(body.len(), self.body_size(), "body length disagrees with size field");
        self.checksum_body = checksum(body);
    }

    /// Seals the header by computing and storing its checksum.
    pub fn set_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Verifies the stored header checksum.
    pub fn valid_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Verifies the stored body checksum against a body.
    pub fn valid_checksum_body(&self, body: &[u8]) -> bool {
        body.len() == self.body_size() && self.checksum_body == checksum(body)
    }
}

fn read_16(data: &[u8], offset: usize) -> [u8; 16] {
    data[offset..offset + 16]
        .try_into()
        .expect("slice is exactly 16 bytes after bounds check")
}

fn read_4(data: &[u8], offset: usize) -> [u8; 4] {
    data[offset..offset + 4]
        .try_into()
        .expect("slice is exactly 4 bytes after bounds check")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let mut header = Header::new(Command::Request);
        header.parent = Checksum::new(7);
        header.client = ClientId::new(42);
        header.context = 100;
        header.request = RequestNumber::new(2);
        header.cluster = ClusterId::new(7);
        header.view = ViewNumber::new(3);
        header.operation = Operation::new(10);
        header.size = (HEADER_SIZE + 1) as u32;
        header
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut header = sample_header();
        header.set_checksum_body(&[0xAA]);
        header.set_checksum();

        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.valid_checksum());
        assert!(decoded.valid_checksum_body(&[0xAA]));
    }

    #[test]
    fn checksum_covers_every_byte_after_itself() {
        let mut header = sample_header();
        header.set_checksum_body(&[0xAA]);
        header.set_checksum();
        let encoded = header.encode();

        // Flipping any covered byte must invalidate the header checksum.
        // Reserved/padding flips are caught earlier, at decode.
        for position in 16..HEADER_SIZE {
            let mut corrupt = encoded;
            corrupt[position] ^= 0x01;
            match Header::decode(&corrupt) {
                Ok(decoded) => assert!(
                    !decoded.valid_checksum(),
                    "flip at byte {position} went undetected"
                ),
                Err(
                    WireError::NonZeroReserved { .. }
                    | WireError::InvalidCommand { .. }
                    | WireError::InvalidSize { .. },
                ) => {}
                Err(other) => panic!("unexpected decode error: {other}"),
            }
        }
    }

    #[test]
    fn body_checksum_detects_corruption() {
        let mut header = sample_header();
        header.set_checksum_body(&[0xAA]);
        assert!(header.valid_checksum_body(&[0xAA]));
        assert!(!header.valid_checksum_body(&[0xAB]));
    }

    #[test]
    fn body_checksum_rejects_wrong_length() {
        let mut header = sample_header();
        header.size = (HEADER_SIZE + 2) as u32;
        header.set_checksum_body(&[0xAA, 0xBB]);
        assert!(!header.valid_checksum_body(&[0xAA]));
    }

    #[test]
    fn truncated_input_rejected() {
        let header = sample_header();
        let encoded = header.encode();
        assert!(matches!(
            Header::decode(&encoded[..HEADER_SIZE - 1]),
            Err(WireError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_command_rejected() {
        let header = sample_header();
        let mut encoded = header.encode();
        encoded[98] = 0xFF;
        assert!(matches!(
            Header::decode(&encoded),
            Err(WireError::InvalidCommand { word: 0xFF })
        ));
    }

    #[test]
    fn undersized_size_field_rejected() {
        let mut header = sample_header();
        header.size = (HEADER_SIZE - 1) as u32;
        assert!(matches!(
            Header::decode(&header.encode()),
            Err(WireError::InvalidSize { .. })
        ));
    }

    #[test]
    fn nonzero_padding_rejected() {
        let header = sample_header();
        let mut encoded = header.encode();
        encoded[120] = 1;
        assert!(matches!(
            Header::decode(&encoded),
            Err(WireError::NonZeroReserved { offset: 120 })
        ));
    }

    #[test]
    fn header_is_exactly_128_bytes() {
        assert_eq!(Header::new(Command::Reserved).encode().len(), 128);
    }

    use proptest::prelude::*;

    proptest! {
        /// Serialize, checksum, deserialize, re-verify: equal.
        #[test]
        fn prop_header_roundtrip(
            parent in any::<u128>(),
            client in any::<u128>(),
            context in any::<u128>(),
            request in any::<u32>(),
            cluster in any::<u32>(),
            view in any::<u32>(),
            replica in any::<u8>(),
            operation in any::<u8>(),
            body in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut header = Header::new(Command::Reply);
            header.parent = Checksum::new(parent);
            header.client = ClientId::new(client);
            header.context = context;
            header.request = RequestNumber::new(request);
            header.cluster = ClusterId::new(cluster);
            header.view = ViewNumber::new(view);
            header.replica = ReplicaId::new(replica);
            header.operation = Operation::new(operation);
            header.size = (HEADER_SIZE + body.len()) as u32;
            header.set_checksum_body(&body);
            header.set_checksum();

            let decoded = Header::decode(&header.encode()).unwrap();
            prop_assert_eq!(decoded, header);
            prop_assert!(decoded.valid_checksum());
            prop_assert!(decoded.valid_checksum_body(&body));
        }
    }
}
