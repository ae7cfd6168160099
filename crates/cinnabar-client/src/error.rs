//! Client error types.

use cinnabar_types::{ClientId, Operation, ViewNumber};

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the session client.
///
/// Protocol violations (bad checksums, stale replies, wrong cluster) are
/// never surfaced; they are logged and dropped. Everything here is either a
/// caller bug or fatal.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The per-client message budget or the request queue is exhausted.
    ///
    /// The caller must respect budgets; this is a programming error, not a
    /// transient condition to retry.
    #[error("message budget exceeded")]
    BudgetExceeded,

    /// The operation is reserved for protocol messages.
    #[error("operation {operation} is reserved for protocol use")]
    ReservedOperation { operation: Operation },

    /// The cluster evicted this session.
    ///
    /// Fatal: the linearizability guarantee is void. The host must promote
    /// this to process termination; there is no recovery semantics.
    #[error("session evicted (too many concurrent client sessions): {client} at {view}")]
    SessionEvicted { client: ClientId, view: ViewNumber },
}
