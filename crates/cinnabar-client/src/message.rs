//! Reference-counted message buffers and their pool.
//!
//! A [`Message`] owns a fixed-capacity body buffer plus a typed header. The
//! pool hands out [`MessageRef`]s (`Rc<RefCell<Message>>`): taking another
//! reference is `Rc::clone`, releasing one is dropping the handle. When the
//! last reference drops, the buffer returns to the pool's free list and, if
//! the message was acquired under a client budget, the budget is credited
//! synchronously, inside the drop. That credit path is how the
//! [`crate::SessionClient`] learns its send buffers are free again.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use bytes::BytesMut;
use cinnabar_wire::{Command, Header, HEADER_SIZE};

/// A shared handle to a pooled message.
pub type MessageRef = Rc<RefCell<Message>>;

struct PoolShared {
    free: RefCell<Vec<BytesMut>>,
    capacity: usize,
    body_size_max: usize,
}

/// Fixed-capacity pool of message buffers.
///
/// The pool never allocates past its capacity: [`MessagePool::acquire`]
/// fails once every buffer is out. Buffers are recycled, not freed.
pub struct MessagePool {
    shared: Rc<PoolShared>,
}

impl MessagePool {
    /// Creates a pool of `capacity` buffers with `body_size_max` bytes of
    /// body capacity each.
    pub fn new(capacity: usize, body_size_max: usize) -> Self {
        assert!(capacity > 0, "pool must have capacity");
        let free = (0..capacity)
            .map(|_| BytesMut::with_capacity(body_size_max))
            .collect();
        Self {
            shared: Rc::new(PoolShared {
                free: RefCell::new(free),
                capacity,
                body_size_max,
            }),
        }
    }

    /// Acquires a message, or `None` if the pool is exhausted.
    ///
    /// The caller owns one reference; clone the `Rc` to take more.
    pub fn acquire(&self) -> Option<MessageRef> {
        self.acquire_with_budget(None)
    }

    /// Acquires a message that credits `budget` when its last reference
    /// drops.
    pub(crate) fn acquire_with_budget(&self, budget: Option<Rc<Cell<u32>>>) -> Option<MessageRef> {
        let body = self.shared.free.borrow_mut().pop()?;
        debug_assert!(body.is_empty(), "recycled body must be cleared");
        Some(Rc::new(RefCell::new(Message {
            header: Header::new(Command::Reserved),
            body,
            pool: Rc::clone(&self.shared),
            budget,
        })))
    }

    /// Returns the number of free buffers.
    pub fn free_count(&self) -> usize {
        self.shared.free.borrow().len()
    }

    /// Returns the pool capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// A pooled message: a wire header plus a bounded body buffer.
pub struct Message {
    /// The message header. Checksums are filled by [`Message::set_checksums`]
    /// once the header and body are final.
    pub header: Header,

    body: BytesMut,
    pool: Rc<PoolShared>,
    budget: Option<Rc<Cell<u32>>>,
}

impl Message {
    /// Returns the body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body buffer for writing.
    ///
    /// The caller must not grow the body past the pool's `body_size_max`;
    /// [`Message::set_checksums`] asserts the bound.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Replaces the body and updates the header size to match.
    pub fn set_body(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.pool.body_size_max,
            "body of {} bytes exceeds maximum {}",
            bytes.len(),
            self.pool.body_size_max
        );
        self.body.clear();
        self.body.extend_from_slice(bytes);
        self.header.size = (HEADER_SIZE + bytes.len()) as u32;
    }

    /// Computes and stores both checksums. Call after the header fields and
    /// body are final; the body checksum is covered by the header checksum.
    pub fn set_checksums(&mut self) {
        assert!(
            self.body.len() <= self.pool.body_size_max,
            "body of {} bytes exceeds maximum {}",
            self.body.len(),
            self.pool.body_size_max
        );
        self.header.set_checksum_body(&self.body);
        self.header.set_checksum();
    }

    /// Verifies both checksums of a received message.
    pub fn valid_checksums(&self) -> bool {
        self.header.valid_checksum() && self.header.valid_checksum_body(&self.body)
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        let mut body = mem::take(&mut self.body);
        body.clear();
        self.pool.free.borrow_mut().push(body);
        if let Some(budget) = &self.budget {
            budget.set(budget.get() + 1);
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded() {
        let pool = MessagePool::new(2, 64);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.free_count(), 0);

        drop(a);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn buffer_returns_only_after_last_reference_drops() {
        let pool = MessagePool::new(1, 64);
        let message = pool.acquire().unwrap();
        let clone = Rc::clone(&message);

        drop(message);
        assert_eq!(pool.free_count(), 0);

        drop(clone);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn budget_credited_synchronously_on_free() {
        let pool = MessagePool::new(2, 64);
        let budget = Rc::new(Cell::new(1u32));

        let message = pool
            .acquire_with_budget(Some(Rc::clone(&budget)))
            .unwrap();
        budget.set(0);

        drop(message);
        assert_eq!(budget.get(), 1);
    }

    #[test]
    fn unbudgeted_message_credits_nothing() {
        let pool = MessagePool::new(1, 64);
        let budget = Rc::new(Cell::new(0u32));
        let message = pool.acquire().unwrap();
        drop(message);
        assert_eq!(budget.get(), 0);
    }

    #[test]
    fn recycled_body_is_empty() {
        let pool = MessagePool::new(1, 64);
        let message = pool.acquire().unwrap();
        message.borrow_mut().set_body(b"transfer");
        drop(message);

        let recycled = pool.acquire().unwrap();
        assert!(recycled.borrow().body().is_empty());
    }

    #[test]
    fn set_body_updates_header_size() {
        let pool = MessagePool::new(1, 64);
        let message = pool.acquire().unwrap();
        let mut m = message.borrow_mut();
        m.set_body(&[1, 2, 3]);
        assert_eq!(m.header.size as usize, HEADER_SIZE + 3);
        assert_eq!(m.header.body_size(), 3);
    }

    #[test]
    fn checksums_roundtrip() {
        let pool = MessagePool::new(1, 64);
        let message = pool.acquire().unwrap();
        let mut m = message.borrow_mut();
        m.header = Header::new(Command::Request);
        m.set_body(b"post");
        m.set_checksums();
        assert!(m.valid_checksums());

        m.body_mut()[0] ^= 1;
        assert!(!m.valid_checksums());
    }
}
