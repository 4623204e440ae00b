//! Operands and operand stacks
//!
//! An [`Operand`] is a reference-counted handle to bytes owned by a pool.
//! The count is the `Arc` strong count, so clones handed to other threads
//! are counted atomically; the buffer goes back to its pool through
//! [`Reclaim`] when the last handle drops.
//!
//! An [`OperandStack`] is a persistent cons list of operands. `push` returns
//! a new stack that shares its tail with the original, so fanning one
//! message out to N mailboxes clones N stack heads, never the bytes.

use crate::error::{Error, Result};
use crate::Token;
use std::fmt;
use std::sync::Arc;

/// Destination for buffers whose last operand was dropped
pub trait Reclaim: Send + Sync {
    /// Take back `buffer`; `length` is the number of bytes that were in use
    fn reclaim(&self, buffer: Box<[u8]>, length: usize);
}

struct Allocation {
    buffer: Box<[u8]>,
    len: usize,
    pool: Token,
    home: Arc<dyn Reclaim>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.home.reclaim(buffer, self.len);
    }
}

/// Reference-counted handle to pool-owned bytes
#[derive(Clone)]
pub struct Operand(Arc<Allocation>);

impl Operand {
    /// Wrap a checked-out buffer
    ///
    /// Only the first `len` bytes of `buffer` are visible. When the last
    /// clone drops, `buffer` is handed back to `home`.
    pub fn new(buffer: Box<[u8]>, len: usize, pool: Token, home: Arc<dyn Reclaim>) -> Self {
        debug_assert!(len <= buffer.len(), "operand longer than its buffer");
        Self(Arc::new(Allocation {
            buffer,
            len,
            pool,
            home,
        }))
    }

    /// The visible bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0.buffer[..self.0.len]
    }

    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// Name of the pool that owns the bytes
    pub fn pool(&self) -> &Token {
        &self.0.pool
    }

    /// Read the operand as a little-endian `i64`
    pub fn as_i64(&self) -> Result<i64> {
        let bytes: [u8; 8] = self
            .bytes()
            .try_into()
            .map_err(|_| Error::NotScalar { len: self.len() })?;
        Ok(i64::from_le_bytes(bytes))
    }

    /// Current number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Check if two handles refer to the same allocation
    pub fn ptr_eq(&self, other: &Operand) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operand")
            .field("pool", &self.0.pool)
            .field("len", &self.0.len)
            .field("refs", &self.ref_count())
            .finish()
    }
}

struct Node {
    operand: Operand,
    next: OperandStack,
}

/// Immutable persistent stack of operands; one message's payload
#[derive(Clone, Default)]
pub struct OperandStack {
    head: Option<Arc<Node>>,
    len: usize,
}

impl OperandStack {
    /// The empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack with a single operand
    pub fn of(operand: Operand) -> Self {
        Self::new().push(operand)
    }

    /// New stack with `operand` on top; `self` is unchanged and shared as the tail
    pub fn push(&self, operand: Operand) -> OperandStack {
        OperandStack {
            head: Some(Arc::new(Node {
                operand,
                next: self.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Top operand
    pub fn peek(&self) -> Option<&Operand> {
        self.head.as_ref().map(|node| &node.operand)
    }

    /// Top operand and the remaining stack
    pub fn pop(&self) -> Option<(Operand, OperandStack)> {
        self.head
            .as_ref()
            .map(|node| (node.operand.clone(), node.next.clone()))
    }

    /// Stack without its top operand (empty stays empty)
    pub fn tail(&self) -> OperandStack {
        self.head
            .as_ref()
            .map(|node| node.next.clone())
            .unwrap_or_default()
    }

    /// Top operand read as `i64`
    pub fn peek_i64(&self) -> Result<i64> {
        self.peek().ok_or(Error::EmptyStack)?.as_i64()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Operands from top to bottom
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.as_deref(),
        }
    }

    /// Check if both stacks are the same value (same head node)
    pub fn ptr_eq(&self, other: &OperandStack) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Drop for OperandStack {
    // Unlink uniquely owned nodes one at a time so long stacks cannot
    // overflow the thread stack through recursive drops.
    fn drop(&mut self) {
        let mut head = self.head.take();
        while let Some(node) = head {
            match Arc::try_unwrap(node) {
                Ok(mut node) => head = node.next.head.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for OperandStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a stack, top first
pub struct Iter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Operand;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|node| {
            self.next = node.next.head.as_deref();
            &node.operand
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        returned: Mutex<Vec<usize>>,
    }

    impl Reclaim for Recorder {
        fn reclaim(&self, _buffer: Box<[u8]>, length: usize) {
            self.returned.lock().push(length);
        }
    }

    fn operand(home: &Arc<Recorder>, bytes: &[u8]) -> Operand {
        Operand::new(
            bytes.to_vec().into_boxed_slice(),
            bytes.len(),
            Token::new("test"),
            Arc::clone(home) as Arc<dyn Reclaim>,
        )
    }

    #[test]
    fn test_push_shares_tail() {
        let home = Arc::new(Recorder::default());
        let base = OperandStack::of(operand(&home, b"base"));
        let left = base.push(operand(&home, b"left"));
        let right = base.push(operand(&home, b"right"));

        assert_eq!(base.len(), 1);
        assert_eq!(left.len(), 2);
        assert!(left.tail().ptr_eq(&base));
        assert!(right.tail().ptr_eq(&base));
        assert_eq!(left.peek().unwrap().bytes(), b"left");
        assert_eq!(base.peek().unwrap().bytes(), b"base");
    }

    #[test]
    fn test_release_at_zero() {
        let home = Arc::new(Recorder::default());
        let stack = OperandStack::of(operand(&home, &7i64.to_le_bytes()));
        let copy = stack.clone();
        assert_eq!(stack.peek_i64().unwrap(), 7);

        drop(stack);
        assert!(home.returned.lock().is_empty());

        drop(copy);
        assert_eq!(*home.returned.lock(), vec![8]);
    }

    #[test]
    fn test_ref_count_tracks_owners() {
        let home = Arc::new(Recorder::default());
        let op = operand(&home, b"x");
        assert_eq!(op.ref_count(), 1);
        let stack = OperandStack::of(op.clone());
        assert_eq!(op.ref_count(), 2);
        let (top, rest) = stack.pop().unwrap();
        assert!(top.ptr_eq(&op));
        assert!(rest.is_empty());
        drop(top);
        drop(stack);
        assert_eq!(op.ref_count(), 1);
    }

    #[test]
    fn test_not_scalar() {
        let home = Arc::new(Recorder::default());
        let op = operand(&home, b"abc");
        assert_eq!(op.as_i64(), Err(Error::NotScalar { len: 3 }));
        assert_eq!(OperandStack::new().peek_i64(), Err(Error::EmptyStack));
    }

    #[test]
    fn test_long_stack_drops_iteratively() {
        let home = Arc::new(Recorder::default());
        let mut stack = OperandStack::new();
        for _ in 0..100_000 {
            stack = stack.push(operand(&home, b"z"));
        }
        assert_eq!(stack.iter().count(), 100_000);
        drop(stack);
        assert_eq!(home.returned.lock().len(), 100_000);
    }
}
