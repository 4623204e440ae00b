//! Allocator pools backing operands
//!
//! Three strategies share the [`Pool`] trait:
//! - [`DynamicPool`]: a byte budget that grows and shrinks with live operands
//! - [`FixedPool`]: a fixed count of fixed-size buffers, reused on release
//! - [`CompositePool`]: tries member pools in declaration order
//!
//! Every successful allocation is balanced by exactly one release, which
//! happens when the last handle to the operand drops. A refused allocation
//! leaves the pool untouched.
//!
//! # Example
//!
//! ```
//! use turbine_core::{DynamicPool, DynamicPoolConfig, OperandStack, Pool};
//!
//! let pool = DynamicPool::new("scratch", DynamicPoolConfig::new(1, 64, 128));
//! let stack = pool.alloc_i64(&OperandStack::new(), 5).unwrap();
//! assert_eq!(stack.peek_i64().unwrap(), 5);
//! assert_eq!(pool.stats().outstanding_bytes, 8);
//!
//! drop(stack);
//! assert_eq!(pool.stats().outstanding_bytes, 0);
//! ```

use crate::error::{Error, Result};
use crate::operand::{Operand, OperandStack, Reclaim};
use crate::Token;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Snapshot of a pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Bytes currently held by live operands
    pub outstanding_bytes: usize,
    /// Live allocations
    pub outstanding_allocations: usize,
    /// Maximum outstanding bytes
    pub capacity: usize,
}

/// A memory provider for operands
pub trait Pool: Send + Sync {
    /// Name of this pool
    fn name(&self) -> &Token;

    /// Smallest length accepted by `alloc`
    fn minimum_allocation_size(&self) -> usize;

    /// Largest length accepted by `alloc`
    fn maximum_allocation_size(&self) -> usize;

    /// Copy `buffer[offset..offset + length]` into a new operand pushed on `stack`
    ///
    /// Returns `Ok(None)` when the pool cannot satisfy the request right now,
    /// and `Err(InvalidLength)` when the request is malformed.
    fn try_alloc(
        &self,
        stack: &OperandStack,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<OperandStack>>;

    /// Current bookkeeping
    fn stats(&self) -> PoolStats;

    /// Like [`Pool::try_alloc`], but exhaustion is an error
    fn alloc(
        &self,
        stack: &OperandStack,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<OperandStack> {
        self.try_alloc(stack, buffer, offset, length)?
            .ok_or_else(|| Error::Exhausted {
                pool: self.name().clone(),
                requested: length,
            })
    }

    /// Push a 64-bit scalar (little-endian) onto `stack`
    fn alloc_i64(&self, stack: &OperandStack, value: i64) -> Result<OperandStack> {
        let bytes = value.to_le_bytes();
        self.alloc(stack, &bytes, 0, bytes.len())
    }

    /// Push a whole byte slice onto `stack`
    fn alloc_bytes(&self, stack: &OperandStack, bytes: &[u8]) -> Result<OperandStack> {
        self.alloc(stack, bytes, 0, bytes.len())
    }
}

/// Check an allocation request against a pool's window and the source buffer
pub fn validate_request<P: Pool + ?Sized>(
    pool: &P,
    buffer_len: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    let min = pool.minimum_allocation_size();
    let max = pool.maximum_allocation_size();
    let in_bounds = offset
        .checked_add(length)
        .is_some_and(|end| end <= buffer_len);
    if !in_bounds || length < min || length > max {
        return Err(Error::InvalidLength {
            pool: pool.name().clone(),
            offset,
            length,
            buffer_len,
            min,
            max,
        });
    }
    Ok(())
}

fn accepts<P: Pool + ?Sized>(pool: &P, length: usize) -> bool {
    length >= pool.minimum_allocation_size() && length <= pool.maximum_allocation_size()
}

// ============================================================================
// Dynamic pool
// ============================================================================

/// Configuration for a [`DynamicPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPoolConfig {
    /// Smallest allocation accepted
    pub min_allocation: usize,
    /// Largest allocation accepted
    pub max_allocation: usize,
    /// Maximum outstanding bytes
    pub capacity: usize,
}

impl DynamicPoolConfig {
    pub fn new(min_allocation: usize, max_allocation: usize, capacity: usize) -> Self {
        Self {
            min_allocation,
            max_allocation,
            capacity,
        }
    }
}

impl Default for DynamicPoolConfig {
    fn default() -> Self {
        Self {
            min_allocation: 1,
            max_allocation: 4096,
            capacity: 1 << 20,
        }
    }
}

#[derive(Debug)]
struct DynamicLedger {
    outstanding_bytes: AtomicUsize,
    outstanding_allocations: AtomicUsize,
}

impl Reclaim for DynamicLedger {
    fn reclaim(&self, _buffer: Box<[u8]>, length: usize) {
        self.outstanding_bytes.fetch_sub(length, Ordering::AcqRel);
        self.outstanding_allocations.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pool with a byte budget; buffers are allocated per request and freed on release
#[derive(Debug)]
pub struct DynamicPool {
    name: Token,
    config: DynamicPoolConfig,
    ledger: Arc<DynamicLedger>,
}

impl DynamicPool {
    pub fn new(name: impl Into<Token>, config: DynamicPoolConfig) -> Self {
        Self {
            name: name.into(),
            config,
            ledger: Arc::new(DynamicLedger {
                outstanding_bytes: AtomicUsize::new(0),
                outstanding_allocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DynamicPoolConfig {
        &self.config
    }

    // Reserve `length` bytes of budget; refuses without touching the ledger.
    fn reserve(&self, length: usize) -> bool {
        let capacity = self.config.capacity;
        self.ledger
            .outstanding_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(length).filter(|next| *next <= capacity)
            })
            .is_ok()
    }
}

impl Pool for DynamicPool {
    fn name(&self) -> &Token {
        &self.name
    }

    fn minimum_allocation_size(&self) -> usize {
        self.config.min_allocation
    }

    fn maximum_allocation_size(&self) -> usize {
        self.config.max_allocation
    }

    fn try_alloc(
        &self,
        stack: &OperandStack,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<OperandStack>> {
        validate_request(self, buffer.len(), offset, length)?;
        if !self.reserve(length) {
            debug!(site = "pool", pool = %self.name, requested = length, "dynamic pool exhausted");
            return Ok(None);
        }
        self.ledger
            .outstanding_allocations
            .fetch_add(1, Ordering::AcqRel);

        let bytes: Box<[u8]> = buffer[offset..offset + length].into();
        let home: Arc<dyn Reclaim> = self.ledger.clone();
        let operand = Operand::new(bytes, length, self.name.clone(), home);
        Ok(Some(stack.push(operand)))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding_bytes: self.ledger.outstanding_bytes.load(Ordering::Acquire),
            outstanding_allocations: self.ledger.outstanding_allocations.load(Ordering::Acquire),
            capacity: self.config.capacity,
        }
    }
}

// ============================================================================
// Fixed pool
// ============================================================================

/// Configuration for a [`FixedPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPoolConfig {
    /// Size of each buffer, also the largest allocation accepted
    pub buffer_size: usize,
    /// Number of buffers
    pub buffer_count: usize,
    /// Smallest allocation accepted
    pub min_allocation: usize,
}

impl FixedPoolConfig {
    pub fn new(buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            buffer_size,
            buffer_count,
            min_allocation: 1,
        }
    }

    pub fn with_min_allocation(mut self, min_allocation: usize) -> Self {
        self.min_allocation = min_allocation;
        self
    }
}

#[derive(Debug)]
struct FixedLedger {
    free: Mutex<Vec<Box<[u8]>>>,
    outstanding_bytes: AtomicUsize,
}

impl Reclaim for FixedLedger {
    fn reclaim(&self, buffer: Box<[u8]>, length: usize) {
        self.outstanding_bytes.fetch_sub(length, Ordering::AcqRel);
        self.free.lock().push(buffer);
    }
}

/// Pool of `buffer_count` preallocated buffers of `buffer_size` bytes
#[derive(Debug)]
pub struct FixedPool {
    name: Token,
    config: FixedPoolConfig,
    ledger: Arc<FixedLedger>,
}

impl FixedPool {
    pub fn new(name: impl Into<Token>, config: FixedPoolConfig) -> Self {
        let free = (0..config.buffer_count)
            .map(|_| vec![0u8; config.buffer_size].into_boxed_slice())
            .collect();
        Self {
            name: name.into(),
            config,
            ledger: Arc::new(FixedLedger {
                free: Mutex::new(free),
                outstanding_bytes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &FixedPoolConfig {
        &self.config
    }

    /// Buffers not checked out
    pub fn available(&self) -> usize {
        self.ledger.free.lock().len()
    }
}

impl Pool for FixedPool {
    fn name(&self) -> &Token {
        &self.name
    }

    fn minimum_allocation_size(&self) -> usize {
        self.config.min_allocation
    }

    fn maximum_allocation_size(&self) -> usize {
        self.config.buffer_size
    }

    fn try_alloc(
        &self,
        stack: &OperandStack,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<OperandStack>> {
        validate_request(self, buffer.len(), offset, length)?;
        let Some(mut bytes) = self.ledger.free.lock().pop() else {
            debug!(site = "pool", pool = %self.name, requested = length, "fixed pool exhausted");
            return Ok(None);
        };
        bytes[..length].copy_from_slice(&buffer[offset..offset + length]);
        self.ledger
            .outstanding_bytes
            .fetch_add(length, Ordering::AcqRel);

        let home: Arc<dyn Reclaim> = self.ledger.clone();
        let operand = Operand::new(bytes, length, self.name.clone(), home);
        Ok(Some(stack.push(operand)))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding_bytes: self.ledger.outstanding_bytes.load(Ordering::Acquire),
            outstanding_allocations: self.config.buffer_count - self.available(),
            capacity: self.config.buffer_size * self.config.buffer_count,
        }
    }
}

// ============================================================================
// Composite pool
// ============================================================================

/// Delegates to member pools in order; the first success wins
pub struct CompositePool {
    name: Token,
    members: Vec<Arc<dyn Pool>>,
}

impl CompositePool {
    pub fn new(name: impl Into<Token>, members: Vec<Arc<dyn Pool>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn members(&self) -> &[Arc<dyn Pool>] {
        &self.members
    }
}

impl std::fmt::Debug for CompositePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositePool")
            .field("name", &self.name)
            .field(
                "members",
                &self.members.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pool for CompositePool {
    fn name(&self) -> &Token {
        &self.name
    }

    fn minimum_allocation_size(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.minimum_allocation_size())
            .min()
            .unwrap_or(0)
    }

    fn maximum_allocation_size(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.maximum_allocation_size())
            .max()
            .unwrap_or(0)
    }

    fn try_alloc(
        &self,
        stack: &OperandStack,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<OperandStack>> {
        validate_request(self, buffer.len(), offset, length)?;
        for member in self.members.iter().filter(|m| accepts(m.as_ref(), length)) {
            if let Some(pushed) = member.try_alloc(stack, buffer, offset, length)? {
                return Ok(Some(pushed));
            }
        }
        debug!(site = "pool", pool = %self.name, requested = length, "all composite members exhausted");
        Ok(None)
    }

    fn stats(&self) -> PoolStats {
        self.members
            .iter()
            .map(|m| m.stats())
            .fold(PoolStats::default(), |acc, s| PoolStats {
                outstanding_bytes: acc.outstanding_bytes + s.outstanding_bytes,
                outstanding_allocations: acc.outstanding_allocations + s.outstanding_allocations,
                capacity: acc.capacity + s.capacity,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> OperandStack {
        OperandStack::new()
    }

    #[test]
    fn test_dynamic_conservation() {
        let pool = DynamicPool::new("dyn", DynamicPoolConfig::new(1, 16, 32));
        let a = pool.alloc(&empty(), &[1; 16], 0, 16).unwrap();
        let b = pool.alloc(&empty(), &[2; 16], 0, 16).unwrap();
        assert_eq!(pool.stats().outstanding_bytes, 32);

        // Next byte would exceed the budget
        let before = pool.stats();
        assert_eq!(pool.try_alloc(&empty(), &[3], 0, 1).unwrap().map(|s| s.len()), None);
        assert_eq!(pool.stats(), before);
        assert!(matches!(
            pool.alloc(&empty(), &[3], 0, 1),
            Err(Error::Exhausted { requested: 1, .. })
        ));

        drop(a);
        let c = pool.alloc(&empty(), &[4; 16], 0, 16).unwrap();
        assert_eq!(c.peek().unwrap().bytes(), &[4; 16]);
        drop(b);
        drop(c);
        assert_eq!(pool.stats().outstanding_bytes, 0);
        assert_eq!(pool.stats().outstanding_allocations, 0);
    }

    #[test]
    fn test_invalid_length() {
        let pool = DynamicPool::new("dyn", DynamicPoolConfig::new(2, 8, 64));
        assert!(matches!(
            pool.try_alloc(&empty(), &[0; 4], 0, 1),
            Err(Error::InvalidLength { length: 1, min: 2, .. })
        ));
        assert!(matches!(
            pool.try_alloc(&empty(), &[0; 16], 0, 9),
            Err(Error::InvalidLength { length: 9, max: 8, .. })
        ));
        assert!(matches!(
            pool.try_alloc(&empty(), &[0; 4], 2, 4),
            Err(Error::InvalidLength { offset: 2, .. })
        ));
        assert!(matches!(
            pool.try_alloc(&empty(), &[0; 4], usize::MAX, 2),
            Err(Error::InvalidLength { .. })
        ));
        assert_eq!(pool.stats().outstanding_bytes, 0);
    }

    #[test]
    fn test_offset_copy() {
        let pool = DynamicPool::new("dyn", DynamicPoolConfig::default());
        let stack = pool.alloc(&empty(), b"hello world", 6, 5).unwrap();
        assert_eq!(stack.peek().unwrap().bytes(), b"world");
        assert_eq!(stack.peek().unwrap().pool().as_str(), "dyn");
    }

    #[test]
    fn test_fixed_pool_reuses_buffers() {
        let pool = FixedPool::new("fixed", FixedPoolConfig::new(8, 2));
        let a = pool.alloc_i64(&empty(), 1).unwrap();
        let b = pool.alloc_i64(&empty(), 2).unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_alloc(&empty(), &[0; 8], 0, 8).unwrap().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.alloc_bytes(&empty(), b"abc").unwrap();
        assert_eq!(c.peek().unwrap().bytes(), b"abc");
        assert_eq!(pool.stats().outstanding_allocations, 2);
        assert_eq!(pool.stats().outstanding_bytes, 11);
        drop((b, c));
        assert_eq!(pool.stats(), PoolStats { outstanding_bytes: 0, outstanding_allocations: 0, capacity: 16 });
    }

    #[test]
    fn test_composite_first_success_wins() {
        let small: Arc<dyn Pool> = Arc::new(FixedPool::new("small", FixedPoolConfig::new(8, 1)));
        let large: Arc<dyn Pool> =
            Arc::new(DynamicPool::new("large", DynamicPoolConfig::new(1, 64, 64)));
        let pool = CompositePool::new("both", vec![small.clone(), large.clone()]);

        assert_eq!(pool.minimum_allocation_size(), 1);
        assert_eq!(pool.maximum_allocation_size(), 64);

        let first = pool.alloc_i64(&empty(), 1).unwrap();
        assert_eq!(first.peek().unwrap().pool().as_str(), "small");

        // small is now empty, falls through to large
        let second = pool.alloc_i64(&empty(), 2).unwrap();
        assert_eq!(second.peek().unwrap().pool().as_str(), "large");

        // too big for small, skipped without error
        let third = pool.alloc(&empty(), &[0; 32], 0, 32).unwrap();
        assert_eq!(third.peek().unwrap().pool().as_str(), "large");

        assert!(matches!(
            pool.alloc(&empty(), &[0; 32], 0, 32),
            Err(Error::Exhausted { .. })
        ));
        assert_eq!(pool.stats().outstanding_bytes, 8 + 8 + 32);
    }

    #[test]
    fn test_concurrent_release_is_balanced() {
        let pool = Arc::new(DynamicPool::new("dyn", DynamicPoolConfig::new(1, 8, 8 * 1024)));
        let stack = pool.alloc_i64(&empty(), 42).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let copy = stack.clone();
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    for i in 0..100 {
                        let local = pool.alloc_i64(&copy, i).unwrap();
                        assert_eq!(local.tail().peek_i64().unwrap(), 42);
                    }
                });
            }
        });
        drop(stack);
        assert_eq!(pool.stats().outstanding_bytes, 0);
    }
}
