//! Token and identity types
//!
//! A [`Token`] names everything the runtime routes or registers: events,
//! pools, pumps, reactors and their ports. Tokens compare and order by name.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable, totally ordered name
///
/// Cloning a token is a reference-count bump; the name itself is never copied.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(Arc<str>);

impl Token {
    /// Create a new token
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a child token, `parent.child`
    ///
    /// Used to name reactor ports (`doubler.in`, `doubler.out`).
    pub fn child(&self, name: &str) -> Token {
        Token::new(format!("{}.{}", self.0, name))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&Token> for Token {
    fn from(t: &Token) -> Self {
        t.clone()
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Token::from)
    }
}

/// Interning table: equal names resolve to one shared allocation
#[derive(Debug, Default)]
pub struct TokenTable {
    names: Mutex<HashSet<Arc<str>>>,
}

impl TokenTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the interned token for `name`, creating it on first use
    pub fn intern(&self, name: &str) -> Token {
        let mut names = self.names.lock();
        if let Some(existing) = names.get(name) {
            return Token(Arc::clone(existing));
        }
        let shared: Arc<str> = Arc::from(name);
        names.insert(Arc::clone(&shared));
        Token(shared)
    }

    /// Number of distinct names interned so far
    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    /// Check if nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generator of fresh, unique tokens
///
/// Owned by whoever builds a topology (normally the runtime) and passed to
/// whatever needs new identities. Two generators never share state.
#[derive(Debug)]
pub struct IdentityGenerator {
    next: AtomicU64,
}

impl IdentityGenerator {
    /// Create a generator starting at 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next raw identity value
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Fresh token of the form `prefix-N`
    pub fn fresh(&self, prefix: &str) -> Token {
        Token::new(format!("{}-{}", prefix, self.next_id()))
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_order_and_equality() {
        let a = Token::new("alpha");
        let b = Token::new("beta");
        assert!(a < b);
        assert_eq!(a, Token::from("alpha"));
        assert_eq!(format!("{}", a), "alpha");
        assert_eq!(a.child("in").as_str(), "alpha.in");
    }

    #[test]
    fn test_interning_shares_allocation() {
        let table = TokenTable::new();
        let first = table.intern("numbers");
        let second = table.intern("numbers");
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first.0, &second.0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_identity_generator_is_local() {
        let one = IdentityGenerator::new();
        let two = IdentityGenerator::new();
        assert_eq!(one.fresh("reactor").as_str(), "reactor-1");
        assert_eq!(one.fresh("reactor").as_str(), "reactor-2");
        assert_eq!(two.fresh("reactor").as_str(), "reactor-1");
    }

    #[test]
    fn test_token_ron_roundtrip() {
        let token = Token::new("pool.small");
        let text = ron::to_string(&token).unwrap();
        assert_eq!(text, "\"pool.small\"");
        let back: Token = ron::from_str(&text).unwrap();
        assert_eq!(back, token);
    }
}
