//! Pool definition schema

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use turbine_core::{
    CompositePool, DynamicPool, DynamicPoolConfig, FixedPool, FixedPoolConfig, Pool, Token,
};

/// Allocation strategy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Dynamic,
    Fixed,
    Composite,
}

/// Definition of a buffer pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDef {
    pub kind: PoolKind,
    /// Unique identifier for this pool
    pub name: Token,
    /// Smallest allocation accepted
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Largest allocation accepted; the buffer size of a fixed pool
    #[serde(default)]
    pub max_size: usize,
    /// Byte budget of a dynamic pool (defaults to 64 maximum-size buffers)
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Number of buffers in a fixed pool
    #[serde(default)]
    pub buffer_count: Option<usize>,
    /// Pools a composite draws from, in preference order
    #[serde(default)]
    pub members: Vec<Token>,
}

fn default_min_size() -> usize {
    1
}

impl PoolDef {
    pub fn dynamic(name: impl Into<Token>, min_size: usize, max_size: usize) -> Self {
        Self {
            kind: PoolKind::Dynamic,
            name: name.into(),
            min_size,
            max_size,
            capacity: None,
            buffer_count: None,
            members: Vec::new(),
        }
    }

    pub fn fixed(name: impl Into<Token>, buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            kind: PoolKind::Fixed,
            buffer_count: Some(buffer_count),
            ..Self::dynamic(name, 1, buffer_size)
        }
    }

    pub fn composite(name: impl Into<Token>, members: Vec<Token>) -> Self {
        Self {
            kind: PoolKind::Composite,
            members,
            ..Self::dynamic(name, 1, 0)
        }
    }

    /// Check the fields this kind requires
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(Error::InvalidSchema(format!("pool {}: {}", self.name, reason)));
        match self.kind {
            PoolKind::Composite => {
                if self.members.is_empty() {
                    return invalid("a composite pool needs at least one member");
                }
            }
            PoolKind::Dynamic | PoolKind::Fixed => {
                if self.max_size == 0 {
                    return invalid("max_size must be at least 1");
                }
                if self.min_size > self.max_size {
                    return invalid("min_size exceeds max_size");
                }
                if self.kind == PoolKind::Fixed && self.buffer_count.unwrap_or(0) == 0 {
                    return invalid("a fixed pool needs a buffer_count of at least 1");
                }
            }
        }
        Ok(())
    }

    /// Build the pool; composite members are resolved through `resolve`
    pub fn build(
        &self,
        mut resolve: impl FnMut(&Token) -> Option<Arc<dyn Pool>>,
    ) -> Result<Arc<dyn Pool>> {
        self.validate()?;
        let pool: Arc<dyn Pool> = match self.kind {
            PoolKind::Dynamic => {
                let capacity = self.capacity.unwrap_or(self.max_size.saturating_mul(64));
                Arc::new(DynamicPool::new(
                    self.name.clone(),
                    DynamicPoolConfig::new(self.min_size, self.max_size, capacity),
                ))
            }
            PoolKind::Fixed => {
                let config = FixedPoolConfig::new(self.max_size, self.buffer_count.unwrap_or(0))
                    .with_min_allocation(self.min_size);
                Arc::new(FixedPool::new(self.name.clone(), config))
            }
            PoolKind::Composite => {
                let members = self
                    .members
                    .iter()
                    .map(|member| {
                        resolve(member).ok_or_else(|| Error::UnknownMember {
                            pool: self.name.to_string(),
                            member: member.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(CompositePool::new(self.name.clone(), members))
            }
        };
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_def_ron() {
        let ron_str = r#"
        (
            kind: fixed,
            name: "small",
            max_size: 8,
            buffer_count: 16,
        )
        "#;

        let def: PoolDef = ron::from_str(ron_str).unwrap();
        assert_eq!(def.kind, PoolKind::Fixed);
        assert_eq!(def.min_size, 1);
        assert_eq!(def.buffer_count, Some(16));
        assert!(def.members.is_empty());

        let pool = def.build(|_| None).unwrap();
        assert_eq!(pool.maximum_allocation_size(), 8);
        assert_eq!(pool.stats().capacity, 128);
    }

    #[test]
    fn test_dynamic_capacity_default() {
        let pool = PoolDef::dynamic("d", 8, 8).build(|_| None).unwrap();
        assert_eq!(pool.stats().capacity, 512);
    }

    #[test]
    fn test_invalid_pools_rejected() {
        let mut def = PoolDef::dynamic("d", 16, 8);
        assert!(matches!(def.validate(), Err(Error::InvalidSchema(_))));
        def.min_size = 0;
        def.max_size = 0;
        assert!(matches!(def.validate(), Err(Error::InvalidSchema(_))));

        let mut fixed = PoolDef::fixed("f", 8, 4);
        fixed.buffer_count = None;
        assert!(matches!(fixed.validate(), Err(Error::InvalidSchema(_))));

        assert!(matches!(
            PoolDef::composite("c", Vec::new()).validate(),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_composite_resolves_members() {
        let small = PoolDef::fixed("small", 8, 2).build(|_| None).unwrap();
        let def = PoolDef::composite("all", vec![Token::new("small"), Token::new("big")]);

        let result = def.build(|name| (name.as_str() == "small").then(|| Arc::clone(&small)));
        assert!(matches!(result, Err(Error::UnknownMember { ref member, .. }) if member == "big"));

        let def = PoolDef::composite("all", vec![Token::new("small")]);
        let pool = def.build(|_| Some(Arc::clone(&small))).unwrap();
        assert_eq!(pool.name().as_str(), "all");
    }
}
