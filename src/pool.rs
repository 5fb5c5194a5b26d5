//! The eviction surface every pool exposes, and the shared pool configuration.
use derive_builder::Builder;

/// The policy-independent surface of an asset pool.
pub trait Pool {
    /// Unload objects that are materialized but have no firm holders, oldest first, until at
    /// least `budget` bytes (by the objects' own `memory_cost`) have been freed or nothing
    /// evictable remains.  Returns the bytes actually freed.
    ///
    /// Cleaning never invalidates handles: counters with live lazy holders survive unloading and
    /// can be upgraded again later.
    fn clean(&self, budget: u64) -> u64;

    /// Unload everything evictable.
    fn clean_all(&self) -> u64 {
        self.clean(u64::MAX)
    }
}

/// Construction-time knobs shared by all pools.
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct PoolConfig {
    /// Counter slots to pre-allocate.
    pub capacity: usize,
    /// Diagnostic name, surfaced in `Debug` output.
    pub label: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            capacity: 0,
            label: None,
        }
    }
}

/// Per-list counter populations, for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub unloaded: usize,
    pub cached: usize,
    pub used: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.unloaded + self.cached + self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_fills_defaults() {
        let config = PoolConfigBuilder::default()
            .capacity(16usize)
            .build()
            .expect("should build");
        assert_eq!(config.capacity, 16);
        assert!(config.label.is_none());

        let labeled = PoolConfigBuilder::default()
            .label(Some("textures".to_string()))
            .build()
            .expect("should build");
        assert_eq!(labeled.capacity, 0);
        assert_eq!(labeled.label.as_deref(), Some("textures"));
    }
}
