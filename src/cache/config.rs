/// Construction parameters for a [`ResourceCache`](super::ResourceCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on cached directory tables plus resources. Values below
    /// one are treated as one.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}
