use shopguard_common::UpstreamConfig;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Weighted round-robin over the configured upstream servers.
pub struct UpstreamSelector {
    servers: Vec<String>,
    counter: AtomicUsize,
    /// Server indices repeated by weight: weights [3, 1] give [0, 0, 0, 1].
    weighted_indices: Vec<usize>,
}

impl UpstreamSelector {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let servers: Vec<String> = config.servers.iter().map(|s| s.addr.clone()).collect();

        let mut weighted_indices: Vec<usize> = config
            .servers
            .iter()
            .enumerate()
            .flat_map(|(i, s)| std::iter::repeat(i).take(s.weight as usize))
            .collect();
        if weighted_indices.is_empty() {
            // Every weight is zero: fall back to equal weights.
            weighted_indices = (0..servers.len()).collect();
        }

        Self {
            servers,
            counter: AtomicUsize::new(0),
            weighted_indices,
        }
    }

    /// Next upstream address, or `None` when no servers are configured.
    pub fn select(&self) -> Option<&str> {
        if self.weighted_indices.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.weighted_indices.len();
        Some(&self.servers[self.weighted_indices[idx]])
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}
