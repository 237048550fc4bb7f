//! Fixed-answer DNS resolver.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use skillrun_core::{BoxFuture, DnsResolver};

/// [`DnsResolver`] answering from a fixed table. Unknown domains resolve to
/// nothing.
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `domain` with `ips` (textual addresses).
    ///
    /// # Panics
    ///
    /// Panics if an address does not parse.
    pub fn with(mut self, domain: &str, ips: &[&str]) -> Self {
        let ips = ips
            .iter()
            .map(|ip| ip.parse().expect("invalid IP address in test fixture"))
            .collect();
        self.records.insert(domain.to_string(), ips);
        self
    }

    /// Number of lookups performed.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DnsResolver for StaticResolver {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Vec<IpAddr>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let ips = self.records.get(domain).cloned().unwrap_or_default();
        Box::pin(async move { ips })
    }
}
