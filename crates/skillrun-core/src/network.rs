//! Egress enforcement through per-execution networks and DNS allowlisting.
//!
//! A skill that declares egress gets a fresh bridge network. Its declared
//! domains are resolved on the host and pinned into the container's
//! `/etc/hosts` with `--add-host`; the container resolver is pointed at a
//! loopback address with no DNS server behind it, so every other name fails
//! to resolve. `--cap-drop=ALL` removes the raw-socket capability needed to
//! query an external resolver directly.
//!
//! A skill with no declared egress (or run with [`EgressMode::None`]) gets
//! `--network=none`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use skillrun_config::EgressMode;

use crate::BoxFuture;
use crate::engine::{EngineError, ProcessEngine};
use crate::error::{RunnerError, truncate_chars};
use crate::manifest::{EgressRule, SkillManifest};

/// Resolver address injected into allowlisted containers. Nothing listens
/// there, so only `--add-host` entries resolve.
pub const DNS_SINKHOLE: &str = "127.0.0.1";

/// Engine stderr kept in [`RunnerError::Network`] messages.
const NETWORK_STDERR_LIMIT: usize = 500;

/// A declared domain together with the addresses it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEgress {
    pub domain: String,
    pub ips: Vec<IpAddr>,
}

impl ResolvedEgress {
    pub fn new(domain: impl Into<String>, ips: Vec<IpAddr>) -> Self {
        Self {
            domain: domain.into(),
            ips,
        }
    }
}

/// Host-side name resolution.
pub trait DnsResolver: Send + Sync {
    /// Resolve `domain` to its addresses. An empty result means the domain
    /// did not resolve.
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Vec<IpAddr>>;
}

/// Resolver backed by the host's system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostResolver;

impl DnsResolver for HostResolver {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Vec<IpAddr>> {
        Box::pin(async move {
            match tokio::net::lookup_host((domain, 0)).await {
                Ok(addrs) => order_addresses(addrs.map(|a| a.ip())),
                Err(e) => {
                    tracing::debug!(domain, error = %e, "DNS lookup failed");
                    Vec::new()
                }
            }
        })
    }
}

/// IPv4 before IPv6, first occurrence wins.
fn order_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
    let (mut ips, v6): (Vec<IpAddr>, Vec<IpAddr>) = addrs.into_iter().partition(IpAddr::is_ipv4);
    ips.extend(v6);
    let mut seen = HashSet::new();
    ips.retain(|ip| seen.insert(*ip));
    ips
}

/// Resolve every declared egress domain, in declaration order.
///
/// Fails closed: the first domain with no addresses aborts with
/// [`RunnerError::DnsResolution`].
pub async fn resolve_egress_domains(
    resolver: &dyn DnsResolver,
    egress: &[EgressRule],
) -> Result<Vec<ResolvedEgress>, RunnerError> {
    let mut resolved = Vec::with_capacity(egress.len());
    for rule in egress {
        let ips = order_addresses(resolver.resolve(&rule.domain).await);
        if ips.is_empty() {
            return Err(RunnerError::DnsResolution {
                domain: rule.domain.clone(),
            });
        }
        tracing::debug!(domain = %rule.domain, ips = ?ips, "Resolved egress domain");
        resolved.push(ResolvedEgress::new(rule.domain.clone(), ips));
    }
    Ok(resolved)
}

/// How a container is attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPosture {
    /// No network at all.
    Isolated,
    /// Dedicated bridge network reaching only declared domains.
    Allowlisted,
}

impl NetworkPosture {
    /// Allowlisted iff the manifest declares egress and the mode permits it.
    pub fn for_manifest(manifest: &SkillManifest, mode: EgressMode) -> Self {
        if mode == EgressMode::Allowlist && !manifest.egress().is_empty() {
            NetworkPosture::Allowlisted
        } else {
            NetworkPosture::Isolated
        }
    }
}

/// Eight lowercase hex characters from a fresh v4 UUID.
pub(crate) fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// `skill-net-<skill>-<8 hex>`
pub fn network_name(skill: &str) -> String {
    format!("skill-net-{skill}-{}", short_id())
}

/// An ephemeral network owned by exactly one execution.
///
/// Dropping a handle that was never [`destroy`](Self::destroy)ed schedules
/// the removal on the current tokio runtime.
pub struct NetworkHandle {
    name: String,
    engine: Arc<dyn ProcessEngine>,
    destroyed: bool,
}

impl std::fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandle")
            .field("name", &self.name)
            .field("engine", &self.engine.name())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl NetworkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the network. Safe to call more than once; failures are
    /// logged and swallowed.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        remove_network(self.engine.as_ref(), &self.name).await;
        self.destroyed = true;
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(network = %self.name, "No runtime to remove abandoned network");
            return;
        };
        tracing::debug!(network = %self.name, "Removing abandoned network");
        let engine = Arc::clone(&self.engine);
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move { remove_network(engine.as_ref(), &name).await });
    }
}

async fn remove_network(engine: &dyn ProcessEngine, name: &str) {
    match engine.remove_network(name).await {
        Ok(()) => tracing::debug!(network = %name, "Network removed"),
        Err(e) => tracing::debug!(network = %name, error = %e, "Network removal failed"),
    }
}

/// Create a uniquely named bridge network for one execution of `skill`.
pub async fn create_network(
    engine: &Arc<dyn ProcessEngine>,
    skill: &str,
) -> Result<NetworkHandle, RunnerError> {
    let name = network_name(skill);
    engine
        .create_network(&name, skill)
        .await
        .map_err(|e| create_error(&name, e))?;

    tracing::debug!(network = %name, skill, "Network created");
    Ok(NetworkHandle {
        name,
        engine: Arc::clone(engine),
        destroyed: false,
    })
}

fn create_error(network: &str, err: EngineError) -> RunnerError {
    let detail = match err {
        EngineError::Command { code, stderr, .. } => format!(
            "exit {}: {}",
            code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            truncate_chars(stderr.trim(), NETWORK_STDERR_LIMIT)
        ),
        other => other.to_string(),
    };
    RunnerError::Network(format!("failed to create network {network}: {detail}"))
}

/// Container network arguments for the given network and resolved egress.
///
/// Without a network or without resolved domains the container is fully
/// isolated.
pub fn build_network_args(network: Option<&str>, resolved: &[ResolvedEgress]) -> Vec<String> {
    let Some(network) = network.filter(|_| !resolved.is_empty()) else {
        return vec!["--network=none".to_string(), "--cap-drop=ALL".to_string()];
    };

    let mut args = vec![
        format!("--network={network}"),
        format!("--dns={DNS_SINKHOLE}"),
        "--cap-drop=ALL".to_string(),
    ];
    for entry in resolved {
        for ip in &entry.ips {
            args.push(format!("--add-host={}:{ip}", entry.domain));
        }
    }
    args
}
