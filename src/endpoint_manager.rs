//! Multi-provider endpoint failover.
//!
//! Each stream or RPC concern registers a named group with an ordered list
//! of providers. Consumers ask for the current endpoint before connecting
//! and report the outcome back; repeated failures rotate the group to the
//! next provider.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

/// Rotate after this many consecutive failures on the active provider.
const ROTATE_AFTER_FAILURES: u32 = 3;

#[derive(Debug)]
struct EndpointGroup {
    endpoints: Vec<String>,
    active: usize,
    consecutive_failures: u32,
    total_failures: u64,
    rotations: u64,
}

#[derive(Debug, Clone)]
pub struct GroupStatus {
    pub name: String,
    pub active_endpoint: Option<String>,
    pub provider_count: usize,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub rotations: u64,
}

#[derive(Default)]
pub struct EndpointManager {
    groups: Mutex<HashMap<String, EndpointGroup>>,
}

impl EndpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider group. Empty lists are ignored.
    pub fn register_group(&self, name: &str, endpoints: Vec<String>) {
        if endpoints.is_empty() {
            return;
        }
        info!(
            "🌐 Endpoint group '{}' registered ({} providers)",
            name,
            endpoints.len()
        );
        self.groups.lock().insert(
            name.to_string(),
            EndpointGroup {
                endpoints,
                active: 0,
                consecutive_failures: 0,
                total_failures: 0,
                rotations: 0,
            },
        );
    }

    /// Current provider for the group, if one is registered.
    pub fn current(&self, name: &str) -> Option<String> {
        let groups = self.groups.lock();
        groups.get(name).map(|g| g.endpoints[g.active].clone())
    }

    pub fn report_success(&self, name: &str) {
        if let Some(g) = self.groups.lock().get_mut(name) {
            g.consecutive_failures = 0;
        }
    }

    /// Record a failure; rotates to the next provider once the active one
    /// has failed [`ROTATE_AFTER_FAILURES`] times in a row.
    pub fn report_failure(&self, name: &str) {
        let mut groups = self.groups.lock();
        let Some(g) = groups.get_mut(name) else {
            return;
        };
        g.consecutive_failures += 1;
        g.total_failures += 1;
        if g.consecutive_failures >= ROTATE_AFTER_FAILURES && g.endpoints.len() > 1 {
            let old = g.endpoints[g.active].clone();
            g.active = (g.active + 1) % g.endpoints.len();
            g.consecutive_failures = 0;
            g.rotations += 1;
            warn!(
                "🔄 Endpoint group '{}' rotating: {} → {}",
                name, old, g.endpoints[g.active]
            );
        }
    }

    pub fn status(&self) -> Vec<GroupStatus> {
        self.groups
            .lock()
            .iter()
            .map(|(name, g)| GroupStatus {
                name: name.clone(),
                active_endpoint: Some(g.endpoints[g.active].clone()),
                provider_count: g.endpoints.len(),
                consecutive_failures: g.consecutive_failures,
                total_failures: g.total_failures,
                rotations: g.rotations,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_after_consecutive_failures() {
        let mgr = EndpointManager::new();
        mgr.register_group("grpc", vec!["a".into(), "b".into()]);
        assert_eq!(mgr.current("grpc").as_deref(), Some("a"));

        mgr.report_failure("grpc");
        mgr.report_failure("grpc");
        assert_eq!(mgr.current("grpc").as_deref(), Some("a"));
        mgr.report_failure("grpc");
        assert_eq!(mgr.current("grpc").as_deref(), Some("b"));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mgr = EndpointManager::new();
        mgr.register_group("rpc", vec!["a".into(), "b".into()]);
        mgr.report_failure("rpc");
        mgr.report_failure("rpc");
        mgr.report_success("rpc");
        mgr.report_failure("rpc");
        // streak was broken, still on the first provider
        assert_eq!(mgr.current("rpc").as_deref(), Some("a"));
    }

    #[test]
    fn test_single_provider_never_rotates() {
        let mgr = EndpointManager::new();
        mgr.register_group("shred", vec!["only".into()]);
        for _ in 0..10 {
            mgr.report_failure("shred");
        }
        assert_eq!(mgr.current("shred").as_deref(), Some("only"));
    }

    #[test]
    fn test_unknown_group() {
        let mgr = EndpointManager::new();
        assert!(mgr.current("nope").is_none());
        mgr.report_failure("nope");
        mgr.report_success("nope");
    }
}
