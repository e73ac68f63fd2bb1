//! The locator dispatch interface consumed by the remote peer client and by
//! any service client (spec §6). The locator service itself — cluster
//! discovery, routing-group storage — is explicitly out of core scope
//! (spec §1); this module only fixes the contract the core depends on.

use async_trait::async_trait;

use crate::error::LocatorError;

/// One resolved service endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: std::net::IpAddr,
    pub port: u16,
}

/// The result of a successful `resolve` call (spec §6).
#[derive(Debug, Clone)]
pub struct Resolution {
    pub endpoints: Vec<Endpoint>,
    pub version: u32,
}

/// One message on a `connect` subscription: a named service moved or
/// (re)appeared somewhere in the cluster (spec §6 "streamed updates as
/// the cluster changes").
#[derive(Debug, Clone)]
pub struct ClusterUpdate {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

/// The collaborator a remote peer client uses to find cluster peers,
/// without needing to know how they were discovered (spec §6).
#[async_trait]
pub trait Locator: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Resolution, LocatorError>;

    /// Subscribes a remote node (identified by `uuid`) to this locator's
    /// cluster-update stream (spec §6 `connect(uuid) -> stream<cluster_update>`).
    async fn connect(
        &self,
        uuid: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<ClusterUpdate>, LocatorError>;

    async fn refresh(&self, group_name: &str) -> Result<(), LocatorError>;
}

/// A `Locator` backed by a fixed, pre-known mapping, for tests and for
/// deployments where peer addresses are supplied out of band rather than
/// discovered (SPEC_FULL §2.7: the remote peer client still needs *some*
/// locator to exist end to end).
#[derive(Debug, Default)]
pub struct StaticLocator {
    entries: std::collections::HashMap<String, Vec<Endpoint>>,
}

impl StaticLocator {
    pub fn new() -> Self {
        StaticLocator::default()
    }

    pub fn with_service(mut self, name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        self.entries.insert(name.into(), endpoints);
        self
    }
}

#[async_trait]
impl Locator for StaticLocator {
    async fn resolve(&self, name: &str) -> Result<Resolution, LocatorError> {
        match self.entries.get(name) {
            Some(endpoints) => Ok(Resolution {
                endpoints: endpoints.clone(),
                version: 1,
            }),
            None => Err(LocatorError::ServiceNotAvailable),
        }
    }

    async fn connect(
        &self,
        _uuid: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<ClusterUpdate>, LocatorError> {
        // No discovery backend of its own (spec §1 Non-goals): the
        // subscription is valid but never produces an update.
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn refresh(&self, _group_name: &str) -> Result<(), LocatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint {
            ip: std::net::IpAddr::from([127, 0, 0, 1]),
            port,
        }
    }

    #[tokio::test]
    async fn resolve_known_service_returns_configured_endpoints() {
        let locator = StaticLocator::new().with_service("raft-2", vec![ep(9002)]);
        let resolution = locator.resolve("raft-2").await.unwrap();
        assert_eq!(resolution.endpoints, vec![ep(9002)]);
    }

    #[tokio::test]
    async fn resolve_unknown_service_fails() {
        let locator = StaticLocator::new();
        let err = locator.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, LocatorError::ServiceNotAvailable));
    }

    #[tokio::test]
    async fn connect_subscription_never_yields_without_a_discovery_backend() {
        let locator = StaticLocator::new();
        let mut rx = locator.connect("node-1").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_is_a_no_op_success() {
        let locator = StaticLocator::new();
        assert!(locator.refresh("some-group").await.is_ok());
    }
}
