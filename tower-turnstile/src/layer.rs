use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;

use tower::Layer;
use turnstile::ClientRegistry;
use turnstile::Quota;

use crate::extract::GlobalKey;
use crate::extract::PeerIp;
use crate::service::AdmissionService;

/// Applies per-client admission to requests.
///
/// Every service produced by this layer, and every clone of those services,
/// shares the same [`ClientRegistry`].
#[derive(Debug)]
pub struct AdmissionLayer<X, K>
where
    K: Hash + Eq,
{
    registry: Arc<ClientRegistry<K>>,
    extractor: X,
}

impl<X, K> Clone for AdmissionLayer<X, K>
where
    X: Clone,
    K: Hash + Eq,
{
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            extractor: self.extractor.clone(),
        }
    }
}

impl<X, K> AdmissionLayer<X, K>
where
    K: Hash + Eq,
{
    /// Create an AdmissionLayer over an existing registry.
    pub fn new(registry: Arc<ClientRegistry<K>>, extractor: X) -> Self {
        AdmissionLayer {
            registry,
            extractor,
        }
    }

    /// The registry backing this layer, e.g. to hand to an `EvictionSweeper`.
    pub fn registry(&self) -> &Arc<ClientRegistry<K>> {
        &self.registry
    }
}

impl AdmissionLayer<PeerIp, IpAddr> {
    /// One bucket per peer IP address.
    pub fn per_client(quota: Quota) -> Self {
        Self::new(Arc::new(ClientRegistry::new(quota)), PeerIp)
    }
}

impl AdmissionLayer<GlobalKey, ()> {
    /// One bucket shared by every request.
    pub fn global(quota: Quota) -> Self {
        Self::new(Arc::new(ClientRegistry::new(quota)), GlobalKey)
    }
}

impl<S, X, K> Layer<S> for AdmissionLayer<X, K>
where
    X: Clone,
    K: Hash + Eq,
{
    type Service = AdmissionService<S, X, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, self.registry.clone(), self.extractor.clone())
    }
}
