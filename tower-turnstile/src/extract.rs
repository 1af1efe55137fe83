use std::fmt::Debug;
use std::hash::Hash;
use std::net::IpAddr;
use std::net::SocketAddr;

use http::HeaderName;
use http::Request;

/// Reasons a client key could not be derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// Neither a `SocketAddr` nor a `ConnectInfo<SocketAddr>` extension was present.
    #[error("request carries no peer address")]
    MissingPeerAddr,

    #[error("request has no `{0}` header")]
    MissingHeader(String),

    /// The header value was not visible ASCII.
    #[error("`{0}` header is not valid text")]
    InvalidHeader(String),

    #[error("`{0}` is not an IP address")]
    MalformedAddress(String),
}

/// Derives the key that identifies a request's client.
///
/// Requests whose key compares equal share one token bucket.
pub trait KeyExtractor<Req>: Clone {
    type Key: Hash + Eq + Clone + Debug + Send + Sync + 'static;

    fn extract(&self, req: &Req) -> Result<Self::Key, ExtractionError>;
}

/// Keys requests by the IP address of the connected peer.
///
/// The address is read from a `SocketAddr` request extension or, with the
/// `axum` feature, from axum's `ConnectInfo<SocketAddr>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIp;

impl<B> KeyExtractor<Request<B>> for PeerIp {
    type Key = IpAddr;

    fn extract(&self, req: &Request<B>) -> Result<IpAddr, ExtractionError> {
        #[cfg(feature = "axum")]
        if let Some(axum::extract::ConnectInfo(addr)) =
            req.extensions().get::<axum::extract::ConnectInfo<SocketAddr>>()
        {
            return Ok(addr.ip());
        }

        req.extensions()
            .get::<SocketAddr>()
            .map(SocketAddr::ip)
            .ok_or(ExtractionError::MissingPeerAddr)
    }
}

/// Keys requests by the first address in `X-Forwarded-For`.
///
/// Only trust this behind a proxy that overwrites the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedFor;

impl<B> KeyExtractor<Request<B>> for ForwardedFor {
    type Key = IpAddr;

    fn extract(&self, req: &Request<B>) -> Result<IpAddr, ExtractionError> {
        const NAME: &str = "x-forwarded-for";

        let value = req
            .headers()
            .get(NAME)
            .ok_or_else(|| ExtractionError::MissingHeader(NAME.to_string()))?
            .to_str()
            .map_err(|_| ExtractionError::InvalidHeader(NAME.to_string()))?;
        let first = value.split(',').next().unwrap_or_default().trim();

        first
            .parse()
            .map_err(|_| ExtractionError::MalformedAddress(first.to_string()))
    }
}

/// Keys requests by the value of a header, such as an API key.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl<B> KeyExtractor<Request<B>> for HeaderKey {
    type Key = String;

    fn extract(&self, req: &Request<B>) -> Result<String, ExtractionError> {
        let value = req
            .headers()
            .get(&self.name)
            .ok_or_else(|| ExtractionError::MissingHeader(self.name.to_string()))?
            .to_str()
            .map_err(|_| ExtractionError::InvalidHeader(self.name.to_string()))?;

        if value.is_empty() {
            return Err(ExtractionError::MissingHeader(self.name.to_string()));
        }
        Ok(value.to_string())
    }
}

/// Gives every request the same key, so all clients share one bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalKey;

impl<Req> KeyExtractor<Req> for GlobalKey {
    type Key = ();

    fn extract(&self, _req: &Req) -> Result<(), ExtractionError> {
        Ok(())
    }
}

/// A [`KeyExtractor`] built from a closure. See [`key_fn`].
#[derive(Clone, Copy)]
pub struct KeyFn<F> {
    f: F,
}

impl<F> Debug for KeyFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFn")
            .field("f", &std::any::type_name::<F>())
            .finish()
    }
}

/// Returns a [`KeyExtractor`] that calls `f` on each request.
pub fn key_fn<F>(f: F) -> KeyFn<F> {
    KeyFn { f }
}

impl<F, Req, K> KeyExtractor<Req> for KeyFn<F>
where
    F: Fn(&Req) -> Result<K, ExtractionError> + Clone,
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    type Key = K;

    fn extract(&self, req: &Req) -> Result<K, ExtractionError> {
        (self.f)(req)
    }
}
