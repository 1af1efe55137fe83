//! # Tower Turnstile
//!
//! `tower-turnstile` puts a per-client token bucket in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## Admission
//!
//! For every request, [`AdmissionService`]:
//!
//! 1. **Identifies the client** with a [`KeyExtractor`]: peer IP, a header such as
//!    an API key, or a single global key.
//! 2. **Finds its bucket** in a shared [`ClientRegistry`], creating a full one for
//!    a client it has not seen before.
//! 3. **Admits or rejects**: an admitted request is forwarded untouched; a rejected
//!    one fails fast with [`AdmissionError::RateLimited`]. Requests are never queued.
//!
//! Pair a per-client layer with an [`EvictionSweeper`](turnstile::EvictionSweeper)
//! so that clients which go quiet are eventually forgotten.
//!
//! ## Feature Flags
//!
//! - `axum` (default): Enables `IntoResponse` for [`AdmissionError`], producing
//!   `429 Too Many Requests` with a JSON body and `Retry-After`, or `500` when the
//!   client cannot be identified. Also lets [`PeerIp`] read axum's `ConnectInfo`.

mod error;
mod extract;
mod layer;
mod service;


pub use error::AdmissionError;
#[cfg(feature = "axum")]
pub use error::handle_admission_error;
pub use error::Message;
pub use extract::ExtractionError;
pub use extract::ForwardedFor;
pub use extract::GlobalKey;
pub use extract::HeaderKey;
pub use extract::KeyExtractor;
pub use extract::KeyFn;
pub use extract::PeerIp;
pub use extract::key_fn;
pub use layer::AdmissionLayer;
pub use service::AdmissionService;
pub use service::ResponseFuture;
pub use turnstile::ClientRegistry;
pub use turnstile::Quota;
