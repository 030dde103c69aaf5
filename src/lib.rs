//! Post-quantum, peer-to-peer, end-to-end encrypted messenger core.
//!
//! `crypto` holds the cryptographic primitives and wire envelope, `network`
//! the DHT overlay and P2P transport, `storage` local persistence, `types`
//! the shared domain types, and `engine` the orchestrator that ties all of
//! it together behind the public [`engine::Engine`] handle.

pub mod crypto;
pub mod engine;
pub mod error;
pub mod network;
pub mod storage;
pub mod types;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};

/// Install `env_logger` as the process-wide `log` facade backend, honoring
/// `storage::Config::log_level`/`log_tags` (spec 6's ambient logging
/// surface). Safe to call more than once; only the first call takes effect.
///
/// Front-ends that already run their own `env_logger`/`tracing` setup can
/// skip this and just depend on the `log` crate calls made throughout this
/// crate being routed to whatever subscriber they install instead.
pub fn init_logging(config: &storage::Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level.to_level_filter());
    if let Some(tags) = &config.log_tags {
        builder.parse_filters(tags);
    }
    let _ = builder.try_init();
}
