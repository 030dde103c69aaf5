//! Local persistence (spec 3, 5, 6): identity secrets, the per-identity
//! message and contact stores, group/membership cache, the DHT public-key
//! cache, and the flat configuration file. Everything under this module is
//! single-writer (the engine) / multi-reader via the internal locking each
//! store implements, per spec 5's shared-resource policy.

pub mod cache;
pub mod config;
pub mod contacts_store;
pub mod error;
pub mod groups_store;
pub mod keystore;
pub mod messages;
pub mod paths;

pub use cache::{CachedKeys, PublicKeyCache};
pub use config::Config;
pub use contacts_store::ContactStore;
pub use error::{StorageError, StorageResult};
pub use groups_store::GroupStore;
pub use messages::MessageStore;
pub use paths::{config_path, default_data_dir, validate_identity_name, IdentityPaths};
