// pulse-api: Async Rust client for the Firebase Realtime Database and email sign-in
//
// Three surfaces, no domain types:
// - `DatabaseClient`: REST reads and writes on `{base}/{path}.json`
// - `realtime`: server-sent event stream mirrored into full JSON snapshots
// - `IdentityClient`: email/password sign-in against the identity toolkit

pub mod auth;
pub mod database;
pub mod error;
pub mod realtime;
pub mod transport;

pub use auth::{AuthSession, IdentityClient};
pub use database::DatabaseClient;
pub use error::Error;
pub use realtime::{ReconnectConfig, StreamHandle, StreamMessage};
pub use transport::TransportConfig;
