pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod fileid;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod properties;
pub mod range;
pub mod runtime;
pub mod session;
pub mod streamer;
pub mod workers;

// Re-export the pieces embedders touch most often.
pub use codec::{decode, encode, LinkTarget};
pub use config::Config;
pub use error::GatewayError;
pub use runtime::StreamingRuntime;
