//! # Extkit Library
//!
//! Small, dependable helpers for async services: a bounded-concurrency task
//! throttle, stream and string conveniences, an owned XML document model,
//! error log rendering and HS256 bearer token issuance.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use extkit_lib::Throttle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let throttle = Throttle::new(3)?;
//!     let jobs = (1..=10).map(|id| async move { Ok::<_, std::io::Error>(id * 2) });
//!
//!     let doubled = throttle.run(jobs).await?;
//!     println!("results in input order: {:?}", doubled);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Throttle**: At most N tasks in flight, results in input order
//! - **Streams**: Position-preserving reads, copies and line iteration
//! - **XML**: Parse, edit and serialize documents with namespace stripping
//! - **Diagnostics**: Error chains and attached data rendered for logs
//! - **Auth** (`auth` feature): Signed bearer tokens for user profiles

// Re-export main public API types and functions
// This makes them available as extkit_lib::TypeName
pub use concurrent::{throttle, throttle_all, Throttle, DEFAULT_MAX_CONCURRENT_TASKS};
pub use config::{
    load_env_config, resolve_config, BearerConfig, ConfigManager, EnvConfig, FileConfig,
    ThrottleConfig, MAX_CONFIGURED_CONCURRENCY,
};
pub use diagnostics::{ErrorData, ErrorLogExt};
pub use error::{ExtensionsError, ThrottleError};
pub use stream::{
    add_node_to_root, copy_stream, lines, read_document, read_to_string, scoped_read,
    PositionGuard,
};
pub use strings::StrExt;
pub use utils::ensure_not_blank;
pub use xml::{XmlDocument, XmlElement, XmlNode, XML_DECLARATION};

#[cfg(feature = "auth")]
pub use auth::{issue_token, BearerClaims, BearerOptions, UserAuthProfile};

// Cancellation handle accepted by `Throttle::run_until_cancelled`
pub use tokio_util::sync::CancellationToken;

// Internal modules - these are not part of the public API
#[cfg(feature = "auth")]
mod auth;
mod concurrent;
mod config;
mod diagnostics;
mod error;
mod stream;
mod strings;
mod utils;
mod xml;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ExtensionsError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Initialize the library with default settings.
///
/// Installs a `tracing` subscriber that writes to stderr, filtered by
/// `RUST_LOG` (default `warn`). It's optional, and a no-op when the host
/// application already installed a global subscriber.
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        features: get_enabled_features(),
    }
}

/// Information about the library build and features
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub features: Vec<&'static str>,
}

/// Get list of enabled features at compile time
#[allow(clippy::vec_init_then_push)]
fn get_enabled_features() -> Vec<&'static str> {
    let mut features = Vec::new();

    #[cfg(feature = "auth")]
    features.push("auth");

    features
}
