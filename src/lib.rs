//! # Control-Plane Client
//!
//! A resilient async (and blocking) HTTP client for a workflow-orchestration
//! control plane. Every outbound request passes through a single pipeline
//! that attaches CSRF protection, composes headers, and retries transient
//! failures with exponential backoff and jitter.
//!
//! ```no_run
//! # async fn run() -> control_plane_client::Result<()> {
//! use control_plane_client::Client;
//!
//! let client = Client::builder()
//!     .with_base_url("http://localhost:4200/api/")?
//!     .with_max_retries(5)
//!     .build()?;
//!
//! let response = client.get("health").await?;
//! assert!(response.status().is_success());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod csrf;
pub mod error;
pub mod headers;
pub mod response;
pub mod retry;
pub mod security;
pub mod server_type;
pub mod sync_client;

pub use client::{Client, ClientBuilder};
pub use config::ClientSettings;
pub use error::{Error, Result};
pub use response::ApiResponse;
pub use server_type::{determine_server_type, ServerType};
pub use sync_client::{BlockingClient, BlockingClientBuilder};

// Ensure TLS features are mutually exclusive.
#[cfg(all(feature = "tls-rustls", feature = "tls-native-tls"))]
compile_error!("TLS features tls-rustls and tls-native-tls are mutually exclusive. Please choose only one.");
