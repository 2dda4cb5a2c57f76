//! Pure classification of the configured control-plane target.

use crate::config::ClientSettings;

/// The kind of control-plane server a client is configured to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    Cloud,
    Server,
    Ephemeral,
    Unconfigured,
}

/// Classifies `settings` into a [`ServerType`], evaluated in the order
/// the specification prescribes: an `api_url` pointing at the cloud API
/// wins over a generic `api_url`, which wins over ephemeral mode, which
/// falls back to unconfigured.
pub fn determine_server_type(settings: &ClientSettings) -> ServerType {
    match &settings.api_url {
        Some(api_url) => {
            let is_cloud = settings
                .cloud_api_url
                .as_ref()
                .is_some_and(|cloud_url| api_url.starts_with(cloud_url.as_str()));
            if is_cloud {
                ServerType::Cloud
            } else {
                ServerType::Server
            }
        }
        None => {
            if settings.allow_ephemeral_mode {
                ServerType::Ephemeral
            } else {
                ServerType::Unconfigured
            }
        }
    }
}
