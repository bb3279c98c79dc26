//! Error kinds surfaced by the harness
//!
//! Every fallible operation returns [`HarnessError`]. Nothing is retried; the
//! first failure is propagated to the caller.

use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The host OS can neither run a native envoy binary nor fall back to docker
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Pulling the image or copying the binary out of it failed
    #[error("failed to fetch envoy from image {image}: {reason}")]
    Fetch { image: String, reason: String },

    /// No up, non-loopback, non-point-to-point IPv4 interface was found
    #[error("unable to find a control-plane address on any network interface")]
    NoAddressFound,

    /// Enumerating network interfaces failed
    #[error("failed to query network interfaces")]
    InterfaceQuery(#[source] nix::Error),

    /// The process or container could not be started
    #[error("unable to start envoy: {reason}")]
    Launch {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// `docker stop` failed
    #[error("error stopping container {container_id}: {reason}")]
    Stop { container_id: String, reason: String },

    /// The admin port never accepted a connection
    #[error("envoy admin port {port} did not become ready within {timeout:?}")]
    NotReady { port: u16, timeout: Duration },

    /// The configuration file could not be parsed
    #[error("invalid harness configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub(crate) fn launch(reason: impl Into<String>) -> Self {
        Self::Launch {
            reason: reason.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_names_image() {
        let err = HarnessError::Fetch {
            image: "soloio/envoy:latest".to_string(),
            reason: "exit status: 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to fetch envoy from image soloio/envoy:latest: exit status: 1"
        );
    }

    #[test]
    fn test_launch_helper_has_no_source() {
        let err = HarnessError::launch("instance already started");
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.to_string(), "unable to start envoy: instance already started");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
    }
}
