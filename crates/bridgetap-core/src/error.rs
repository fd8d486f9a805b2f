use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable 'NETWORK_ID' needs to be set")]
    MissingNetworkId,
    #[error(
        "network ID {0} needs to correspond to either the non-truncated SHA-256 ID \
         or the ID truncated to 12 characters"
    )]
    InvalidNetworkId(String),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(
        "interface {interface} does not exist, unable to initiate capture. \
         Did you start this container with network mode 'host'?\n\
         Possible interfaces: [{}]",
        .available.join(", ")
    )]
    InterfaceNotFound {
        interface: String,
        available: Vec<String>,
    },
    #[error("invalid capture lifecycle transition: {0}")]
    Lifecycle(String),
    #[error("failed to start capture: {0}")]
    StartFailed(String),
    #[error("capture engine failed: {0}")]
    Engine(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}
