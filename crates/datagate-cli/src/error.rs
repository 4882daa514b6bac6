use datagate_core::{DecodeError, RegistryError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("no sources file given; pass --config or set DATAGATE_CONFIG")]
    MissingConfig,

    #[error(transparent)]
    Config(#[from] DecodeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::MissingConfig | Self::Config(_) => 2,
            Self::Registry(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
