use thiserror::Error;

use crate::config::ConfigError;

/// Process exit status contract shared by the server and the operator CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    Configuration,
    Connection,
    FatalHandler,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Configuration => 1,
            Self::Connection => 2,
            Self::FatalHandler => 3,
        }
    }

    pub fn error_class(self) -> &'static str {
        match self {
            Self::Clean => "none",
            Self::Configuration => "config_validation",
            Self::Connection => "platform_connection",
            Self::FatalHandler => "fatal_handler",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("platform connection failure: {0}")]
    Connection(String),
    #[error("fatal event handler failure: {0}")]
    FatalHandler(String),
}

impl ApplicationError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Configuration(_) => ExitStatus::Configuration,
            Self::Connection(_) => ExitStatus::Connection,
            Self::FatalHandler(_) => ExitStatus::FatalHandler,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_status().code()
    }
}
