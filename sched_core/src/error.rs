/// Core error type shared across the scheduler crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("external error: {0}")]
    External(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    /// A job's `interval` or `cronSchedule` string failed to parse. Raised
    /// from `JobScheduler::start`; the caller is expected to have validated
    /// the schedule at `define` time, so reaching this is a contract
    /// violation rather than routine control flow.
    #[error("schedule error: {0}")]
    Scheduling(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias used throughout the scheduler crate.
pub type Result<T> = std::result::Result<T, Error>;
