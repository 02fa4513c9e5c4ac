use thiserror::Error;

/// Errors raised inside the control stack.
///
/// Nothing here reaches an operator directly: the supervisor, the C ABI and
/// the Python bindings turn every variant into a status string or a negative
/// return code.
#[derive(Debug, Error)]
pub enum HelmError{
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown command code {0}")]
    UnknownCommand(i32),

    #[error("unknown engine id {0}")]
    UnknownEngine(i32),

    #[error("link {0} is not open")]
    LinkClosed(String),

    #[error("failed to spawn worker {name}: {source}")]
    Spawn{
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulated write failure on {0}")]
    InjectedFault(String),
}

pub type Result<T> = std::result::Result<T, HelmError>;
