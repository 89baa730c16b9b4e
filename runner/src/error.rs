use std::{error::Error, fmt, io};

use framing::ErrCode;

/// The runner module's result type.
pub type Result<T> = std::result::Result<T, RunnerErr>;

/// Runner runtime failures.
///
/// Every variant except `Io` and `Protocol` is recoverable and maps onto
/// one wire error code; those two are fatal and terminate the process.
#[derive(Debug)]
pub enum RunnerErr {
    Exception(String),
    InstantiatedModelNotFound {
        instantiated_id: String,
    },
    InvalidArgument(String),
    OperationClosed,
    DuplicateKey {
        key: String,
    },
    LimitExceeded {
        limit: usize,
    },
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },
    Io(io::Error),
    Protocol(String),
}

impl RunnerErr {
    /// Maps this failure onto the reply error vocabulary.
    pub fn code(&self) -> ErrCode {
        match self {
            RunnerErr::Exception(_) => ErrCode::Exception,
            RunnerErr::InstantiatedModelNotFound { .. } => ErrCode::InstantiatedModelNotFound,
            RunnerErr::InvalidArgument(_) => ErrCode::InvalidArgument,
            RunnerErr::OperationClosed => ErrCode::OperationClosed,
            RunnerErr::DuplicateKey { .. } => ErrCode::DuplicateKey,
            RunnerErr::LimitExceeded { .. } => ErrCode::LimitExceeded,
            RunnerErr::ValueTooLarge { .. } => ErrCode::ValueTooLarge,
            // Fatal arms never reach a reply, the mapping exists for totality.
            RunnerErr::Io(_) | RunnerErr::Protocol(_) => ErrCode::Exception,
        }
    }
}

impl fmt::Display for RunnerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerErr::Exception(details) => write!(f, "{details}"),
            RunnerErr::InstantiatedModelNotFound { instantiated_id } => {
                write!(f, "no instantiated model with id {instantiated_id}")
            }
            RunnerErr::InvalidArgument(details) => write!(f, "invalid argument: {details}"),
            RunnerErr::OperationClosed => {
                write!(f, "the operation owning this object has already completed")
            }
            RunnerErr::DuplicateKey { key } => {
                write!(f, "artifact key {key} was already provided by this provider")
            }
            RunnerErr::LimitExceeded { limit } => {
                write!(f, "artifact key budget exhausted, at most {limit} keys per provider")
            }
            RunnerErr::ValueTooLarge { key, size, limit } => write!(
                f,
                "artifact value for key {key} is {size} bytes, the limit is {limit}, split it across multiple keys"
            ),
            RunnerErr::Io(e) => write!(f, "io error: {e}"),
            RunnerErr::Protocol(details) => write!(f, "protocol violation: {details}"),
        }
    }
}

impl Error for RunnerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RunnerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<RunnerErr> for io::Error {
    fn from(value: RunnerErr) -> Self {
        match value {
            RunnerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
