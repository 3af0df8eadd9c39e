use thiserror::Error;

/// Result type for Q-SYS operations
pub type Result<T> = std::result::Result<T, QscError>;

/// Errors that can occur when talking to a Q-SYS core
#[derive(Error, Debug)]
pub enum QscError {
    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connect to the core failed
    #[error("unable to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the greeting banner of a new connection failed
    #[error("unable to read new connection prompt from {address}: {source}")]
    Handshake {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A deadline expired while the named step was in flight
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// The core closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error
    #[error("unable to parse response: {0}")]
    Json(#[from] serde_json::Error),

    /// The core reported an error instead of a result
    #[error("core returned error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
    },

    /// The name echoed by `Control.Set` differs from the one sent
    #[error("response name ({received}) does not match the name sent ({sent})")]
    NameMismatch { sent: String, received: String },

    /// A mute control carried a value other than 0 or 1
    #[error("invalid mute value {value} for {name}")]
    InvalidMute { name: String, value: f64 },

    /// No result in a `Control.Get` response carried the requested name
    #[error("no value returned for control {0}")]
    ControlNotFound(String),

    /// A client operation failed; names the core and what was asked of it
    #[error("{operation} on {address} failed: {source}")]
    Request {
        address: String,
        operation: String,
        #[source]
        source: Box<QscError>,
    },
}

impl QscError {
    /// Attach the core address and operation, unless already attached
    pub(crate) fn context(self, address: &str, operation: impl Into<String>) -> Self {
        match self {
            QscError::Request { .. } => self,
            source => QscError::Request {
                address: address.to_string(),
                operation: operation.into(),
                source: Box::new(source),
            },
        }
    }

    /// The underlying error, looking through any operation context
    pub fn root(&self) -> &QscError {
        match self {
            QscError::Request { source, .. } => source.root(),
            other => other,
        }
    }

    /// Address of the core the failed operation was sent to, if recorded
    pub fn address(&self) -> Option<&str> {
        match self {
            QscError::Request { address, .. } => Some(address.as_str()),
            _ => None,
        }
    }

    /// Returns true for failures of the connection itself.
    ///
    /// The pool never returns a connection that produced one of these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root(),
            QscError::Io(_)
                | QscError::Dial { .. }
                | QscError::Handshake { .. }
                | QscError::Timeout(_)
                | QscError::ConnectionClosed
        )
    }

    /// Returns true when the core answered but the answer was unusable.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.root(),
            QscError::Json(_)
                | QscError::Remote { .. }
                | QscError::NameMismatch { .. }
                | QscError::InvalidMute { .. }
        )
    }

    /// Returns true when the requested control was absent from the response.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), QscError::ControlNotFound(_))
    }
}
