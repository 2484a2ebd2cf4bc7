use thiserror::Error;

/// Result type for the request path
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Errors raised while dispatching a request
///
/// Everything up to and including [`RpcError::Coercion`] is detected before the
/// pipeline is built and never reaches a filter. [`RpcError::Fault`] is raised
/// by a filter or by the invoked method and unwinds through the filters that
/// are still on the stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("request body is empty")]
    EmptyRequest,

    #[error("failed to parse request: {0}")]
    MalformedRequest(String),

    #[error("service '{0}' is not registered")]
    UnregisteredService(String),

    #[error("method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error("method '{method}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument {index} cannot be converted to {expected}: {reason}")]
    Coercion {
        index: usize,
        expected: &'static str,
        reason: String,
    },

    #[error("{0}")]
    Fault(String),
}

impl RpcError {
    /// Create an invocation fault
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }

    /// Short label of the failure class, used for envelopes that hide detail
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyRequest => "empty body",
            Self::MalformedRequest(_) => "parse failure",
            Self::UnregisteredService(_) => "unregistered type",
            Self::MethodNotFound { .. } => "method not found",
            Self::ArityMismatch { .. } | Self::Coercion { .. } => "coercion failure",
            Self::Fault(_) => "invocation failure",
        }
    }

    /// Whether the error was raised before the pipeline existed
    pub fn is_pre_dispatch(&self) -> bool {
        !matches!(self, Self::Fault(_))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fault(format!("serialization error: {}", err))
    }
}

/// Errors detected while building the service registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("service '{0}' is registered more than once")]
    DuplicateService(String),

    #[error("type '{type_name}' is already registered as service '{existing}'")]
    DuplicateType {
        type_name: &'static str,
        existing: String,
    },

    #[error("method '{method}' is registered more than once on service '{service}'")]
    DuplicateMethod { service: String, method: String },

    #[error("filter targets unknown method '{method}' on service '{service}'")]
    UnknownFilterTarget { service: String, method: String },
}
