use alloy::primitives::Address;

/// Result type for contract binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Errors raised by the binding layer and its backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("Failed to parse interface definition: {0}")]
    Parse(String),

    #[error("Method '{0}' not found in contract interface")]
    UnknownMethod(String),

    #[error("Event '{0}' not found in contract interface")]
    UnknownEvent(String),

    #[error("Failed to encode arguments: {0}")]
    Encode(String),

    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Execution reverted: {reason}")]
    ContractRevert { reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Contract was bound without a {0} backend")]
    MissingCapability(&'static str),

    #[error("No contract code at address {0}")]
    NoCode(Address),

    #[error("Signing failed: {0}")]
    Signer(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BindError {
    pub fn revert(reason: impl Into<String>) -> Self {
        BindError::ContractRevert {
            reason: reason.into(),
        }
    }

    /// The revert reason, when on-chain execution rejected the call
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            BindError::ContractRevert { reason } => Some(reason),
            _ => None,
        }
    }
}
