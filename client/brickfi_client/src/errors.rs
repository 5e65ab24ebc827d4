//! SDK-wide error types.

use alloy_primitives::utils::UnitsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decode error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("Unit conversion error: {0}")]
    Units(#[from] UnitsError),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Unknown project phase code: {0}")]
    UnknownPhase(u8),

    #[error("No wallet account connected")]
    NoAccount,

    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure of a single state-changing call.
///
/// Wallet rejections, simulation reverts, reverted receipts and confirmation
/// timeouts all end up here. Consumers only get a message; the variant is kept
/// for logging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("Transaction rejected by wallet: {0}")]
    Rejected(String),

    #[error("Transaction simulation failed: {0}")]
    Simulation(String),

    #[error("Transaction reverted on-chain: {0}")]
    Reverted(String),

    #[error("Timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl TxError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<ClientError> for TxError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Rpc { code, message } if code == 3 || message.contains("revert") => {
                TxError::Simulation(message)
            }
            ClientError::Rpc { code: 4001, message } => TxError::Rejected(message),
            ClientError::NoAccount => TxError::Rejected("No wallet account connected".to_string()),
            other => TxError::Network(other.to_string()),
        }
    }
}
