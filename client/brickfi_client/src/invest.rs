//! Investment flow: validate the amount, gate on stablecoin allowance, then
//! buy shares.
//!
//! Validation runs before anything touches the network, and the invest call
//! is only ever issued when the current allowance covers the amount.

use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::actions::{approve, buy_shares};
use crate::contracts::ContractBinding;
use crate::errors::TxError;
use crate::reads::Reader;
use crate::tracker::TxTracker;
use crate::units::{parse_amount, whole_tokens};

/// Smallest accepted investment, whole stablecoin units.
pub const MIN_INVESTMENT: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvestError {
    #[error("Enter a valid amount")]
    InvalidAmount,

    #[error("The minimum investment is {} units", MIN_INVESTMENT)]
    BelowMinimum,

    #[error("Connect your wallet first")]
    WalletNotConnected,

    #[error("Approve the stablecoin amount before investing")]
    ApprovalRequired,

    #[error("Could not read allowance: {0}")]
    Read(String),

    #[error(transparent)]
    Tx(#[from] TxError),
}

/// Parse and bound-check a user-entered amount. No network access.
pub fn validate_invest_amount(text: &str, decimals: u8) -> Result<U256, InvestError> {
    let amount = parse_amount(text, decimals).map_err(|_| InvestError::InvalidAmount)?;
    if amount.is_zero() {
        return Err(InvestError::InvalidAmount);
    }
    if amount < whole_tokens(MIN_INVESTMENT, decimals) {
        return Err(InvestError::BelowMinimum);
    }
    Ok(amount)
}

/// Next thing the investor has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum InvestStep {
    ConnectWallet,
    Approve { amount: U256, allowance: U256 },
    Invest { amount: U256 },
}

impl InvestStep {
    pub fn needs_approval(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }

    pub fn can_invest(&self) -> bool {
        matches!(self, Self::Invest { .. })
    }
}

/// Decide the next step. An unknown allowance counts as insufficient.
pub fn plan_investment(
    amount: U256,
    allowance: Option<U256>,
    account: Option<Address>,
) -> InvestStep {
    if account.is_none() {
        return InvestStep::ConnectWallet;
    }
    match allowance {
        Some(allowance) if allowance >= amount => InvestStep::Invest { amount },
        other => InvestStep::Approve {
            amount,
            allowance: other.unwrap_or(U256::ZERO),
        },
    }
}

/// Approve and invest against one pool. Each step has its own tracker, so an
/// approval and an investment can be in flight independently.
pub struct InvestFlow {
    reader: Arc<Reader>,
    pool: ContractBinding,
    approve: TxTracker,
    invest: TxTracker,
}

impl InvestFlow {
    pub fn new(reader: Arc<Reader>, pool: ContractBinding, approve: TxTracker, invest: TxTracker) -> Self {
        Self {
            reader,
            pool,
            approve,
            invest,
        }
    }

    pub fn approve_tracker(&self) -> &TxTracker {
        &self.approve
    }

    pub fn invest_tracker(&self) -> &TxTracker {
        &self.invest
    }

    fn decimals(&self) -> u8 {
        self.reader.deployment().stablecoin_decimals
    }

    /// Validate `text` and read the allowance the pool holds for the account.
    pub async fn prepare(&self, text: &str) -> Result<InvestStep, InvestError> {
        let amount = validate_invest_amount(text, self.decimals())?;
        let Some(account) = self.invest.account() else {
            return Ok(InvestStep::ConnectWallet);
        };
        let allowance = self
            .reader
            .allowance(account, self.pool.address)
            .await
            .map_err(|e| InvestError::Read(e.to_string()))?;
        Ok(plan_investment(amount, Some(allowance), Some(account)))
    }

    /// Approve the pool to pull exactly the entered amount.
    pub async fn approve(&self, text: &str) -> Result<Option<TxHash>, InvestError> {
        let amount = validate_invest_amount(text, self.decimals())?;
        if self.approve.account().is_none() {
            return Err(InvestError::WalletNotConnected);
        }
        let call = approve(&self.reader.deployment().stablecoin, self.pool.address, amount);
        Ok(self.approve.submit(call).await?)
    }

    /// Buy shares, refusing unless the allowance already covers the amount.
    pub async fn invest(&self, text: &str) -> Result<Option<TxHash>, InvestError> {
        match self.prepare(text).await? {
            InvestStep::ConnectWallet => Err(InvestError::WalletNotConnected),
            InvestStep::Approve { .. } => Err(InvestError::ApprovalRequired),
            InvestStep::Invest { amount } => {
                info!("Investing {amount} in {}", self.pool.address);
                Ok(self.invest.submit(buy_shares(&self.pool, amount)).await?)
            }
        }
    }
}
