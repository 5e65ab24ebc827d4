//! Call descriptors for every state-changing operation.
//!
//! Each builder returns a [`ContractCall`]; the single
//! [`TxTracker`](crate::tracker::TxTracker) submits and tracks any of them.

use std::fmt;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::{ContractBinding, IPool, IStablecoin, ITokenizer};

/// Which operation a call performs. Used for logging and callbacks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    BuyShares,
    ClaimReturns,
    WithdrawRaisedFunds,
    ReturnFunds,
    WithdrawFailedRaise,
    FinishBuyingTime,
    CreateFraction,
    Whitelist,
    Approve,
    Mint,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuyShares => "buy_shares",
            Self::ClaimReturns => "claim_returns",
            Self::WithdrawRaisedFunds => "withdraw_raised_funds",
            Self::ReturnFunds => "return_funds",
            Self::WithdrawFailedRaise => "withdraw_failed_raise",
            Self::FinishBuyingTime => "finish_buying_time",
            Self::CreateFraction => "create_fraction",
            Self::Whitelist => "whitelist",
            Self::Approve => "approve",
            Self::Mint => "mint",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully encoded write: target, calldata and attached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub action: Action,
    pub to: Address,
    pub chain_id: u64,
    pub input: Bytes,
    pub value: U256,
}

impl ContractCall {
    pub fn new<C: SolCall>(action: Action, binding: &ContractBinding, call: C) -> Self {
        Self {
            action,
            to: binding.address,
            chain_id: binding.chain_id,
            input: call.abi_encode().into(),
            value: U256::ZERO,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────

pub fn buy_shares(pool: &ContractBinding, amount: U256) -> ContractCall {
    ContractCall::new(Action::BuyShares, pool, IPool::buySharesCall { amount })
}

pub fn claim_returns(pool: &ContractBinding) -> ContractCall {
    ContractCall::new(Action::ClaimReturns, pool, IPool::claimReturnsCall {})
}

/// Owner pulls the raised funds once the softcap is reached.
pub fn withdraw_raised_funds(pool: &ContractBinding) -> ContractCall {
    ContractCall::new(
        Action::WithdrawRaisedFunds,
        pool,
        IPool::withdrawRaisedFundsCall {},
    )
}

/// Owner repays principal plus profit.
pub fn return_funds(pool: &ContractBinding, amount: U256) -> ContractCall {
    ContractCall::new(Action::ReturnFunds, pool, IPool::returnFundsCall { amount })
}

pub fn withdraw_failed_raise(pool: &ContractBinding) -> ContractCall {
    ContractCall::new(
        Action::WithdrawFailedRaise,
        pool,
        IPool::withdrawFailedRaiseCall {},
    )
}

/// Demo-only shortcut that ends the buying period immediately.
pub fn finish_buying_time(pool: &ContractBinding) -> ContractCall {
    ContractCall::new(
        Action::FinishBuyingTime,
        pool,
        IPool::deusExMachina_finishBuyingTimeCall {},
    )
}

// ─────────────────────────────────────────────────────────
// Stablecoin
// ─────────────────────────────────────────────────────────

pub fn approve(stablecoin: &ContractBinding, spender: Address, amount: U256) -> ContractCall {
    ContractCall::new(
        Action::Approve,
        stablecoin,
        IStablecoin::approveCall { spender, amount },
    )
}

/// Testnet faucet.
pub fn mint(stablecoin: &ContractBinding, amount: U256) -> ContractCall {
    ContractCall::new(Action::Mint, stablecoin, IStablecoin::mintCall { amount })
}

// ─────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectFormError {
    #[error("Connect your wallet first")]
    WalletNotConnected,
    #[error("Please complete all required fields")]
    MissingField,
    #[error("Please upload the image before creating the project")]
    MissingImage,
    #[error("Amounts must be greater than 0")]
    NonPositiveAmount,
    #[error("Enter a valid address")]
    InvalidAddress,
}

/// Admin form for a new project. Amounts are whole stablecoin units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub symbol: String,
    /// Gateway URL of the uploaded image.
    pub url: String,
    pub soft_cap: u64,
    pub fraction: u64,
    pub repayment_time: u16,
    pub possible_return: u16,
}

impl NewProject {
    pub fn validate(&self) -> Result<(), ProjectFormError> {
        if self.name.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err(ProjectFormError::MissingField);
        }
        if self.url.trim().is_empty() {
            return Err(ProjectFormError::MissingImage);
        }
        if self.fraction == 0 || self.soft_cap == 0 {
            return Err(ProjectFormError::NonPositiveAmount);
        }
        Ok(())
    }
}

/// Placeholder KYC identity hash until a verification provider issues real
/// attestations.
pub fn kyc_identity_hash(owner: Address, issued_at_ms: i64) -> B256 {
    keccak256(format!("KYC_VERIFIED_{owner}_{issued_at_ms}"))
}

pub fn create_fraction(
    tokenizer: &ContractBinding,
    owner: Option<Address>,
    project: &NewProject,
    issued_at_ms: i64,
) -> Result<ContractCall, ProjectFormError> {
    let owner = owner.ok_or(ProjectFormError::WalletNotConnected)?;
    project.validate()?;

    let params = ITokenizer::CreationParams {
        owner,
        fraction: project.fraction,
        softCap: project.soft_cap,
        repaymentTime: project.repayment_time,
        possibleReturn: project.possible_return,
        user: kyc_identity_hash(owner, issued_at_ms),
        url: project.url.clone(),
        name: project.name.trim().to_string(),
        symbol: project.symbol.trim().to_string(),
    };
    Ok(ContractCall::new(
        Action::CreateFraction,
        tokenizer,
        ITokenizer::createFractionCall { params },
    ))
}

pub fn whitelist(
    tokenizer: &ContractBinding,
    investor: Address,
) -> Result<ContractCall, ProjectFormError> {
    if investor.is_zero() {
        return Err(ProjectFormError::InvalidAddress);
    }
    Ok(ContractCall::new(
        Action::Whitelist,
        tokenizer,
        ITokenizer::whiteListLimaCall { pk: investor },
    ))
}
