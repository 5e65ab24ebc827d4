//! # Types
//!
//! Read-only projections of on-chain state. Nothing here is ever written
//! back; the pool contract owns the truth and these records are rebuilt on
//! every (uncached) read.
//!
//! ## Phase as a forward-only lifecycle
//!
//! ```text
//! Buying ──► SoftcapReached ──► WaitingRepayment ──► ClaimReady
//!    └──────────────────────────────────────────────► RefundAvailable
//! ```
//!
//! The contract enforces the ordering; [`Phase::can_follow`] only lets a
//! consumer sanity-check two successive snapshots.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

/// Lifecycle stage reported by `getCurrentPhase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Shares on sale.
    Buying = 0,
    /// Softcap reached; sale continues and the owner may withdraw.
    SoftcapReached = 1,
    /// Waiting for the owner to return principal plus profit.
    WaitingRepayment = 2,
    /// Investors can claim principal plus profit.
    ClaimReady = 3,
    /// Buying period ended below softcap; investors can withdraw.
    RefundAvailable = 4,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Buying,
        Phase::SoftcapReached,
        Phase::WaitingRepayment,
        Phase::ClaimReady,
        Phase::RefundAvailable,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Buying),
            1 => Some(Self::SoftcapReached),
            2 => Some(Self::WaitingRepayment),
            3 => Some(Self::ClaimReady),
            4 => Some(Self::RefundAvailable),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// `true` if `self` is a legal successor (or the same phase) of `previous`.
    pub fn can_follow(self, previous: Phase) -> bool {
        use Phase::*;
        match (previous, self) {
            (a, b) if a == b => true,
            (Buying, SoftcapReached | RefundAvailable) => true,
            (SoftcapReached, WaitingRepayment) => true,
            (WaitingRepayment, ClaimReady) => true,
            _ => false,
        }
    }

    /// Project still under construction: funds raised, repayment pending.
    pub fn is_construction(self) -> bool {
        matches!(self, Phase::SoftcapReached | Phase::WaitingRepayment)
    }
}

impl TryFrom<u8> for Phase {
    type Error = ClientError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Phase::from_code(code).ok_or(ClientError::UnknownPhase(code))
    }
}

/// Cached projection of a pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Pool contract address.
    pub address: Address,
    pub owner: Address,
    pub name: String,
    /// Fundraising target, base units.
    pub total_fractions: U256,
    pub soft_cap: U256,
    /// Unix seconds.
    pub start_time: u64,
    pub buying_period_end: u64,
    pub max_repayment_time: u64,
    /// Expected return, whole percent.
    pub possible_return: u16,
    /// External info / image URL.
    pub url: String,
    /// KYC identity hash of the developer.
    pub kyc_hash: B256,
    pub total_sold: U256,
    pub total_reinvested: U256,
    /// Zero until the owner repays.
    pub actual_repayment_time: u64,
    pub phase: Phase,
}

/// One log entry of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

/// Confirmation record of an included transaction, as returned by
/// `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: U64,
    /// `1` on success, `0` on revert.
    pub status: U64,
    #[serde(default)]
    pub gas_used: U64,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == U64::from(1u64)
    }
}

/// An investor's holding in one project, derived from ledger reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub project: Address,
    pub holder: Address,
    /// Fraction tokens held (one token per stablecoin unit invested).
    pub tokens_owned: U256,
    /// Stablecoin invested, base units.
    pub invested: U256,
    /// Principal plus the advertised return, base units.
    pub projected_value: U256,
    pub can_claim: bool,
    pub can_refund: bool,
}
