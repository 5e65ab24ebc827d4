//! # BrickFi client
//!
//! Client SDK for tokenized real-estate funding pools: investors buy
//! fractional shares of a construction project with a stablecoin, the
//! developer withdraws the raise and later repays principal plus a fixed
//! return, and investors claim (or get refunded if the softcap was missed).
//!
//! | Concern       | Module        |
//! |---------------|---------------|
//! | Bindings      | [`contracts`] |
//! | Amounts       | [`units`]     |
//! | Transport     | [`rpc`]       |
//! | Cached reads  | [`cache`], [`reads`] |
//! | Writes        | [`actions`], [`tracker`] |
//! | Invest flow   | [`invest`]    |
//! | Presentation  | [`view`]      |
//!
//! ## Architecture
//!
//! Every write is a [`ContractCall`] value; one [`TxTracker`] submits and
//! confirms any of them. Confirmation invalidates the shared [`ReadCache`],
//! so the next [`Reader`] call refetches from the chain. The chain and the
//! wallet are trait objects ([`ChainRpc`], [`Wallet`]) so tests run against
//! an in-memory mock.

pub mod actions;
pub mod cache;
pub mod contracts;
pub mod errors;
pub mod invest;
pub mod reads;
pub mod rpc;
pub mod tracker;
pub mod types;
pub mod units;
pub mod view;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

#[cfg(test)]
mod test_tracker;

pub use actions::{Action, ContractCall, NewProject, ProjectFormError};
pub use cache::ReadCache;
pub use contracts::{ContractBinding, Deployment};
pub use errors::{ClientError, Result, TxError};
pub use invest::{InvestError, InvestFlow, InvestStep};
pub use reads::Reader;
pub use rpc::{CallRequest, ChainRpc, HttpRpc, RpcConfig, RpcWallet, Wallet};
pub use tracker::{TrackerConfig, TxCallbacks, TxState, TxStatus, TxTracker};
pub use types::{Phase, Position, Project, TxReceipt};
pub use view::{ProjectFilter, ProjectView};
