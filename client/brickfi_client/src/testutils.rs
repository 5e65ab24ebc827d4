//! In-memory chain and wallet for tests.
//!
//! Reads are answered from scripted `(target, calldata) -> result` entries.
//! Sent transactions get a deterministic hash and, depending on
//! [`ReceiptMode`], a successful receipt, a reverted one, or none at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Address, Bytes, TxHash, B256, U256, U64};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::actions::ContractCall;
use crate::contracts::IPool;
use crate::errors::{ClientError, Result};
use crate::rpc::{CallRequest, ChainRpc, RpcFault, Wallet};
use crate::types::{Project, TxReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Succeed,
    Revert,
    /// Never included; confirmation times out.
    Never,
}

type Key = (Address, Bytes);

pub struct MockChain {
    reads: Mutex<HashMap<Key, std::result::Result<Bytes, RpcFault>>>,
    receipts: Mutex<HashMap<TxHash, TxReceipt>>,
    account: Mutex<Option<Address>>,
    sent: Mutex<Vec<ContractCall>>,
    receipt_mode: Mutex<ReceiptMode>,
    simulation_fault: Mutex<Option<String>>,
    send_fault: Mutex<Option<RpcFault>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    single_calls: AtomicUsize,
    batches: AtomicUsize,
    keys_fetched: AtomicUsize,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            reads: Mutex::default(),
            receipts: Mutex::default(),
            account: Mutex::default(),
            sent: Mutex::default(),
            receipt_mode: Mutex::new(ReceiptMode::Succeed),
            simulation_fault: Mutex::default(),
            send_fault: Mutex::default(),
            gate: Mutex::default(),
            single_calls: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            keys_fetched: AtomicUsize::new(0),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected(account: Address) -> Arc<Self> {
        let mock = Self::default();
        *lock(&mock.account) = Some(account);
        Arc::new(mock)
    }

    // ── scripting ──────────────────────────────────────────

    pub fn set_account(&self, account: Option<Address>) {
        *lock(&self.account) = account;
    }

    /// Answer `call` on `to` with raw return data.
    pub fn respond<C: SolCall>(&self, to: Address, call: C, output: Vec<u8>) {
        lock(&self.reads).insert((to, call.abi_encode().into()), Ok(output.into()));
    }

    /// Make `call` on `to` revert.
    pub fn revert<C: SolCall>(&self, to: Address, call: C, message: &str) {
        lock(&self.reads).insert(
            (to, call.abi_encode().into()),
            Err(RpcFault {
                code: 3,
                message: format!("execution reverted: {message}"),
            }),
        );
    }

    /// Script every getter of a pool from `project`.
    pub fn set_project(&self, project: &Project) {
        let pool = project.address;
        self.respond(pool, IPool::ownerCall {}, word_address(project.owner));
        self.respond(pool, IPool::nameCall {}, string(&project.name));
        self.respond(pool, IPool::totalFractionsCall {}, word(project.total_fractions));
        self.respond(pool, IPool::softCapAmountCall {}, word(project.soft_cap));
        self.respond(pool, IPool::startTimeCall {}, word(U256::from(project.start_time)));
        self.respond(
            pool,
            IPool::buyingPeriodEndCall {},
            word(U256::from(project.buying_period_end)),
        );
        self.respond(
            pool,
            IPool::maxRepaymentTimeCall {},
            word(U256::from(project.max_repayment_time)),
        );
        self.respond(
            pool,
            IPool::possibleReturnCall {},
            word(U256::from(project.possible_return)),
        );
        self.respond(pool, IPool::urlCall {}, string(&project.url));
        self.respond(pool, IPool::userCall {}, word_b256(project.kyc_hash));
        self.respond(pool, IPool::totalSoldCall {}, word(project.total_sold));
        self.respond(pool, IPool::totalReInvestedCall {}, word(project.total_reinvested));
        self.respond(
            pool,
            IPool::actualRepaymentTimeCall {},
            word(U256::from(project.actual_repayment_time)),
        );
        self.respond(
            pool,
            IPool::getCurrentPhaseCall {},
            word(U256::from(project.phase.code())),
        );
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        *lock(&self.receipt_mode) = mode;
    }

    /// Make the pre-send dry run revert with `message`.
    pub fn fail_simulation(&self, message: Option<&str>) {
        *lock(&self.simulation_fault) = message.map(str::to_string);
    }

    /// Make the wallet refuse to send.
    pub fn fail_send(&self, fault: Option<RpcFault>) {
        *lock(&self.send_fault) = fault;
    }

    /// Block every send until [`MockChain::release_sends`].
    pub fn hold_sends(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_sends(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    // ── inspection ─────────────────────────────────────────

    pub fn sent(&self) -> Vec<ContractCall> {
        lock(&self.sent).clone()
    }

    pub fn send_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Single `eth_call`s, simulations included.
    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Reads carried by all batches so far.
    pub fn keys_fetched(&self) -> usize {
        self.keys_fetched.load(Ordering::SeqCst)
    }

    /// Any network traffic at all.
    pub fn network_calls(&self) -> usize {
        self.single_calls() + self.batches() + self.send_count()
    }

    fn answer(&self, request: &CallRequest) -> std::result::Result<Bytes, RpcFault> {
        lock(&self.reads)
            .get(&(request.to, request.input.clone()))
            .cloned()
            .unwrap_or_else(|| {
                Err(RpcFault {
                    code: 3,
                    message: "execution reverted".to_string(),
                })
            })
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if request.from.is_some() {
            return match lock(&self.simulation_fault).clone() {
                Some(message) => Err(ClientError::Rpc {
                    code: 3,
                    message: format!("execution reverted: {message}"),
                }),
                None => Ok(Bytes::new()),
            };
        }
        self.answer(request).map_err(ClientError::from)
    }

    async fn call_batch(
        &self,
        requests: &[CallRequest],
    ) -> Result<Vec<std::result::Result<Bytes, RpcFault>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.keys_fetched.fetch_add(requests.len(), Ordering::SeqCst);
        Ok(requests.iter().map(|r| self.answer(r)).collect())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        Ok(lock(&self.receipts).get(&hash).cloned())
    }
}

#[async_trait]
impl Wallet for MockChain {
    fn account(&self) -> Option<Address> {
        *lock(&self.account)
    }

    async fn send_transaction(&self, call: &ContractCall) -> Result<TxHash> {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| ClientError::Malformed(e.to_string()))?;
        }
        if let Some(fault) = lock(&self.send_fault).clone() {
            return Err(fault.into());
        }

        let nonce = {
            let mut sent = lock(&self.sent);
            sent.push(call.clone());
            sent.len() as u64
        };
        let hash = keccak256(nonce.to_be_bytes());

        let status = match *lock(&self.receipt_mode) {
            ReceiptMode::Succeed => 1u64,
            ReceiptMode::Revert => 0u64,
            ReceiptMode::Never => return Ok(hash),
        };
        lock(&self.receipts).insert(
            hash,
            TxReceipt {
                transaction_hash: hash,
                block_number: U64::from(nonce),
                status: U64::from(status),
                gas_used: U64::from(21_000u64),
                logs: Vec::new(),
            },
        );
        Ok(hash)
    }
}

// ── return-data encoders ───────────────────────────────────

pub fn word(value: U256) -> Vec<u8> {
    value.abi_encode()
}

pub fn word_address(value: Address) -> Vec<u8> {
    value.abi_encode()
}

pub fn word_b256(value: B256) -> Vec<u8> {
    value.abi_encode()
}

pub fn word_bool(value: bool) -> Vec<u8> {
    value.abi_encode()
}

/// Single dynamic `string` return.
pub fn string(value: &str) -> Vec<u8> {
    (value.to_string(),).abi_encode_params()
}
