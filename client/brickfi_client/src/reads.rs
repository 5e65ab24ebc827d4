//! Contract reads, served from the [`ReadCache`] when fresh and batched into
//! a single JSON-RPC round trip when not.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use tracing::{debug, warn};

use crate::cache::ReadCache;
use crate::contracts::{Deployment, IPool, IStablecoin, ITokenizer};
use crate::errors::{ClientError, Result};
use crate::rpc::{CallRequest, ChainRpc, RpcFault};
use crate::types::{Phase, Position, Project};
use crate::view;

type Slot = std::result::Result<Bytes, RpcFault>;

pub struct Reader {
    rpc: Arc<dyn ChainRpc>,
    cache: ReadCache,
    deployment: Deployment,
}

impl Reader {
    pub fn new(rpc: Arc<dyn ChainRpc>, cache: ReadCache, deployment: Deployment) -> Self {
        Self {
            rpc,
            cache,
            deployment,
        }
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Resolve every key, fetching only stale or missing ones, in one batch.
    async fn read_many(&self, keys: &[CallRequest]) -> Result<Vec<Slot>> {
        let mut slots: Vec<Option<Slot>> = Vec::with_capacity(keys.len());
        let mut misses = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match self.cache.get_fresh(key).await {
                Some(hit) => slots.push(Some(Ok(hit))),
                None => {
                    slots.push(None);
                    misses.push(i);
                }
            }
        }

        if !misses.is_empty() {
            let generation = self.cache.generation();
            let requests: Vec<CallRequest> = misses.iter().map(|&i| keys[i].clone()).collect();
            let fetched = self.rpc.call_batch(&requests).await?;
            if fetched.len() != requests.len() {
                return Err(ClientError::Malformed(format!(
                    "batch of {} answered with {} results",
                    requests.len(),
                    fetched.len()
                )));
            }
            debug!("Fetched {} of {} reads", misses.len(), keys.len());

            for (&i, slot) in misses.iter().zip(fetched) {
                if let Ok(bytes) = &slot {
                    self.cache
                        .insert(keys[i].clone(), bytes.clone(), generation)
                        .await;
                }
                slots[i] = Some(slot);
            }
        }

        slots
            .into_iter()
            .map(|s| s.ok_or_else(|| ClientError::Malformed("unresolved read".to_string())))
            .collect()
    }

    async fn read_one<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return> {
        let key = CallRequest::read(to, call.abi_encode());
        let slot = self
            .read_many(std::slice::from_ref(&key))
            .await?
            .pop()
            .ok_or_else(|| ClientError::Malformed("empty read".to_string()))?;
        let bytes = slot?;
        Ok(C::abi_decode_returns(&bytes)?)
    }

    /// Full projection of one pool, or `None` unless every field resolved.
    pub async fn project(&self, pool: Address) -> Result<Option<Project>> {
        let keys = [
            CallRequest::read(pool, IPool::ownerCall {}.abi_encode()),
            CallRequest::read(pool, IPool::nameCall {}.abi_encode()),
            CallRequest::read(pool, IPool::totalFractionsCall {}.abi_encode()),
            CallRequest::read(pool, IPool::softCapAmountCall {}.abi_encode()),
            CallRequest::read(pool, IPool::startTimeCall {}.abi_encode()),
            CallRequest::read(pool, IPool::buyingPeriodEndCall {}.abi_encode()),
            CallRequest::read(pool, IPool::maxRepaymentTimeCall {}.abi_encode()),
            CallRequest::read(pool, IPool::possibleReturnCall {}.abi_encode()),
            CallRequest::read(pool, IPool::urlCall {}.abi_encode()),
            CallRequest::read(pool, IPool::userCall {}.abi_encode()),
            CallRequest::read(pool, IPool::totalSoldCall {}.abi_encode()),
            CallRequest::read(pool, IPool::totalReInvestedCall {}.abi_encode()),
            CallRequest::read(pool, IPool::actualRepaymentTimeCall {}.abi_encode()),
            CallRequest::read(pool, IPool::getCurrentPhaseCall {}.abi_encode()),
        ];
        let slots = self.read_many(&keys).await?;

        let project = assemble_project(pool, &slots);
        if project.is_none() {
            warn!("Project {pool} could not be fully read");
        }
        Ok(project)
    }

    pub async fn stablecoin_balance(&self, holder: Address) -> Result<U256> {
        self.read_one(
            self.deployment.stablecoin.address,
            IStablecoin::balanceOfCall { account: holder },
        )
        .await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        self.read_one(
            self.deployment.stablecoin.address,
            IStablecoin::allowanceCall { owner, spender },
        )
        .await
    }

    /// Fraction tokens `holder` owns in `pool`.
    pub async fn fraction_balance(&self, pool: Address, holder: Address) -> Result<U256> {
        self.read_one(pool, IPool::balanceOfCall { account: holder })
            .await
    }

    pub async fn is_whitelisted(&self, account: Address) -> Result<bool> {
        self.read_one(
            self.deployment.tokenizer.address,
            ITokenizer::whiteListedCall { account },
        )
        .await
    }

    /// Pool created at factory `index`, or `None` past the end.
    pub async fn created_instance(&self, index: u128) -> Result<Option<Address>> {
        let slots = self
            .read_many(&[instance_key(self.deployment.tokenizer.address, index)])
            .await?;
        Ok(slots.first().and_then(decode_instance))
    }

    /// Walk the factory index from 0 in one batch of `max` reads, stopping at
    /// the first zero address or revert.
    pub async fn list_instances(&self, max: usize) -> Result<Vec<Address>> {
        let factory = self.deployment.tokenizer.address;
        let keys: Vec<CallRequest> = (0..max as u128).map(|i| instance_key(factory, i)).collect();
        let slots = self.read_many(&keys).await?;
        Ok(slots.iter().map_while(decode_instance).collect())
    }

    pub async fn position(&self, pool: Address, holder: Address) -> Result<Option<Position>> {
        let Some(project) = self.project(pool).await? else {
            return Ok(None);
        };
        let tokens = self.fraction_balance(pool, holder).await?;
        Ok(Some(view::position(&project, holder, tokens)))
    }
}

fn instance_key(factory: Address, index: u128) -> CallRequest {
    CallRequest::read(factory, ITokenizer::createdInstancesCall { index }.abi_encode())
}

fn decode_instance(slot: &Slot) -> Option<Address> {
    decode::<ITokenizer::createdInstancesCall>(slot).filter(|a| !a.is_zero())
}

fn decode<C: SolCall>(slot: &Slot) -> Option<C::Return> {
    slot.as_ref()
        .ok()
        .and_then(|bytes| C::abi_decode_returns(bytes).ok())
}

fn timestamp(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Build a [`Project`] only if every slot decoded.
fn assemble_project(pool: Address, slots: &[Slot]) -> Option<Project> {
    if slots.len() != 14 {
        return None;
    }
    let phase_code = decode::<IPool::getCurrentPhaseCall>(&slots[13])?;
    Some(Project {
        address: pool,
        owner: decode::<IPool::ownerCall>(&slots[0])?,
        name: decode::<IPool::nameCall>(&slots[1])?,
        total_fractions: decode::<IPool::totalFractionsCall>(&slots[2])?,
        soft_cap: decode::<IPool::softCapAmountCall>(&slots[3])?,
        start_time: timestamp(decode::<IPool::startTimeCall>(&slots[4])?),
        buying_period_end: timestamp(decode::<IPool::buyingPeriodEndCall>(&slots[5])?),
        max_repayment_time: timestamp(decode::<IPool::maxRepaymentTimeCall>(&slots[6])?),
        possible_return: decode::<IPool::possibleReturnCall>(&slots[7])?,
        url: decode::<IPool::urlCall>(&slots[8])?,
        kyc_hash: decode::<IPool::userCall>(&slots[9])?,
        total_sold: decode::<IPool::totalSoldCall>(&slots[10])?,
        total_reinvested: decode::<IPool::totalReInvestedCall>(&slots[11])?,
        actual_repayment_time: timestamp(decode::<IPool::actualRepaymentTimeCall>(&slots[12])?),
        phase: Phase::from_code(phase_code)?,
    })
}
