//! Contract bindings: ABI declarations plus the static `{address, chain}`
//! description of every contract the platform talks to.
//!
//! The pool contract is deployed once per project by the factory
//! ("tokenizer"); the stablecoin is a mintable ERC-20 on testnet.

use alloy_primitives::{address, Address};
use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol! {
    /// A single tokenized project.
    interface IPool {
        function owner() external view returns (address);
        function name() external view returns (string);
        function totalFractions() external view returns (uint256);
        function softCapAmount() external view returns (uint256);
        function startTime() external view returns (uint256);
        function buyingPeriodEnd() external view returns (uint256);
        function maxRepaymentTime() external view returns (uint256);
        function possibleReturn() external view returns (uint16);
        function url() external view returns (string);
        function user() external view returns (bytes32);
        function totalSold() external view returns (uint256);
        function totalReInvested() external view returns (uint256);
        function actualRepaymentTime() external view returns (uint256);
        function getCurrentPhase() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);

        function buyShares(uint256 amount) external;
        function claimReturns() external;
        function withdrawRaisedFunds() external;
        function returnFunds(uint256 amount) external;
        function withdrawFailedRaise() external;
        function deusExMachina_finishBuyingTime() external;
    }

    /// Project factory.
    interface ITokenizer {
        struct CreationParams {
            address owner;
            uint64 fraction;
            uint64 softCap;
            uint16 repaymentTime;
            uint16 possibleReturn;
            bytes32 user;
            string url;
            string name;
            string symbol;
        }

        function createFraction(CreationParams params) external payable returns (address instance);
        function createdInstances(uint128 index) external view returns (address);
        function whiteListLima(address pk) external payable;
        function whiteListed(address account) external view returns (bool);
    }

    /// Investment stablecoin (ERC-20 with an open test mint).
    interface IStablecoin {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function mint(uint256 amount) external;
        function decimals() external view returns (uint8);
    }
}

/// Sonic testnet.
pub const DEFAULT_CHAIN_ID: u64 = 64_165;

pub const DEFAULT_POOL: Address = address!("0748cA7E2Cb2Ba6f02AbBc24f903b61268CF095C");
pub const DEFAULT_TOKENIZER: Address = address!("56C4F99Eead221C6C281058718a7004bF0726A34");
pub const DEFAULT_STABLECOIN: Address = address!("40C5983fdEf22303cE096Aca89106a1447EcdCAb");

/// Decimal exponent of the stablecoin and of every monetary field on a pool.
pub const STABLECOIN_DECIMALS: u8 = 18;

/// Address and network of one deployed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBinding {
    pub address: Address,
    pub chain_id: u64,
}

impl ContractBinding {
    pub const fn new(address: Address, chain_id: u64) -> Self {
        Self { address, chain_id }
    }

    /// Same network, different instance. Pools share one ABI but every
    /// project lives at its own address.
    pub const fn at(&self, address: Address) -> Self {
        Self {
            address,
            chain_id: self.chain_id,
        }
    }
}

/// The full set of contracts for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub chain_id: u64,
    /// Reference pool, used when no explicit project address is given.
    pub pool: ContractBinding,
    pub tokenizer: ContractBinding,
    pub stablecoin: ContractBinding,
    pub stablecoin_decimals: u8,
}

impl Deployment {
    pub fn new(chain_id: u64, pool: Address, tokenizer: Address, stablecoin: Address) -> Self {
        Self {
            chain_id,
            pool: ContractBinding::new(pool, chain_id),
            tokenizer: ContractBinding::new(tokenizer, chain_id),
            stablecoin: ContractBinding::new(stablecoin, chain_id),
            stablecoin_decimals: STABLECOIN_DECIMALS,
        }
    }

    pub fn pool_at(&self, address: Address) -> ContractBinding {
        self.pool.at(address)
    }
}

impl Default for Deployment {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHAIN_ID,
            DEFAULT_POOL,
            DEFAULT_TOKENIZER,
            DEFAULT_STABLECOIN,
        )
    }
}
