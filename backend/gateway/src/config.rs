//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use brickfi_client::contracts::{
    DEFAULT_CHAIN_ID, DEFAULT_POOL, DEFAULT_STABLECOIN, DEFAULT_TOKENIZER,
};
use brickfi_client::{Deployment, ReadCache, RpcConfig};

use crate::errors::{GatewayError, Result};

const DEFAULT_ADMIN: &str = "0x567868827e302b7cA004D37e5F67C51f3e80A971";

#[derive(Debug, Clone)]
pub struct Config {
    /// EVM JSON-RPC endpoint
    pub rpc_url: String,
    pub chain_id: u64,
    pub pool_address: Address,
    /// Project factory
    pub tokenizer_address: Address,
    pub stablecoin_address: Address,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Pinata JWT. Uploads answer 500 when unset.
    pub pinata_jwt: Option<String>,
    pub pinata_endpoint: String,
    pub admin_addresses: Vec<Address>,
    /// Expected SIWE domain; any domain is accepted when unset.
    pub siwe_domain: Option<String>,
    pub session_ttl_secs: u64,
    pub max_upload_bytes: usize,
    /// Upper bound on factory indices scanned for the project list
    pub max_projects: usize,
    pub rpc_max_retries: u32,
    /// Max age of a cached contract read
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            rpc_url: var("RPC_URL", "https://rpc.testnet.soniclabs.com"),
            chain_id: parse("CHAIN_ID", &var("CHAIN_ID", &DEFAULT_CHAIN_ID.to_string()))?,
            pool_address: parse("POOL_ADDRESS", &var("POOL_ADDRESS", &DEFAULT_POOL.to_string()))?,
            tokenizer_address: parse(
                "TOKENIZER_ADDRESS",
                &var("TOKENIZER_ADDRESS", &DEFAULT_TOKENIZER.to_string()),
            )?,
            stablecoin_address: parse(
                "STABLECOIN_ADDRESS",
                &var("STABLECOIN_ADDRESS", &DEFAULT_STABLECOIN.to_string()),
            )?,
            database_url: var("DATABASE_URL", "sqlite:./brickfi_gateway.db"),
            api_port: parse("API_PORT", &var("API_PORT", "3001"))?,
            pinata_jwt: lookup("PINATA_JWT").filter(|v| !v.trim().is_empty()),
            pinata_endpoint: var(
                "PINATA_ENDPOINT",
                "https://api.pinata.cloud/pinning/pinFileToIPFS",
            ),
            admin_addresses: parse_addresses(&var("ADMIN_ADDRESSES", DEFAULT_ADMIN))?,
            siwe_domain: lookup("SIWE_DOMAIN").filter(|v| !v.trim().is_empty()),
            session_ttl_secs: parse("SESSION_TTL_SECS", &var("SESSION_TTL_SECS", "86400"))?,
            max_upload_bytes: parse("MAX_UPLOAD_BYTES", &var("MAX_UPLOAD_BYTES", "10485760"))?,
            max_projects: parse("MAX_PROJECTS", &var("MAX_PROJECTS", "50"))?,
            rpc_max_retries: parse("RPC_MAX_RETRIES", &var("RPC_MAX_RETRIES", "3"))?,
            cache_ttl_secs: parse("CACHE_TTL_SECS", &var("CACHE_TTL_SECS", "15"))?,
            cache_max_entries: parse("CACHE_MAX_ENTRIES", &var("CACHE_MAX_ENTRIES", "10000"))?,
        })
    }

    pub fn deployment(&self) -> Deployment {
        Deployment::new(
            self.chain_id,
            self.pool_address,
            self.tokenizer_address,
            self.stablecoin_address,
        )
    }

    pub fn read_cache(&self) -> ReadCache {
        ReadCache::with_limits(
            Duration::from_secs(self.cache_ttl_secs),
            self.cache_max_entries,
        )
    }

    pub fn rpc_config(&self) -> RpcConfig {
        let mut rpc = RpcConfig::new(self.rpc_url.clone(), self.chain_id);
        rpc.max_retries = self.rpc_max_retries;
        rpc
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("Invalid {key}")))
}

fn parse_addresses(csv: &str) -> Result<Vec<Address>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse("ADMIN_ADDRESSES", s))
        .collect()
}
