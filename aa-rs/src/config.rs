use crate::error::ConfigError;
use crate::types::{Contracts, DeploymentItem};
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub account: String,
    pub batch_deployer: String,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub contracts: Contracts,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    parse_deployment(&raw, rpc_override)
        .with_context(|| format!("invalid deployment json at {}", path.display()))
}

pub fn parse_deployment(json: &str, rpc_override: Option<String>) -> Result<Deployment> {
    let raw: DeploymentRaw = serde_json::from_str(json).context("failed to parse deployment json")?;

    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.as_deref() {
        env::var(env_var).unwrap_or_else(|_| raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let contracts = Contracts {
        entry_point: parse_addr(&raw.entry_point).context("invalid entryPoint address")?,
        account: parse_addr(&raw.account).context("invalid account address")?,
        batch_deployer: parse_addr(&raw.batch_deployer).context("invalid batchDeployer address")?,
    };

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        contracts,
    })
}

/// Batch files carry supplies as JSON numbers or decimal strings (for values past 2^53).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SupplyRaw {
    Number(u64),
    Decimal(String),
}

#[derive(Debug, Clone, Deserialize)]
struct DeploymentItemRaw {
    name: String,
    symbol: String,
    supply: SupplyRaw,
}

pub fn load_batch(path: &Path) -> Result<Vec<DeploymentItem>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read batch json at {}", path.display()))?;
    parse_batch(&raw).with_context(|| format!("invalid batch json at {}", path.display()))
}

pub fn parse_batch(json: &str) -> Result<Vec<DeploymentItem>> {
    let raw: Vec<DeploymentItemRaw> = serde_json::from_str(json).context("failed to parse batch json")?;
    if raw.is_empty() {
        return Err(ConfigError::EmptyBatch.into());
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, item)| parse_item(i, item))
        .collect()
}

fn parse_item(index: usize, item: DeploymentItemRaw) -> Result<DeploymentItem> {
    let supply = match item.supply {
        SupplyRaw::Number(n) => U256::from(n),
        SupplyRaw::Decimal(s) => U256::from_dec_str(s.trim())
            .map_err(|e| anyhow!("item {index}: invalid supply {s:?}: {e}"))?,
    };
    Ok(DeploymentItem::new(item.name, item.symbol, supply))
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
