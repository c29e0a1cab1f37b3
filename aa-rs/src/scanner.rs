use crate::calls::ArtifactDeployedFilter;
use crate::chain::{classify_error, ChainError};
use crate::outcome::parse_artifacts;
use crate::types::DeployedArtifact;
use ethers::contract::EthEvent;
use ethers::providers::Middleware;
use ethers::types::{Address, BlockNumber, Filter, Log, H256};
use std::cmp;
use std::time::Duration;

/// Smallest range we shrink to before giving up on a failing `eth_getLogs`.
const MIN_CHUNK: u64 = 10;

/// Inclusive `[from, to]` ranges of at most `chunk` blocks.
pub fn chunk_ranges(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.max(1);
    let mut out = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let end = cmp::min(cursor.saturating_add(chunk - 1), to);
        out.push((cursor, end));
        if end == u64::MAX {
            break;
        }
        cursor = end + 1;
    }
    out
}

/// Historical `ArtifactDeployed` logs from `deployer`, optionally only those whose
/// indexed owner is `owner`. `to = None` scans up to the current head.
pub async fn scan_artifacts<M: Middleware>(
    client: &M,
    deployer: Address,
    owner: Option<Address>,
    from: u64,
    to: Option<u64>,
    chunk: u64,
) -> Result<Vec<DeployedArtifact>, ChainError> {
    let target = match to {
        Some(to) => to,
        None => client
            .get_block_number()
            .await
            .map_err(classify_error)?
            .as_u64(),
    };
    if from > target {
        return Ok(Vec::new());
    }

    let mut chunk = chunk.max(1);
    tracing::info!(
        from,
        to = target,
        chunk,
        requests = chunk_ranges(from, target, chunk).len(),
        "scanning for ArtifactDeployed logs"
    );

    let mut found = Vec::new();
    let mut cursor = from;
    while cursor <= target {
        let end = cmp::min(cursor.saturating_add(chunk - 1), target);

        let logs = match fetch_logs_with_retries(client, deployer, owner, cursor, end).await {
            Ok(logs) => logs,
            Err(err) => {
                // Providers cap the range of a single getLogs; shrink and retry.
                if chunk <= MIN_CHUNK {
                    return Err(err);
                }
                chunk = cmp::max(MIN_CHUNK, chunk / 2);
                tracing::warn!(cursor, end, chunk, "log fetch failed; reducing chunk size and retrying");
                continue;
            }
        };

        found.extend(parse_artifacts(&logs, deployer));
        if end == u64::MAX {
            break;
        }
        cursor = end + 1;
    }

    tracing::info!(found = found.len(), last_scanned_block = target, "scan complete");
    Ok(found)
}

fn artifact_filter(deployer: Address, owner: Option<Address>, from: u64, to: u64) -> Filter {
    let filter = Filter::new()
        .address(deployer)
        .topic0(ArtifactDeployedFilter::signature())
        .from_block(BlockNumber::Number(from.into()))
        .to_block(BlockNumber::Number(to.into()));
    match owner {
        Some(owner) => filter.topic2(H256::from(owner)),
        None => filter,
    }
}

async fn fetch_logs_with_retries<M: Middleware>(
    client: &M,
    deployer: Address,
    owner: Option<Address>,
    from: u64,
    to: u64,
) -> Result<Vec<Log>, ChainError> {
    let filter = artifact_filter(deployer, owner, from, to);
    let mut delay = Duration::from_millis(200);

    let mut attempt = 1;
    loop {
        match client.get_logs(&filter).await {
            Ok(logs) => return Ok(logs),
            Err(err) if attempt >= 3 => return Err(classify_error(err)),
            Err(err) => {
                tracing::warn!(
                    attempt,
                    from,
                    to,
                    sleep_ms = delay.as_millis() as u64,
                    error = %err,
                    "getLogs failed; retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}
