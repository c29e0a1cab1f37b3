use anyhow::{anyhow, Context, Result};
use batch_userop::builder::prefund_required;
use batch_userop::chain::{ChainProvider, EthersChain};
use batch_userop::config::{load_batch, load_deployment, Deployment};
use batch_userop::eip712::{verify_domain, Domain};
use batch_userop::encoding::{self, fmt_address, fmt_h256, fmt_u256, parse_u256_quantity};
use batch_userop::entrypoint::{account_owner, EntryPoint};
use batch_userop::preflight::check_nonce_key;
use batch_userop::scanner::scan_artifacts;
use batch_userop::{run_attempt, AttemptConfig, AttemptReport, ConfigError, GasConfig};
use clap::{Args, Parser, Subcommand};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::middleware::SignerMiddleware;
use ethers::types::{Address, U256};
use ethers::utils::{format_ether, parse_ether};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// With --json, stdout carries exactly one JSON document and everything else goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

type SigningClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Parser, Debug)]
#[command(name = "batch-userop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show contracts, account owner, deposit, nonce and the EIP-712 domain check.
    Status(StatusArgs),

    /// Add ETH to the account's deposit at the EntryPoint (pays for its UserOperations).
    Deposit(DepositArgs),

    /// Sign one UserOperation that deploys every item of a batch file, and submit it.
    Submit(SubmitArgs),

    /// List artifacts previously deployed through the batch deployer.
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (chainId + entryPoint/account/batchDeployer).
    #[arg(long, default_value = "deployments/local.json", env = "BATCH_USEROP_DEPLOYMENT")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "BATCH_USEROP_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key. Also signs and pays for the handleOps transaction.
    ///
    /// Recommended: set via env var BATCH_USEROP_OWNER_PRIVATE_KEY.
    #[arg(long, env = "BATCH_USEROP_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Print a single JSON object to stdout. All other output is written to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Provider polling interval in milliseconds.
    #[arg(long, default_value_t = 350, env = "BATCH_USEROP_POLL_MS")]
    poll_ms: u64,
}

/// Operator supplied gas values. Nothing is estimated.
#[derive(Args, Debug)]
struct GasArgs {
    #[arg(long, default_value_t = 2_000_000, env = "BATCH_USEROP_CALL_GAS_LIMIT")]
    call_gas_limit: u128,

    #[arg(long, default_value_t = 1_000_000, env = "BATCH_USEROP_VERIFICATION_GAS_LIMIT")]
    verification_gas_limit: u128,

    #[arg(long, default_value_t = 80_000, env = "BATCH_USEROP_PRE_VERIFICATION_GAS")]
    pre_verification_gas: u128,

    /// Wei.
    #[arg(long, default_value_t = 1_000_000_000, env = "BATCH_USEROP_MAX_PRIORITY_FEE_PER_GAS")]
    max_priority_fee_per_gas: u128,

    /// Wei.
    #[arg(long, default_value_t = 2_000_000_000, env = "BATCH_USEROP_MAX_FEE_PER_GAS")]
    max_fee_per_gas: u128,
}

impl From<&GasArgs> for GasConfig {
    fn from(args: &GasArgs) -> Self {
        Self {
            call_gas_limit: U256::from(args.call_gas_limit),
            verification_gas_limit: U256::from(args.verification_gas_limit),
            pre_verification_gas: U256::from(args.pre_verification_gas),
            max_priority_fee_per_gas: U256::from(args.max_priority_fee_per_gas),
            max_fee_per_gas: U256::from(args.max_fee_per_gas),
        }
    }
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DepositArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Amount in ETH (decimal string).
    #[arg(long)]
    amount_eth: String,

    /// Max seconds to wait for the receipt. Use 0 to disable timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    gas: GasArgs,

    /// JSON array of `{ name, symbol, supply }`.
    #[arg(long, default_value = "batches/sample.json", env = "BATCH_USEROP_BATCH")]
    batch: PathBuf,

    /// EntryPoint nonce key as a hex quantity. Each key has its own sequence.
    #[arg(long, default_value = "0x0", env = "BATCH_USEROP_NONCE_KEY")]
    nonce_key: String,

    /// Fee refund recipient (defaults to the transaction sender).
    #[arg(long, env = "BATCH_USEROP_BENEFICIARY")]
    beneficiary: Option<String>,

    /// Build, sign and simulate; do not send.
    #[arg(long)]
    dry_run: bool,

    /// Skip the EntryPoint.getUserOpHash cross-check before signing.
    #[arg(long)]
    no_verify_hash: bool,

    /// Max seconds to wait for the handleOps receipt. Use 0 to disable timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,

    /// Blocks (including the inclusion block) before a receipt is accepted.
    #[arg(long, default_value_t = 1, env = "BATCH_USEROP_CONFIRMATIONS")]
    confirmations: u64,
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Only artifacts owned by this address (defaults to the deployment's account).
    #[arg(long)]
    owner: Option<String>,

    #[arg(long, default_value_t = 0)]
    from_block: u64,

    /// Defaults to the latest block.
    #[arg(long)]
    to_block: Option<u64>,

    /// Max blocks per eth_getLogs request.
    #[arg(long, default_value_t = 2_000, env = "BATCH_USEROP_LOG_CHUNK_SIZE")]
    chunk: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Status(args) => cmd_status(args).await,
        Command::Deposit(args) => cmd_deposit(args).await,
        Command::Submit(args) => cmd_submit(args).await,
        Command::Scan(args) => cmd_scan(args).await,
    }
}

async fn cmd_status(args: StatusArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, provider) = connect(&args.common).await?;
    let contracts = dep.contracts;

    let signer = match args.common.owner_private_key.as_deref() {
        Some(pk) => Some(load_owner(pk, dep.chain_id)?.address()),
        None => None,
    };
    let chain = EthersChain::new(Arc::new(provider), signer.unwrap_or_default());
    let entry_point = EntryPoint::new(&chain, contracts.entry_point);

    let mut code = Vec::new();
    for (role, address) in [
        ("entryPoint", contracts.entry_point),
        ("account", contracts.account),
        ("batchDeployer", contracts.batch_deployer),
    ] {
        let present = !chain.code_at(address).await?.as_ref().is_empty();
        code.push((role, address, present));
    }

    let owner = account_owner(&chain, contracts.account).await.ok();
    let deposit = entry_point.balance_of(contracts.account).await?;
    let nonce = entry_point.get_nonce(contracts.account, U256::zero()).await?;
    let prefund = prefund_required(&GasConfig::default());

    let domain = Domain::new(dep.chain_id, contracts.entry_point);
    let domain_check = match (
        entry_point.domain_separator().await,
        entry_point.packed_user_op_type_hash().await,
    ) {
        (Ok(sep), Ok(type_hash)) => match verify_domain(&domain, sep, type_hash) {
            Ok(()) => "ok".to_string(),
            Err(err) => err.to_string(),
        },
        _ => "unavailable (entry point does not expose it)".to_string(),
    };

    if machine_mode {
        let out = serde_json::json!({
            "chainId": dep.chain_id,
            "entryPoint": fmt_address(contracts.entry_point),
            "account": fmt_address(contracts.account),
            "batchDeployer": fmt_address(contracts.batch_deployer),
            "code": code.iter().map(|(role, _, present)| (role.to_string(), serde_json::Value::Bool(*present))).collect::<serde_json::Map<_, _>>(),
            "owner": owner.map(fmt_address),
            "signer": signer.map(fmt_address),
            "deposit": fmt_u256(deposit),
            "nonce": fmt_u256(nonce),
            "domainSeparator": fmt_h256(domain.separator()),
            "domainCheck": domain_check,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:          {}", dep.chain_id);
    for (role, address, present) in &code {
        outln!(
            machine_mode,
            "{:<17} {:?} ({})",
            format!("{role}:"),
            address,
            if *present { "code present" } else { "NO CODE" }
        );
    }
    match owner {
        Some(owner) => outln!(machine_mode, "owner:            {:?}", owner),
        None => outln!(machine_mode, "owner:            (owner() call failed)"),
    }
    if let Some(signer) = signer {
        outln!(
            machine_mode,
            "signer:           {:?} (matches owner: {})",
            signer,
            owner == Some(signer)
        );
    }
    outln!(machine_mode, "deposit:          {} ETH", format_ether(deposit));
    if let Some(prefund) = prefund {
        outln!(machine_mode, "prefund (default gas): {} ETH", format_ether(prefund));
    }
    outln!(machine_mode, "nonce (key 0):    {}", nonce);
    outln!(machine_mode, "eip712 domain:    {}", domain_check);

    Ok(())
}

async fn cmd_deposit(args: DepositArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, chain) = connect_signer(&args.common, 1).await?;
    let contracts = dep.contracts;

    let amount = parse_ether(args.amount_eth.clone())
        .map_err(|e| anyhow!("invalid --amount-eth {:?}: {e}", args.amount_eth))?;
    let entry_point = EntryPoint::new(&chain, contracts.entry_point);

    outln!(
        machine_mode,
        "depositing {} ETH for {:?} at {:?}",
        format_ether(amount),
        contracts.account,
        contracts.entry_point
    );
    let tx_hash = entry_point
        .deposit_to(contracts.account, amount)
        .await
        .context("depositTo failed")?;
    outln!(machine_mode, "tx: {:?}", tx_hash);

    let receipt = chain
        .await_receipt(tx_hash, Duration::from_secs(args.max_wait_seconds))
        .await?
        .ok_or_else(|| anyhow!("timed out waiting for depositTo receipt {:?}", tx_hash))?;
    if receipt.status != Some(1u64.into()) {
        return Err(anyhow!("depositTo reverted (tx {:?})", tx_hash));
    }

    let deposit = entry_point.balance_of(contracts.account).await?;
    if machine_mode {
        let out = serde_json::json!({
            "txHash": fmt_h256(tx_hash),
            "deposit": fmt_u256(deposit),
        });
        println!("{}", out);
    }
    outln!(machine_mode, "deposit now: {} ETH", format_ether(deposit));
    Ok(())
}

async fn cmd_submit(args: SubmitArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let items = load_batch(&args.batch)?;
    let nonce_key = parse_u256_quantity(&args.nonce_key).context("invalid --nonce-key")?;
    check_nonce_key(nonce_key)?;

    let (dep, chain) = connect_signer(&args.common, args.confirmations).await?;
    let wallet = chain.client().signer().clone();

    let mut cfg = AttemptConfig::new(dep.contracts);
    cfg.gas = GasConfig::from(&args.gas);
    cfg.nonce_key = nonce_key;
    cfg.beneficiary = args
        .beneficiary
        .as_deref()
        .map(|b| Address::from_str(b).context("invalid --beneficiary address"))
        .transpose()?;
    cfg.receipt_timeout = Duration::from_secs(args.max_wait_seconds);
    cfg.verify_hash = !args.no_verify_hash;
    cfg.dry_run = args.dry_run;

    outln!(machine_mode, "account:   {:?}", dep.contracts.account);
    outln!(machine_mode, "signer:    {:?}", wallet.address());
    outln!(machine_mode, "batch:     {} item(s) from {}", items.len(), args.batch.display());
    for (i, item) in items.iter().enumerate() {
        outln!(machine_mode, "  [{i}] {} ({}) supply {}", item.name, item.symbol, item.supply);
    }

    let report = match run_attempt(&chain, &wallet, &cfg, &items).await {
        Ok(report) => report,
        Err(err) => {
            if err.is_indeterminate() {
                tracing::error!(
                    error = %err,
                    "the handleOps transaction may have been broadcast; check the account nonce before submitting again"
                );
            }
            return Err(err.into());
        }
    };

    if machine_mode {
        println!("{}", report_to_json(&report));
    }

    outln!(machine_mode, "userOpHash: {:?}", report.digest());
    outln!(machine_mode, "nonce:      {}", report.nonce_before);
    if args.dry_run {
        outln!(machine_mode, "dry run: simulation passed; nothing sent");
        return Ok(());
    }
    if let Some(tx) = report.tx_hash {
        outln!(machine_mode, "tx:         {:?}", tx);
    }
    if let Some(gas_used) = report.gas_used {
        outln!(machine_mode, "gasUsed:    {}", gas_used);
    }
    if let Some(after) = report.nonce_after {
        outln!(machine_mode, "nonce now:  {}", after);
    }
    outln!(machine_mode, "deployed {} artifact(s):", report.artifacts.len());
    for a in &report.artifacts {
        outln!(machine_mode, "  {:?} {} ({}) supply {}", a.address, a.name, a.symbol, a.supply);
    }
    Ok(())
}

async fn cmd_scan(args: ScanArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, provider) = connect(&args.common).await?;

    let owner = match args.owner.as_deref() {
        Some(o) => Address::from_str(o).context("invalid --owner address")?,
        None => dep.contracts.account,
    };

    let artifacts = scan_artifacts(
        &provider,
        dep.contracts.batch_deployer,
        Some(owner),
        args.from_block,
        args.to_block,
        args.chunk,
    )
    .await?;

    if machine_mode {
        let out: Vec<_> = artifacts.iter().map(encoding::artifact_to_json).collect();
        println!("{}", serde_json::Value::Array(out));
    }
    outln!(machine_mode, "{} artifact(s) owned by {:?}", artifacts.len(), owner);
    for a in &artifacts {
        outln!(machine_mode, "  {:?} {} ({}) supply {}", a.address, a.name, a.symbol, a.supply);
    }
    Ok(())
}

/// Provider for the deployment's RPC, refusing to continue on a chainId mismatch.
async fn connect(common: &CommonArgs) -> Result<(Deployment, Provider<Http>)> {
    let dep = load_deployment(&common.deployment, common.rpc.clone())?;

    let provider = Provider::<Http>::try_from(dep.rpc_url.as_str())?
        .interval(Duration::from_millis(common.poll_ms));

    let chain_id = provider.get_chainid().await?;
    let chain_id =
        u64::try_from(chain_id).map_err(|e| anyhow!("RPC returned chain id {chain_id}: {e}"))?;
    if chain_id != dep.chain_id {
        return Err(ConfigError::ChainMismatch {
            expected: dep.chain_id,
            actual: chain_id,
        }
        .into());
    }
    Ok((dep, provider))
}

async fn connect_signer(
    common: &CommonArgs,
    confirmations: u64,
) -> Result<(Deployment, EthersChain<SigningClient>)> {
    let (dep, provider) = connect(common).await?;
    let pk = common
        .owner_private_key
        .as_deref()
        .ok_or_else(|| anyhow!("missing BATCH_USEROP_OWNER_PRIVATE_KEY (or --owner-private-key)"))?;
    let wallet = load_owner(pk, dep.chain_id)?;
    let from = wallet.address();

    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    let chain = EthersChain::new(client, from)
        .with_poll_interval(Duration::from_millis(common.poll_ms))
        .with_confirmations(confirmations);
    Ok((dep, chain))
}

fn load_owner(pk: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet = LocalWallet::from_str(pk).context("invalid owner private key")?;
    Ok(wallet.with_chain_id(chain_id))
}

fn report_to_json(report: &AttemptReport) -> serde_json::Value {
    serde_json::json!({
        "stage": format!("{:?}", report.stage),
        "userOpHash": fmt_h256(report.digest()),
        "userOp": encoding::user_op_to_json(report.operation.operation()),
        "nonceBefore": fmt_u256(report.nonce_before),
        "nonceAfter": report.nonce_after.map(fmt_u256),
        "txHash": report.tx_hash.map(fmt_h256),
        "gasUsed": report.gas_used.map(fmt_u256),
        "actualGasCost": report.outcome.as_ref().map(|o| fmt_u256(o.actual_gas_cost)),
        "deposit": fmt_u256(report.preflight.deposit),
        "artifacts": report.artifacts.iter().map(encoding::artifact_to_json).collect::<Vec<_>>(),
    })
}
