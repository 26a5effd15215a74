use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, U256};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use userop_pipeline::builder::derive_sender;
use userop_pipeline::encoding::user_op_to_json;
use userop_pipeline::{
    load_chain_profile, provider_for, Action, CallKind, ChainView, EthersChain, Pipeline,
    PollConfig, ProviderConfig, ProviderKind, SubmissionOutcome, WalletConfig,
};

#[derive(Parser, Debug)]
#[command(name = "userop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the wallet's counterfactual address and deployment status.
    Address(AddressArgs),

    /// Build, sign and send a UserOperation.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Chain profile JSON (entry point, factory, singleton, module, ...).
    #[arg(long, default_value = "deployments/sepolia.json")]
    profile: PathBuf,

    /// Override the chain RPC URL (otherwise from the profile / its env var).
    #[arg(long, env = "USEROP_RPC_URL")]
    rpc: Option<String>,

    /// Wallet owner address; repeat for multi-owner wallets.
    #[arg(long = "owner", required = true)]
    owners: Vec<String>,

    /// Signature threshold.
    #[arg(long, default_value_t = 1)]
    threshold: u64,

    /// CREATE2 salt nonce; changing it yields a different wallet address.
    #[arg(long, default_value_t = 0)]
    salt_nonce: u64,
}

#[derive(Args, Debug)]
struct AddressArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionKind {
    Transfer,
    Erc20Transfer,
    Erc20Mint,
    Erc721Mint,
    Raw,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Provider dialect: pimlico, alchemy, gelato, or entrypoint-rpc.
    #[arg(long, env = "USEROP_PROVIDER", default_value = "entrypoint-rpc")]
    provider: String,

    /// Bundler RPC endpoint (relay base URL for gelato).
    #[arg(long, env = "USEROP_BUNDLER_URL")]
    bundler_url: String,

    /// Sponsor API key (gelato).
    #[arg(long, env = "USEROP_SPONSOR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gas sponsorship policy id (alchemy / ERC-7677 context).
    #[arg(long, env = "USEROP_POLICY_ID")]
    policy_id: Option<String>,

    /// ERC-7677 paymaster service endpoint (entrypoint-rpc).
    #[arg(long, env = "USEROP_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Fixed ERC-20 token paymaster address (pimlico).
    #[arg(long, env = "USEROP_ERC20_PAYMASTER")]
    erc20_paymaster: Option<String>,

    /// Comma-separated owner private keys, in any order.
    #[arg(long, env = "USEROP_SIGNER_KEYS", hide_env_values = true)]
    signer_keys: String,

    /// What the wallet should do.
    #[arg(long, value_enum)]
    action: ActionKind,

    /// Recipient (transfer, erc20-transfer, erc20-mint, erc721-mint, raw).
    #[arg(long)]
    to: Option<String>,

    /// Wei value (transfer, raw).
    #[arg(long)]
    value: Option<String>,

    /// Token contract (erc20-transfer, erc20-mint, erc721-mint).
    #[arg(long)]
    token: Option<String>,

    /// Token amount in base units (erc20-transfer, erc20-mint).
    #[arg(long)]
    amount: Option<String>,

    /// Raw call data, 0x-hex (raw).
    #[arg(long)]
    data: Option<String>,

    /// Use delegate-call instead of call (raw).
    #[arg(long, default_value_t = false)]
    delegate: bool,

    /// Build and sign only; print the operation JSON instead of sending.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Submit without waiting for the receipt.
    #[arg(long, default_value_t = false)]
    no_wait: bool,

    /// Seconds between receipt polls.
    #[arg(long, default_value_t = 3)]
    poll_interval: u64,

    /// Receipt polling attempt budget.
    #[arg(long, default_value_t = 60)]
    poll_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs on stderr so stdout stays script-friendly.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Address(args) => cmd_address(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

fn parse_address(field: &str, s: &str) -> Result<Address> {
    Address::from_str(s).with_context(|| format!("invalid {field} address '{s}'"))
}

fn parse_amount(field: &str, s: &str) -> Result<U256> {
    U256::from_dec_str(s).with_context(|| format!("invalid {field} '{s}'"))
}

fn wallet_config(common: &CommonArgs) -> Result<WalletConfig> {
    let owners = common
        .owners
        .iter()
        .map(|o| parse_address("owner", o))
        .collect::<Result<Vec<_>>>()?;
    let wallet = WalletConfig {
        owners,
        threshold: U256::from(common.threshold),
        salt_nonce: U256::from(common.salt_nonce),
    };
    wallet.validate()?;
    Ok(wallet)
}

fn build_action(args: &SendArgs) -> Result<Action> {
    let need = |field: &str, v: &Option<String>| -> Result<String> {
        v.clone()
            .ok_or_else(|| anyhow!("--{field} is required for action {:?}", args.action))
    };

    Ok(match args.action {
        ActionKind::Transfer => Action::NativeTransfer {
            to: parse_address("to", &need("to", &args.to)?)?,
            value: parse_amount("value", &need("value", &args.value)?)?,
        },
        ActionKind::Erc20Transfer => Action::Erc20Transfer {
            token: parse_address("token", &need("token", &args.token)?)?,
            to: parse_address("to", &need("to", &args.to)?)?,
            amount: parse_amount("amount", &need("amount", &args.amount)?)?,
        },
        ActionKind::Erc20Mint => Action::Erc20Mint {
            token: parse_address("token", &need("token", &args.token)?)?,
            to: parse_address("to", &need("to", &args.to)?)?,
            amount: parse_amount("amount", &need("amount", &args.amount)?)?,
        },
        ActionKind::Erc721Mint => Action::Erc721Mint {
            token: parse_address("token", &need("token", &args.token)?)?,
            to: parse_address("to", &need("to", &args.to)?)?,
        },
        ActionKind::Raw => {
            let data = match args.data.as_deref() {
                Some(s) => {
                    let hex_str = s.strip_prefix("0x").unwrap_or(s);
                    Bytes::from(hex::decode(hex_str).context("invalid --data hex")?)
                }
                None => Bytes::default(),
            };
            Action::RawCall {
                to: parse_address("to", &need("to", &args.to)?)?,
                value: args
                    .value
                    .as_deref()
                    .map(|v| parse_amount("value", v))
                    .transpose()?
                    .unwrap_or_default(),
                data,
                operation: if args.delegate {
                    CallKind::DelegateCall
                } else {
                    CallKind::Call
                },
            }
        }
    })
}

async fn cmd_address(args: AddressArgs) -> Result<()> {
    let profile = load_chain_profile(&args.common.profile, args.common.rpc.clone())?;
    let wallet = wallet_config(&args.common)?;

    let sender = derive_sender(&profile, &wallet)?;
    let client = Provider::<Http>::try_from(profile.rpc_url.as_str())
        .context("invalid chain RPC URL")?;
    let chain = EthersChain::new(Arc::new(client));
    let deployed = chain.is_deployed(sender).await?;

    tracing::info!(chain = profile.chain_id, deployed, "wallet address derived");
    println!("{sender:?}");
    if !deployed {
        eprintln!("not deployed yet; the first operation will carry initCode");
    }
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let profile = load_chain_profile(&args.common.profile, args.common.rpc.clone())?;
    let wallet = wallet_config(&args.common)?;
    let action = build_action(&args)?;

    let provider_config = ProviderConfig {
        kind: ProviderKind::from_str(&args.provider)?,
        url: args.bundler_url.clone(),
        api_key: args.api_key.clone(),
        policy_id: args.policy_id.clone(),
        paymaster_url: args.paymaster_url.clone(),
        erc20_paymaster: args
            .erc20_paymaster
            .as_deref()
            .map(|s| parse_address("erc20-paymaster", s))
            .transpose()?,
    };
    let provider = provider_for(&provider_config, &profile)?;

    let signers = args
        .signer_keys
        .split(',')
        .map(|k| {
            k.trim()
                .parse::<LocalWallet>()
                .map_err(|e| anyhow!("invalid signer key: {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let client = Provider::<Http>::try_from(profile.rpc_url.as_str())
        .context("invalid chain RPC URL")?;
    let chain = EthersChain::new(Arc::new(client));

    let pipeline = Pipeline {
        chain: &chain,
        provider: provider.as_ref(),
        profile: &profile,
        wallet: &wallet,
        signers: &signers,
        funding: PollConfig {
            interval: Duration::from_secs(3),
            max_attempts: 20,
        },
    };

    if args.dry_run {
        let op = pipeline.prepare(&action).await?;
        println!("{}", serde_json::to_string_pretty(&user_op_to_json(&op))?);
        return Ok(());
    }

    if args.no_wait {
        let op = pipeline.prepare(&action).await?;
        let id = provider.submit(&op).await?;
        println!("{id}");
        return Ok(());
    }

    let poll = PollConfig {
        interval: Duration::from_secs(args.poll_interval),
        max_attempts: args.poll_attempts,
    };
    match pipeline.execute(&action, &poll).await? {
        SubmissionOutcome::Confirmed(receipt) => {
            tracing::info!(
                gas_used = %receipt.actual_gas_used,
                gas_cost = %receipt.actual_gas_cost,
                "operation confirmed"
            );
            println!("{:?}", receipt.tx_hash);
            Ok(())
        }
        SubmissionOutcome::Reverted(receipt) => {
            bail!("operation reverted in tx {:?}", receipt.tx_hash)
        }
        SubmissionOutcome::Rejected { message } => {
            bail!("operation rejected: {message}")
        }
        SubmissionOutcome::TimedOut { id, attempts } => {
            bail!("no receipt after {attempts} attempts; keep checking {id}")
        }
    }
}
