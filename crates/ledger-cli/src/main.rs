use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::constants::SYSTEM_ADDRESS;
use ledger_core::wallet::{address_from_public_key, Keypair};
use ledger_core::{SignedTransaction, Transaction};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a proof-of-work ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "LEDGER_NODE", default_value = "http://127.0.0.1:5000")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new secp256k1 keypair
    Keygen,
    /// Derive the address of a hex public key
    Address {
        #[arg(long)]
        public_key: String,
    },
    /// Sign and submit a transfer
    Send {
        /// Sender's secret key (hex)
        #[arg(long, env = "LEDGER_SECRET", hide_env_values = true)]
        secret: String,
        /// Recipient address
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: f64,
    },
    /// Credit an address from the system account
    Faucet {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: f64,
    },
    /// Mine the pending transactions into a block
    Mine {
        /// Address that receives the block reward
        #[arg(long)]
        miner: String,
    },
    /// Confirmed balance of an address
    Balance { address: String },
    /// List pending transactions
    Pending,
    /// Fetch a page of the chain
    Chain {
        #[arg(long, default_value_t = 1)]
        start: u64,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// Register peers with the node
    Register {
        #[arg(required = true)]
        nodes: Vec<String>,
    },
    /// Ask the node to adopt the longest valid chain among its peers
    Resolve,
}

#[derive(Serialize)]
struct KeyOutput {
    secret_key: String,
    public_key: String,
    address: String,
}

fn signed_transfer(secret: &str, to: &str, amount: f64) -> Result<SignedTransaction> {
    let keys = Keypair::from_secret_hex(secret).context("invalid secret key")?;
    let tx = Transaction::new(keys.address(), to, amount);
    keys.sign_transaction(tx)
}

fn faucet_transfer(to: &str, amount: f64) -> SignedTransaction {
    SignedTransaction {
        transaction: Transaction::new(SYSTEM_ADDRESS, to, amount),
        signature: String::new(),
        public_key: None,
    }
}

async fn send(request: RequestBuilder) -> Result<()> {
    let res = request.send().await?;
    let status = res.status();
    let body = res.text().await?;
    debug!(%status, "node responded");
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        bail!("node returned {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = Client::new();
    match cli.cmd {
        Command::Keygen => {
            let keys = Keypair::generate();
            let out = KeyOutput {
                secret_key: keys.secret_hex(),
                public_key: keys.public_hex(),
                address: keys.address(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Address { public_key } => {
            let address = address_from_public_key(&public_key).context("not a valid public key")?;
            println!("{address}");
        }
        Command::Send { secret, to, amount } => {
            let signed = signed_transfer(&secret, &to, amount)?;
            send(client.post(format!("{node}/transactions")).json(&signed)).await?;
        }
        Command::Faucet { to, amount } => {
            let signed = faucet_transfer(&to, amount);
            send(client.post(format!("{node}/transactions")).json(&signed)).await?;
        }
        Command::Mine { miner } => {
            let body = json!({ "miner_address": miner });
            send(client.post(format!("{node}/blocks/mine")).json(&body)).await?;
        }
        Command::Balance { address } => {
            send(client.get(format!("{node}/balance/{address}"))).await?;
        }
        Command::Pending => send(client.get(format!("{node}/transactions/pending"))).await?,
        Command::Chain { start, limit } => {
            let query = [("start", start), ("limit", u64::from(limit))];
            send(client.get(format!("{node}/chain")).query(&query)).await?;
        }
        Command::Register { nodes } => {
            let body = json!({ "nodes": nodes });
            send(client.post(format!("{node}/nodes/register")).json(&body)).await?;
        }
        Command::Resolve => send(client.get(format!("{node}/nodes/resolve"))).await?,
    }
    Ok(())
}
