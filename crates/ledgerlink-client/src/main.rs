//! ledgerlink -- command line client for the node network.
//!
//! Usage:
//!   ledgerlink                          # Show network membership (default)
//!   ledgerlink --config path.toml ping 0.0.3
//!   ledgerlink ping-all                 # Ping every node
//!   ledgerlink identity                 # Show or create the operator key

use std::path::Path;

use clap::{Parser, Subcommand};

use ledgerlink_client::config::ClientConfig;
use ledgerlink_client::{expand_tilde, Client, RawQuery};
use ledgerlink_crypto::{Ed25519Signer, Signer};
use ledgerlink_protocol::AccountId;

#[derive(Parser)]
#[command(name = "ledgerlink", about = "ledgerlink node network client")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.ledgerlink/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show network membership and peer health (default)
    Network,
    /// Ping one node
    Ping {
        /// Node account id, e.g. 0.0.3
        account: AccountId,
    },
    /// Ping every node in the network
    PingAll,
    /// Send a raw query and print the response payload as hex
    Query {
        /// Service method, e.g. crypto/get_account_balance
        method: String,
        /// Hex-encoded payload
        #[arg(default_value = "")]
        payload: String,
    },
    /// Show or generate the operator key
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate a new operator keypair
    Generate,
    /// Show the current operator public key
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledgerlink_client=info,ledgerlink_network=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = ClientConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Identity { action }) => identity(&cfg, action),
        command => {
            let client = Client::from_config(&cfg).await?;
            let result = run(&client, command).await;
            client.close().await?;
            result
        }
    }
}

async fn run(client: &Client, command: Option<Commands>) -> anyhow::Result<()> {
    match command {
        Some(Commands::Network) | None => {
            let mut peers = client.pool().peers().await;
            peers.sort_by_key(|p| p.account_id());
            for peer in &peers {
                let health = if peer.is_healthy() {
                    "healthy".to_string()
                } else {
                    format!("backing off {:?}", peer.wait())
                };
                println!("{:<12} {:<40} {}", peer.account_id(), peer.address(), health);
            }
            println!(
                "{} peers, {} per transaction",
                peers.len(),
                client.node_count_for_transaction().await
            );
        }
        Some(Commands::Ping { account }) => {
            client.ping(account).await?;
            println!("{account}: OK");
        }
        Some(Commands::PingAll) => {
            let mut failed = 0;
            for (account, result) in client.ping_all().await {
                match result {
                    Ok(()) => println!("{account}: OK"),
                    Err(e) => {
                        failed += 1;
                        println!("{account}: {e}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} node(s) failed to answer");
            }
        }
        Some(Commands::Query { method, payload }) => {
            let payload = hex::decode(&payload)?;
            let response = client.execute(&mut RawQuery::new(method, payload)).await?;
            println!("{}: {}", response.node, hex::encode(&response.payload));
        }
        // handled in main before connecting
        Some(Commands::Identity { .. }) => {}
    }
    Ok(())
}

fn identity(cfg: &ClientConfig, action: Option<IdentityAction>) -> anyhow::Result<()> {
    let key_path = expand_tilde(&cfg.operator.key_file);
    match action {
        Some(IdentityAction::Generate) | None => {
            let signer = Ed25519Signer::load_or_create(&key_path)?;
            print_identity(cfg, &signer, &key_path);
        }
        Some(IdentityAction::Show) => {
            if key_path.exists() {
                let signer = Ed25519Signer::from_file(&key_path)?;
                print_identity(cfg, &signer, &key_path);
            } else {
                eprintln!("No operator key found at {}", key_path.display());
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn print_identity(cfg: &ClientConfig, signer: &Ed25519Signer, key_path: &Path) {
    if let Some(account) = &cfg.operator.account_id {
        println!("Operator: {account}");
    }
    println!("Public key: {}", signer.public_key());
    println!("Key file: {}", key_path.display());
}
