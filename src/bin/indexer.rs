use alloy_primitives::Address;
use anyhow::Result;
use clap::{Parser, Subcommand};
use nft_market_indexer::config::Config;
use nft_market_indexer::contract::{ClientFactory, RpcRegistry};
use nft_market_indexer::logging::init_tracing;
use nft_market_indexer::repository::{Database, Protocol};
use nft_market_indexer::scheduler::ensure_tracked;
use nft_market_indexer::supervisor::Supervisor;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Ingest NFT collection and marketplace events into SQLite", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every tracked contract until Ctrl-C
    Run {
        /// Extra marketplace to poll, as <networkId>:<address>
        #[arg(long, value_parser = parse_network_address)]
        marketplace: Vec<(u64, Address)>,
    },
    /// Start tracking a contract; the next `run` polls it
    Register {
        #[arg(long)]
        network: u64,

        #[arg(long)]
        address: String,

        /// erc721, erc1155 or marketplace
        #[arg(long)]
        protocol: String,
    },
}

fn parse_network_address(value: &str) -> Result<(u64, Address), String> {
    let (network, address) = value
        .split_once(':')
        .ok_or_else(|| format!("expected <networkId>:<address>, got {value}"))?;
    let network = network
        .parse()
        .map_err(|_| format!("invalid network id {network}"))?;
    let address = Address::from_str(address).map_err(|_| format!("invalid address {address}"))?;
    Ok((network, address))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Configuration loaded");
    for (network_id, urls) in &config.rpc_urls {
        info!("Network {}: {} RPC endpoint(s) configured", network_id, urls.len());
    }

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let registry = RpcRegistry::from_urls(&config.rpc_urls)?;

    match cli.command {
        Commands::Run { marketplace } => {
            let supervisor = Supervisor::new(db, Arc::new(registry), config.poller_config());

            supervisor.rehydrate()?;
            for (network_id, address) in marketplace {
                supervisor.start_polling(address, network_id, Protocol::Marketplace)?;
            }
            info!("{} poller(s) running", supervisor.running().len());

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            supervisor.shutdown().await;
        }
        Commands::Register {
            network,
            address,
            protocol,
        } => {
            let address = Address::from_str(&address)
                .map_err(|_| anyhow::anyhow!("Invalid address format: {}", address))?;
            let protocol = Protocol::from_str(&protocol)?;

            let client = registry.connect(network, address, protocol)?;
            let contract = ensure_tracked(client.as_ref(), &db, &config.poller_config()).await?;
            info!(
                "{} {:?} on network {} tracked from block {}",
                contract.protocol, contract.address, contract.network_id, contract.last_filter_block
            );
        }
    }

    Ok(())
}
