use anyhow::Result;
use clap::{Parser, Subcommand};
use nft_market_indexer::config::Config;
use nft_market_indexer::query::commands::{
    ListingQuery, TokenQuery, cmd_airdrops, cmd_contracts, cmd_listings, cmd_logs, cmd_offers,
    cmd_tokens,
};
use nft_market_indexer::query::formatters::OutputFormat;
use nft_market_indexer::repository::Database;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query the NFT marketplace projection", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tracked collections and marketplaces
    Contracts,
    /// Tokens of a collection with their owners
    Tokens {
        #[arg(long)]
        network: u64,

        collection: String,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Listings {
        #[arg(long)]
        network: Option<u64>,

        /// Listed, Sold or Canceled
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Offers {
        #[arg(long)]
        network: u64,

        listing_id: String,
    },
    Airdrops {
        #[arg(long)]
        network: u64,

        collection: String,
    },
    /// Recent ingestion errors and tick timings
    Logs {
        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let db = Database::new(&Config::database_url_from_env())?;

    let output = db.with_conn(|conn| match cli.command {
        Commands::Contracts => cmd_contracts(conn, &format),
        Commands::Tokens {
            network,
            collection,
            limit,
            offset,
        } => cmd_tokens(
            conn,
            TokenQuery {
                network_id: network,
                collection,
                limit,
                offset,
            },
            &format,
        ),
        Commands::Listings {
            network,
            status,
            limit,
            offset,
        } => cmd_listings(
            conn,
            ListingQuery {
                network_id: network,
                status,
                limit,
                offset,
            },
            &format,
        ),
        Commands::Offers {
            network,
            listing_id,
        } => cmd_offers(conn, network, &listing_id, &format),
        Commands::Airdrops {
            network,
            collection,
        } => cmd_airdrops(conn, network, &collection, &format),
        Commands::Logs { kind, limit } => cmd_logs(conn, kind.as_deref(), limit, &format),
    })?;
    println!("{output}");

    Ok(())
}
