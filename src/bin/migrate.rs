use anyhow::Result;
use nft_market_indexer::config::Config;
use nft_market_indexer::logging::init_tracing;
use nft_market_indexer::repository::Database;

fn main() -> Result<()> {
    init_tracing();

    let database_url = Config::database_url_from_env();

    println!("Running migrations on database: {database_url}");

    let _db = Database::new(&database_url)?;

    println!("Migrations completed successfully!");

    Ok(())
}
