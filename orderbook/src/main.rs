use orderbook::database::Database;
use orderbook::exchange::Exchange;
use orderbook::notify::Notifier;
use orderbook::quotes::CoinMarketCap;
use std::net::SocketAddr;
use std::sync::Arc;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, StructOpt)]
struct Arguments {
    #[structopt(long, env = "LOG_FILTER", default_value = "warn,orderbook=debug")]
    log_filter: String,

    #[structopt(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Url of the Postgres database. By default connects to locally running
    /// postgres.
    #[structopt(long, env = "DB_URL", default_value = "postgresql://")]
    db_url: Url,

    /// Api key for the CoinMarketCap quote service backing the balance
    /// valuation.
    #[structopt(long, env = "COINMARKETCAP_API_KEY", hide_env_values = true)]
    coinmarketcap_api_key: String,
}

#[tokio::main]
async fn main() {
    let args = Arguments::from_args();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log_filter.as_str()))
        .init();
    tracing::info!("running exchange with {:#?}", args);

    let database = Database::new(args.db_url.as_str()).expect("failed to create database");
    database
        .create_schema()
        .await
        .expect("failed to initialize database schema");

    let exchange = Arc::new(Exchange::new(database));
    let notifier = Arc::new(Notifier::new(exchange.clone()));
    let quotes = Arc::new(CoinMarketCap::new(
        reqwest::Client::new(),
        args.coinmarketcap_api_key.clone(),
    ));

    let serve_task = orderbook::serve_task(exchange, notifier, quotes, args.bind_address);
    tokio::select! {
        result = serve_task => tracing::error!(?result, "serve task exited"),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    };
}
