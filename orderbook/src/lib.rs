pub mod api;
pub mod database;
pub mod exchange;
pub mod notify;
pub mod quotes;

use crate::exchange::Exchange;
use crate::notify::Notifier;
use crate::quotes::BtcPriceQuoting;
use std::{net::SocketAddr, sync::Arc};
use tokio::{task, task::JoinHandle};
use warp::Filter;

pub fn serve_task(
    exchange: Arc<Exchange>,
    notifier: Arc<Notifier>,
    quotes: Arc<dyn BtcPriceQuoting>,
    address: SocketAddr,
) -> JoinHandle<()> {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allow_headers(vec!["Origin", "Content-Type", "X-Token"]);
    let filter = api::handle_all_routes(exchange, notifier, quotes).with(cors);
    tracing::info!(%address, "serving exchange api");
    task::spawn(warp::serve(filter).bind(address))
}
