use crate::api::{authenticate, internal_error};
use crate::exchange::Exchange;
use crate::quotes::BtcPriceQuoting;
use model::money::{Btc, Usd};
use model::Account;
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Debug, serde::Serialize)]
struct BalanceResponse {
    #[serde(rename = "BTC", with = "serde_with::rust::display_fromstr")]
    btc: Btc,
    #[serde(rename = "USD", with = "serde_with::rust::display_fromstr")]
    usd: Usd,
    #[serde(rename = "USDEquivalent", with = "serde_with::rust::display_fromstr")]
    usd_equivalent: Usd,
}

/// The balance view of an account with its BTC holdings valued at the
/// quoted price.
async fn balance_for(account: &Account, quotes: &dyn BtcPriceQuoting) -> WithStatus<Json> {
    let price = match quotes.btc_price_in_usd().await {
        Ok(price) => price,
        Err(err) => {
            tracing::error!(?err, "price quote failed");
            return with_status(internal_error(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    with_status(
        warp::reply::json(&BalanceResponse {
            btc: account.btc_amount,
            usd: account.usd_amount,
            usd_equivalent: account.btc_amount.to_usd(price),
        }),
        StatusCode::OK,
    )
}

pub fn get_balance(
    exchange: Arc<Exchange>,
    quotes: Arc<dyn BtcPriceQuoting>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("balance")
        .and(warp::get())
        .and(warp::header::optional::<String>("x-token"))
        .and_then(move |token: Option<String>| {
            let exchange = exchange.clone();
            let quotes = quotes.clone();
            async move {
                let reply = match authenticate(&exchange, token.as_deref()).await {
                    Ok(account) => balance_for(&account, quotes.as_ref()).await,
                    Err(reply) => reply,
                };
                Result::<_, Infallible>::Ok(reply)
            }
        })
}
