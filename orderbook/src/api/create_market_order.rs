use crate::api::{authenticate, error, extract_payload, IntoWarpReply};
use crate::exchange::{Exchange, MarketOrderParams};
use crate::notify::Notifier;
use model::money::{Btc, Usd};
use model::OrderKind;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketOrderPayload {
    #[serde(rename = "type")]
    kind: String,
    quantity: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketOrderResponse {
    #[serde(with = "serde_with::rust::display_fromstr")]
    filled_quantity: Btc,
    #[serde(with = "serde_with::rust::display_fromstr")]
    filled_price: Usd,
}

fn bad_request(error_type: &str, description: impl AsRef<str>) -> WithStatus<Json> {
    with_status(error(error_type, description), StatusCode::BAD_REQUEST)
}

fn parse_payload(payload: &MarketOrderPayload) -> Result<(OrderKind, Btc), WithStatus<Json>> {
    let kind: OrderKind = payload
        .kind
        .parse()
        .map_err(|()| bad_request("InvalidOrderType", "type must be BUY or SELL"))?;
    let quantity: Btc = payload
        .quantity
        .parse()
        .map_err(|_| bad_request("MalformedAmount", "malformed quantity"))?;
    if quantity.as_sats() <= 0 {
        return Err(bad_request("InvalidQuantity", "quantity must be positive"));
    }
    Ok((kind, quantity))
}

fn create_market_order_request(
) -> impl Filter<Extract = (Option<String>, MarketOrderPayload), Error = Rejection> + Clone {
    warp::path!("market_orders")
        .and(warp::post())
        .and(warp::header::optional::<String>("x-token"))
        .and(extract_payload())
}

async fn handle_execute(
    exchange: &Exchange,
    notifier: &Notifier,
    token: Option<&str>,
    payload: &MarketOrderPayload,
) -> WithStatus<Json> {
    let account = match authenticate(exchange, token).await {
        Ok(account) => account,
        Err(reply) => return reply,
    };
    let (kind, quantity) = match parse_payload(payload) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    match exchange
        .execute_market_order(MarketOrderParams {
            account_id: account.id,
            kind,
            quantity,
        })
        .await
    {
        Ok(fill) => {
            notifier.order_changes(fill.affected_order_ids);
            with_status(
                warp::reply::json(&MarketOrderResponse {
                    filled_quantity: fill.filled_quantity,
                    filled_price: fill.filled_price,
                }),
                StatusCode::OK,
            )
        }
        Err(err) => {
            tracing::error!(?err, account_id = account.id, "execute_market_order error");
            err.into_warp_reply()
        }
    }
}

pub fn create_market_order(
    exchange: Arc<Exchange>,
    notifier: Arc<Notifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_market_order_request().and_then(
        move |token: Option<String>, payload: MarketOrderPayload| {
            let exchange = exchange.clone();
            let notifier = notifier.clone();
            async move {
                let reply =
                    handle_execute(&exchange, &notifier, token.as_deref(), &payload).await;
                Result::<_, Infallible>::Ok(reply)
            }
        },
    )
}
