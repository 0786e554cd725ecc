use crate::api::{authenticate, error, unauthorized, IntoWarpReply};
use crate::exchange::Exchange;
use model::money::{Btc, Usd};
use model::{OrderKind, OrderState, StandingOrder};
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StandingOrderView {
    id: i64,
    #[serde(rename = "type")]
    kind: OrderKind,
    state: OrderState,
    #[serde(with = "serde_with::rust::display_fromstr")]
    quantity: Btc,
    #[serde(with = "serde_with::rust::display_fromstr")]
    filled_quantity: Btc,
    #[serde(with = "serde_with::rust::display_fromstr")]
    limit_price: Usd,
    #[serde(with = "serde_with::rust::display_fromstr")]
    filled_price: Usd,
}

impl StandingOrderView {
    fn from_order(order: &StandingOrder) -> Self {
        Self {
            id: order.id,
            kind: order.kind,
            state: order.state,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity,
            limit_price: order.limit_price,
            filled_price: order.filled_price,
        }
    }
}

/// Loads the order and verifies the requester owns it. Shared with the
/// delete route, which has the same visibility rule.
pub(super) async fn authorized_order(
    exchange: &Exchange,
    token: Option<&str>,
    order_id: i64,
) -> Result<StandingOrder, WithStatus<Json>> {
    let account = authenticate(exchange, token).await?;
    let order = match exchange.standing_order(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return Err(with_status(
                error("NotFound", "order not found"),
                StatusCode::NOT_FOUND,
            ))
        }
        Err(err) => {
            tracing::error!(?err, order_id, "order lookup failed");
            return Err(err.into_warp_reply());
        }
    };
    if order.account_id != account.id {
        return Err(unauthorized());
    }
    Ok(order)
}

pub fn get_standing_order(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("standing_orders" / i64)
        .and(warp::get())
        .and(warp::header::optional::<String>("x-token"))
        .and_then(move |order_id: i64, token: Option<String>| {
            let exchange = exchange.clone();
            async move {
                let reply = match authorized_order(&exchange, token.as_deref(), order_id).await {
                    Ok(order) => with_status(
                        warp::reply::json(&StandingOrderView::from_order(&order)),
                        StatusCode::OK,
                    ),
                    Err(reply) => reply,
                };
                Result::<_, Infallible>::Ok(reply)
            }
        })
}
