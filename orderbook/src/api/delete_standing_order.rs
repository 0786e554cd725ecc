use crate::api::IntoWarpReply;
use crate::api::get_standing_order::authorized_order;
use crate::exchange::Exchange;
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, reply::with_status, Filter, Rejection, Reply};

#[derive(Serialize)]
struct DeletionResponse {
    success: bool,
}

pub fn delete_standing_order(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("standing_orders" / i64)
        .and(warp::delete())
        .and(warp::header::optional::<String>("x-token"))
        .and_then(move |order_id: i64, token: Option<String>| {
            let exchange = exchange.clone();
            async move {
                let reply = match authorized_order(&exchange, token.as_deref(), order_id).await {
                    Ok(order) => match exchange.delete_standing_order(order.id).await {
                        Ok(success) => with_status(
                            warp::reply::json(&DeletionResponse { success }),
                            StatusCode::OK,
                        ),
                        Err(err) => {
                            tracing::error!(?err, order_id, "delete_standing_order error");
                            err.into_warp_reply()
                        }
                    },
                    Err(reply) => reply,
                };
                Result::<_, Infallible>::Ok(reply)
            }
        })
}
