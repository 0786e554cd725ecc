use crate::api::{extract_payload, IntoWarpReply};
use crate::exchange::{EngineError, Exchange};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, reply::with_status, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct RegistrationPayload {
    username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResponse {
    id: i64,
    token: String,
}

fn register_request() -> impl Filter<Extract = (RegistrationPayload,), Error = Rejection> + Clone {
    warp::path!("register").and(warp::post()).and(extract_payload())
}

pub fn register(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    register_request().and_then(move |payload: RegistrationPayload| {
        let exchange = exchange.clone();
        async move {
            let reply = match exchange.register_account(&payload.username).await {
                Ok(account) => with_status(
                    warp::reply::json(&RegistrationResponse {
                        id: account.id,
                        token: account.token,
                    }),
                    StatusCode::CREATED,
                ),
                Err(err @ EngineError::DuplicateUsername) => err.into_warp_reply(),
                Err(err) => {
                    tracing::error!(?err, username = %payload.username, "register error");
                    err.into_warp_reply()
                }
            };
            Result::<_, Infallible>::Ok(reply)
        }
    })
}
