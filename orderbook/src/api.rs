mod create_market_order;
mod create_standing_order;
mod delete_standing_order;
mod get_balance;
mod get_standing_order;
mod post_balance;
mod register;

use crate::exchange::{EngineError, Exchange};
use crate::notify::Notifier;
use crate::quotes::BtcPriceQuoting;
use model::Account;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use warp::{
    hyper::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

pub fn handle_all_routes(
    exchange: Arc<Exchange>,
    notifier: Arc<Notifier>,
    quotes: Arc<dyn BtcPriceQuoting>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let register = register::register(exchange.clone());
    let get_balance = get_balance::get_balance(exchange.clone(), quotes);
    let post_balance = post_balance::post_balance(exchange.clone());
    let create_standing_order =
        create_standing_order::create_standing_order(exchange.clone(), notifier.clone());
    let get_standing_order = get_standing_order::get_standing_order(exchange.clone());
    let delete_standing_order = delete_standing_order::delete_standing_order(exchange.clone());
    let create_market_order = create_market_order::create_market_order(exchange, notifier);
    register
        .or(get_balance)
        .or(post_balance)
        .or(create_standing_order)
        .or(get_standing_order)
        .or(delete_standing_order)
        .or(create_market_order)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Error<'a> {
    error_type: &'a str,
    description: &'a str,
}

fn error(error_type: &str, description: impl AsRef<str>) -> Json {
    json(&Error {
        error_type,
        description: description.as_ref(),
    })
}

fn internal_error() -> Json {
    json(&Error {
        error_type: "InternalServerError",
        description: "",
    })
}

pub trait IntoWarpReply {
    fn into_warp_reply(self) -> WithStatus<Json>;
}

impl IntoWarpReply for EngineError {
    fn into_warp_reply(self) -> WithStatus<Json> {
        match self {
            Self::InvalidQuantity => with_status(
                error("InvalidQuantity", "quantity must be positive"),
                StatusCode::BAD_REQUEST,
            ),
            Self::NegativeLimitPrice => with_status(
                error("NegativeLimitPrice", "limit price must not be negative"),
                StatusCode::BAD_REQUEST,
            ),
            Self::DuplicateUsername => with_status(
                error("DuplicateUsername", "username is already taken"),
                StatusCode::BAD_REQUEST,
            ),
            Self::NotFound => with_status(
                error("NotFound", "account or order not found"),
                StatusCode::NOT_FOUND,
            ),
            Self::StoreConflict => with_status(
                error(
                    "StoreConflict",
                    "a concurrent request conflicted, try again",
                ),
                StatusCode::CONFLICT,
            ),
            Self::InvalidTransferFromSeller | Self::InvalidTransferToBuyer | Self::Store(_) => {
                with_status(internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

fn unauthorized() -> WithStatus<Json> {
    with_status(
        error("Unauthorized", "missing or unknown token"),
        StatusCode::UNAUTHORIZED,
    )
}

/// Maps the request token to its account, or the 401 reply to return as-is.
async fn authenticate(
    exchange: &Exchange,
    token: Option<&str>,
) -> Result<Account, WithStatus<Json>> {
    let token = match token {
        Some(token) => token.to_string(),
        None => return Err(unauthorized()),
    };
    match exchange.account_by_token(&token).await {
        Ok(Some(account)) => Ok(account),
        Ok(None) => Err(unauthorized()),
        Err(err) => {
            tracing::error!(?err, "account lookup failed");
            Err(err.into_warp_reply())
        }
    }
}

const MAX_JSON_BODY_PAYLOAD: u64 = 1024 * 16;

fn extract_payload<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    // (rejecting huge payloads)...
    warp::body::content_length_limit(MAX_JSON_BODY_PAYLOAD).and(warp::body::json())
}

#[cfg(test)]
async fn response_body(response: warp::hyper::Response<warp::hyper::Body>) -> Vec<u8> {
    let mut body = response.into_body();
    let mut result = Vec::new();
    while let Some(bytes) = futures::StreamExt::next(&mut body).await {
        result.extend_from_slice(bytes.unwrap().as_ref());
    }
    result
}
