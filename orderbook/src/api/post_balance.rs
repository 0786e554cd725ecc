use crate::api::{authenticate, error, extract_payload, IntoWarpReply};
use crate::exchange::Exchange;
use model::money::{Btc, Usd};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct DepositPayload {
    topup_amount: String,
    currency: String,
}

#[derive(Serialize)]
struct DepositResponse {
    success: bool,
}

/// Parses the payload into the per-currency deltas, one of which is zero.
fn parse_deposit(payload: &DepositPayload) -> Result<(Btc, Usd), WithStatus<Json>> {
    match payload.currency.to_ascii_uppercase().as_str() {
        "USD" => match payload.topup_amount.parse::<Usd>() {
            Ok(usd) => Ok((Btc::from_sats(0), usd)),
            Err(err) => Err(with_status(
                error("MalformedAmount", err.to_string()),
                StatusCode::BAD_REQUEST,
            )),
        },
        "BTC" => match payload.topup_amount.parse::<Btc>() {
            Ok(btc) => Ok((btc, Usd::from_cents(0))),
            Err(err) => Err(with_status(
                error("MalformedAmount", err.to_string()),
                StatusCode::BAD_REQUEST,
            )),
        },
        other => Err(with_status(
            error(
                "UnsupportedCurrency",
                format!("unsupported currency {:?}", other),
            ),
            StatusCode::BAD_REQUEST,
        )),
    }
}

fn post_balance_request() -> impl Filter<Extract = (Option<String>, DepositPayload), Error = Rejection> + Clone
{
    warp::path!("balance")
        .and(warp::post())
        .and(warp::header::optional::<String>("x-token"))
        .and(extract_payload())
}

async fn handle_deposit(
    exchange: &Exchange,
    token: Option<&str>,
    payload: &DepositPayload,
) -> WithStatus<Json> {
    let account = match authenticate(exchange, token).await {
        Ok(account) => account,
        Err(reply) => return reply,
    };
    let (btc_amount, usd_amount) = match parse_deposit(payload) {
        Ok(amounts) => amounts,
        Err(reply) => return reply,
    };
    match exchange.deposit(account.id, btc_amount, usd_amount).await {
        Ok(success) => with_status(
            warp::reply::json(&DepositResponse { success }),
            StatusCode::OK,
        ),
        Err(err) => {
            tracing::error!(?err, account_id = account.id, "deposit error");
            err.into_warp_reply()
        }
    }
}

pub fn post_balance(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    post_balance_request().and_then(move |token: Option<String>, payload: DepositPayload| {
        let exchange = exchange.clone();
        async move {
            let reply = handle_deposit(&exchange, token.as_deref(), &payload).await;
            Result::<_, Infallible>::Ok(reply)
        }
    })
}
