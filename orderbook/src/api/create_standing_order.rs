use crate::api::{authenticate, error, extract_payload, IntoWarpReply};
use crate::exchange::{Exchange, StandingOrderParams};
use crate::notify::Notifier;
use model::money::{Btc, Usd};
use model::{OrderKind, OrderState};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct StandingOrderPayload {
    #[serde(rename = "type")]
    kind: String,
    quantity: String,
    limit_price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    webhook_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StandingOrderCreatedResponse {
    order_id: i64,
    state: OrderState,
}

fn bad_request(error_type: &str, description: impl AsRef<str>) -> WithStatus<Json> {
    with_status(error(error_type, description), StatusCode::BAD_REQUEST)
}

/// Validates the wire payload. The limit price comes from the limitPrice
/// field; quantities and prices each parse against their own precision.
fn parse_payload(
    payload: &StandingOrderPayload,
) -> Result<(OrderKind, Btc, Usd), WithStatus<Json>> {
    let kind: OrderKind = payload
        .kind
        .parse()
        .map_err(|()| bad_request("InvalidOrderType", "type must be BUY or SELL"))?;
    let quantity: Btc = payload
        .quantity
        .parse()
        .map_err(|_| bad_request("MalformedAmount", "malformed quantity"))?;
    let limit_price: Usd = payload
        .limit_price
        .parse()
        .map_err(|_| bad_request("MalformedAmount", "malformed limitPrice"))?;
    if quantity.as_sats() <= 0 {
        return Err(bad_request("InvalidQuantity", "quantity must be positive"));
    }
    if limit_price.as_cents() < 0 {
        return Err(bad_request(
            "NegativeLimitPrice",
            "limit price must not be negative",
        ));
    }
    Ok((kind, quantity, limit_price))
}

fn create_standing_order_request(
) -> impl Filter<Extract = (Option<String>, StandingOrderPayload), Error = Rejection> + Clone {
    warp::path!("standing_orders")
        .and(warp::post())
        .and(warp::header::optional::<String>("x-token"))
        .and(extract_payload())
}

async fn handle_create(
    exchange: &Exchange,
    notifier: &Notifier,
    token: Option<&str>,
    payload: &StandingOrderPayload,
) -> WithStatus<Json> {
    let account = match authenticate(exchange, token).await {
        Ok(account) => account,
        Err(reply) => return reply,
    };
    let (kind, quantity, limit_price) = match parse_payload(payload) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    let placement = match exchange
        .create_standing_order(StandingOrderParams {
            account_id: account.id,
            kind,
            quantity,
            limit_price,
            webhook_url: payload.webhook_url.clone(),
        })
        .await
    {
        Ok(placement) => placement,
        Err(err) => {
            tracing::error!(?err, account_id = account.id, "create_standing_order error");
            return err.into_warp_reply();
        }
    };
    notifier.order_changes(placement.affected_order_ids);
    with_status(
        warp::reply::json(&StandingOrderCreatedResponse {
            order_id: placement.order.id,
            state: placement.order.state,
        }),
        StatusCode::CREATED,
    )
}

pub fn create_standing_order(
    exchange: Arc<Exchange>,
    notifier: Arc<Notifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_standing_order_request().and_then(
        move |token: Option<String>, payload: StandingOrderPayload| {
            let exchange = exchange.clone();
            let notifier = notifier.clone();
            async move {
                let reply =
                    handle_create(&exchange, &notifier, token.as_deref(), &payload).await;
                Result::<_, Infallible>::Ok(reply)
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::response_body;
    use warp::test::request;

    #[tokio::test]
    async fn create_standing_order_request_ok() {
        let filter = create_standing_order_request();
        let payload = StandingOrderPayload {
            kind: "BUY".to_string(),
            quantity: "1.5".to_string(),
            limit_price: "10000.00".to_string(),
            webhook_url: Some("http://localhost:9999/hook".to_string()),
        };
        let request = request()
            .path("/standing_orders")
            .method("POST")
            .header("x-token", "sometoken")
            .header("content-type", "application/json")
            .json(&payload);
        let (_, result) = request.filter(&filter).await.unwrap();
        assert_eq!(result, payload);
    }

    #[test]
    fn parse_payload_reads_the_limit_price_field() {
        let (kind, quantity, limit_price) = parse_payload(&StandingOrderPayload {
            kind: "buy".to_string(),
            quantity: "2.0".to_string(),
            limit_price: "10000.00".to_string(),
            webhook_url: None,
        })
        .unwrap_or_else(|_| panic!("parse_payload failed"));
        assert_eq!(kind, OrderKind::Buy);
        assert_eq!(quantity, Btc::from_sats(200_000_000));
        // The price reflects limitPrice, not a re-parse of quantity.
        assert_eq!(limit_price, Usd::from_cents(10_000_00));
    }

    #[tokio::test]
    async fn parse_payload_rejections() {
        let base = StandingOrderPayload {
            kind: "buy".to_string(),
            quantity: "1.0".to_string(),
            limit_price: "10000.00".to_string(),
            webhook_url: None,
        };

        let cases = [
            (
                StandingOrderPayload {
                    kind: "hold".to_string(),
                    ..base.clone()
                },
                "InvalidOrderType",
            ),
            (
                StandingOrderPayload {
                    quantity: "abc".to_string(),
                    ..base.clone()
                },
                "MalformedAmount",
            ),
            (
                StandingOrderPayload {
                    limit_price: ".".to_string(),
                    ..base.clone()
                },
                "MalformedAmount",
            ),
            (
                StandingOrderPayload {
                    quantity: "0.0".to_string(),
                    ..base.clone()
                },
                "InvalidQuantity",
            ),
            (
                StandingOrderPayload {
                    limit_price: "-1.0".to_string(),
                    ..base.clone()
                },
                "NegativeLimitPrice",
            ),
        ];
        for (payload, expected_type) in cases {
            let reply = parse_payload(&payload).unwrap_err();
            let response = reply.into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = response_body(response).await;
            let body: serde_json::Value = serde_json::from_slice(body.as_slice()).unwrap();
            assert_eq!(body["errorType"], expected_type);
        }
    }
}
