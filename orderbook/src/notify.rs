//! Webhook dispatch for orders touched by a matching call.
//!
//! Dispatch happens on a detached task strictly after the engine
//! transaction has committed, holds no database state beyond the initial
//! order load, and never retries. Failures are logged and dropped.

use crate::exchange::Exchange;
use futures::future::join_all;
use model::StandingOrder;
use serde_json::json;
use std::sync::Arc;

pub struct Notifier {
    exchange: Arc<Exchange>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(exchange: Arc<Exchange>) -> Self {
        Self {
            exchange,
            client: reqwest::Client::new(),
        }
    }

    /// Posts `{"orderId": id}` to the webhook of every affected order that
    /// registered one.
    pub fn order_changes(&self, order_ids: Vec<i64>) {
        if order_ids.is_empty() {
            return;
        }
        let exchange = self.exchange.clone();
        let client = self.client.clone();
        tokio::task::spawn(async move {
            let orders = match exchange.standing_orders(&order_ids).await {
                Ok(orders) => orders,
                Err(err) => {
                    tracing::warn!(?err, "loading orders for webhook dispatch failed");
                    return;
                }
            };
            join_all(orders.iter().map(|order| deliver(&client, order))).await;
        });
    }
}

async fn deliver(client: &reqwest::Client, order: &StandingOrder) {
    let url = match &order.webhook_url {
        Some(url) => url,
        None => return,
    };
    let result = client
        .post(url)
        .json(&json!({ "orderId": order.id }))
        .send()
        .await;
    match result {
        Ok(response) => tracing::debug!(
            order_id = order.id,
            status = %response.status(),
            "webhook delivered"
        ),
        Err(err) => tracing::warn!(?err, order_id = order.id, "webhook delivery failed"),
    }
}
