use std::time::Duration;

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use tracing::instrument;
use tracing::warn;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Document POSTed to the fulfillment endpoint after a paid order.
#[derive(Debug, Serialize)]
pub struct FulfillmentNotice<'a> {
  pub order_id: i64,
  pub payload: &'a str,
  pub user_id: i64,
  pub product_id: Option<i64>,
  pub product_title: &'a str,
  pub amount_cents: i64,
  pub currency: &'a str,
  pub voucher_code: &'a str,
  pub paid_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FulfillmentClient {
  http: Client,
  endpoint: Option<String>,
}

impl FulfillmentClient {
  pub fn new(endpoint: Option<String>) -> Result<Self> {
    let http = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
    Ok(Self { http, endpoint })
  }

  #[allow(dead_code)]
  pub fn enabled(&self) -> bool {
    self.endpoint.is_some()
  }

  /// Best effort: delivery failures are logged and never surface to the
  /// payment path.
  #[instrument(skip(self, notice), fields(order_id = notice.order_id))]
  pub async fn notify_paid(&self, notice: &FulfillmentNotice<'_>) {
    let Some(endpoint) = self.endpoint.as_deref() else {
      return;
    };

    match self.http.post(endpoint).json(notice).send().await {
      Ok(response) if response.status().is_success() => {
        info!(order_id = notice.order_id, "fulfillment webhook delivered");
      },
      Ok(response) => {
        warn!(
          order_id = notice.order_id,
          status = %response.status(),
          "fulfillment webhook rejected"
        );
      },
      Err(err) => {
        warn!(error = %err, order_id = notice.order_id, "fulfillment webhook failed");
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::FulfillmentNotice;

  #[test]
  fn notice_serializes_expected_fields() {
    let notice = FulfillmentNotice {
      order_id: 12,
      payload: "7f12de9b-0000-4000-8000-000000000000",
      user_id: 42,
      product_id: Some(3),
      product_title: "Starter pack",
      amount_cents: 1999,
      currency: "USD",
      voucher_code: "AAAA-BBBB-CCCC-DDDD",
      paid_at: Utc::now(),
    };

    let value = serde_json::to_value(&notice).expect("serializable");
    assert_eq!(value["order_id"], 12);
    assert_eq!(value["product_title"], "Starter pack");
    assert_eq!(value["amount_cents"], 1999);
    assert_eq!(value["currency"], "USD");
    assert_eq!(value["voucher_code"], "AAAA-BBBB-CCCC-DDDD");
    assert!(value["paid_at"].is_string());
  }
}
