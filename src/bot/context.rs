use std::collections::HashSet;

use anyhow::Context;
use anyhow::Result;

use crate::config::Config;
use crate::db::Db;
use crate::fulfillment::FulfillmentClient;

#[derive(Clone)]
pub struct AppContext {
  db: Db,
  admins: HashSet<i64>,
  payment_provider_token: String,
  currency: String,
  currency_code: String,
  fulfillment: FulfillmentClient,
}

impl AppContext {
  pub fn new(db: Db, config: &Config) -> Result<Self> {
    let currency: String = serde_json::from_value(serde_json::Value::String(config.currency_code.clone()))
      .with_context(|| format!("unsupported currency code: {}", config.currency_code))?;
    let fulfillment = FulfillmentClient::new(config.fulfillment_url.clone())?;
    Ok(Self {
      db,
      admins: config.admins.iter().copied().collect(),
      payment_provider_token: config.payment_provider_token.clone(),
      currency,
      currency_code: config.currency_code.clone(),
      fulfillment,
    })
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub fn is_admin(&self, tg_id: i64) -> bool {
    self.admins.contains(&tg_id)
  }

  pub fn admin_ids(&self) -> Vec<i64> {
    self.admins.iter().copied().collect()
  }

  pub fn payments_enabled(&self) -> bool {
    !self.payment_provider_token.is_empty()
  }

  pub fn provider_token(&self) -> &str {
    &self.payment_provider_token
  }

  pub fn currency(&self) -> String {
    self.currency.clone()
  }

  pub fn currency_code(&self) -> &str {
    &self.currency_code
  }

  pub fn fulfillment(&self) -> &FulfillmentClient {
    &self.fulfillment
  }
}
