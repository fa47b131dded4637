use std::env;

use anyhow::Context;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub database_path: String,
  pub payment_provider_token: String,
  pub currency_code: String,
  pub admins: Vec<i64>,
  pub fulfillment_url: Option<String>,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let bot_token = env::var("BOT_TOKEN")
      .or_else(|_| env::var("TELOXIDE_TOKEN"))
      .context("BOT_TOKEN or TELOXIDE_TOKEN must be set")?;
    let database_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "shop.db".to_string());
    let payment_provider_token = env::var("PAYMENT_PROVIDER_TOKEN").unwrap_or_default();
    let currency_code = normalize_currency(&env::var("CURRENCY").unwrap_or_default());
    let admins_raw = env::var("ADMIN_IDS").unwrap_or_default();
    let admins = parse_admins(&admins_raw);
    let fulfillment_url = env::var("FULFILLMENT_URL")
      .ok()
      .map(|url| url.trim().to_string())
      .filter(|url| !url.is_empty());
    Ok(Self {
      bot_token,
      database_path,
      payment_provider_token,
      currency_code,
      admins,
      fulfillment_url,
    })
  }
}

fn normalize_currency(raw: &str) -> String {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return "USD".to_string();
  }
  trimmed.to_ascii_uppercase()
}

fn parse_admins(raw: &str) -> Vec<i64> {
  raw
    .split(',')
    .filter_map(|id| {
      let trimmed = id.trim();
      if trimmed.is_empty() {
        return None;
      }
      match trimmed.parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
          tracing::warn!(value = trimmed, error = %err, "invalid ADMIN_IDS entry");
          None
        },
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::normalize_currency;
  use super::parse_admins;

  #[test]
  fn parses_valid_admins() {
    let admins = parse_admins("1, 2 ,3");
    assert_eq!(admins, vec![1, 2, 3]);
  }

  #[test]
  fn skips_invalid_entries() {
    let admins = parse_admins("42,abc,  7");
    assert_eq!(admins, vec![42, 7]);
  }

  #[test]
  fn empty_input_yields_empty_list() {
    let admins = parse_admins("");
    assert!(admins.is_empty());
  }

  #[test]
  fn currency_defaults_to_usd() {
    assert_eq!(normalize_currency(""), "USD");
    assert_eq!(normalize_currency("  "), "USD");
  }

  #[test]
  fn currency_is_uppercased() {
    assert_eq!(normalize_currency(" eur "), "EUR");
  }
}
