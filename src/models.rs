use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use teloxide::types::FileId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(dead_code)]
pub struct UserRow {
  pub id: i64, // tg id
  pub username: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub notifications_disabled: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRow {
  pub id: i64,
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRow {
  pub id: i64,
  pub category_id: i64,
  pub title: String,
  pub description: Option<String>,
  pub price_cents: i64,
  pub stock: i64,
  pub image_file_id: Option<FileId>,
  pub is_active: bool,
  pub is_new: bool,
  pub created_at: DateTime<Utc>,
}

impl ProductRow {
  pub fn is_purchasable(&self) -> bool {
    self.is_active && self.stock > 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Pending,
  Paid,
  Cancelled,
}

impl OrderStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "pending" => Some(Self::Pending),
      "paid" => Some(Self::Paid),
      "cancelled" => Some(Self::Cancelled),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRow {
  pub id: i64,
  pub payload: String,
  pub user_id: i64,
  pub product_id: Option<i64>,
  pub product_title: String,
  pub amount_cents: i64,
  pub currency: String,
  pub status: OrderStatus,
  pub voucher_code: Option<String>,
  pub telegram_charge_id: Option<String>,
  pub provider_charge_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub paid_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::OrderStatus;

  #[test]
  fn order_status_round_trips() {
    for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Cancelled] {
      assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
    }
  }

  #[test]
  fn unknown_status_is_rejected() {
    assert_eq!(OrderStatus::parse("refunded"), None);
  }
}
