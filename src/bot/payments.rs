use std::sync::Arc;

use futures::future::join_all;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::types::LabeledPrice;
use teloxide::types::Message;
use teloxide::types::PreCheckoutQuery;
use thiserror::Error;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use uuid::Uuid;

use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::fulfillment::FulfillmentNotice;
use crate::models::OrderRow;
use crate::models::OrderStatus;
use crate::models::ProductRow;
use crate::util::format_cents;
use crate::util::generate_voucher_code;

type SharedContext = Arc<AppContext>;

#[derive(Debug, Error)]
pub enum CheckoutError {
  #[error(transparent)]
  Storage(#[from] anyhow::Error),
  #[error("failed to send invoice")]
  Invoice(#[from] teloxide::RequestError),
  #[error("payments are not configured")]
  PaymentsUnavailable,
  #[error("product not found")]
  ProductMissing,
  #[error("product is disabled")]
  ProductInactive,
  #[error("product is out of stock")]
  OutOfStock,
  #[error("unknown invoice payload")]
  UnknownOrder,
  #[error("order is not awaiting payment")]
  NotPending,
  #[error("invoice amount does not match the order")]
  AmountMismatch,
  #[error("price exceeds the invoiceable range")]
  PriceOutOfRange,
}

impl CheckoutError {
  pub fn user_message(&self) -> String {
    match self {
      Self::Storage(_) => "Temporary error, try again later.".to_string(),
      Self::Invoice(_) => "Failed to send the invoice, try again later.".to_string(),
      Self::PaymentsUnavailable => "💳 Payments are not set up yet. Check back later.".to_string(),
      Self::ProductMissing => "❓ Product not found.".to_string(),
      Self::ProductInactive => "🚫 This product is no longer available.".to_string(),
      Self::OutOfStock => "⛔ Sold out.".to_string(),
      Self::UnknownOrder => "❓ This invoice is not known to the shop.".to_string(),
      Self::NotPending => "ℹ️ This order was already processed.".to_string(),
      Self::AmountMismatch => "⚠️ The price changed, please request a new invoice.".to_string(),
      Self::PriceOutOfRange => "⚠️ This product cannot be invoiced right now.".to_string(),
    }
  }
}

/// Creates a pending order and sends the invoice for it. The invoice payload
/// is the order's uuid; everything later in the flow resolves through it.
#[instrument(skip(bot, ctx))]
pub async fn begin_checkout(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  user_id: i64,
  product_id: i64,
) -> Result<(), CheckoutError> {
  if !ctx.payments_enabled() {
    return Err(CheckoutError::PaymentsUnavailable);
  }

  let product = ctx
    .db()
    .get_product(product_id)
    .await?
    .ok_or(CheckoutError::ProductMissing)?;
  if !product.is_active {
    return Err(CheckoutError::ProductInactive);
  }
  if product.stock <= 0 {
    return Err(CheckoutError::OutOfStock);
  }
  let amount = invoice_amount(product.price_cents)?;

  let payload = Uuid::new_v4().to_string();
  let order_id = ctx
    .db()
    .create_order(
      &payload,
      user_id,
      product.id,
      &product.title,
      product.price_cents,
      ctx.currency_code(),
    )
    .await?;
  info!(order_id, user_id, product_id, "created pending order");

  let description = product.description.clone().unwrap_or_else(|| product.title.clone());
  let prices = vec![LabeledPrice {
    label: product.title.clone(),
    amount,
  }];

  let mut request = bot.send_invoice(
    chat,
    product.title.clone(),
    description,
    payload,
    ctx.currency(),
    prices,
  );
  request.provider_token = Some(ctx.provider_token().to_string());

  if let Err(err) = request.await {
    warn!(error = %err, order_id, "invoice send failed, cancelling order");
    ctx.db().mark_order_cancelled(order_id).await?;
    return Err(err.into());
  }

  info!(order_id, user_id, product_id, "invoice sent");
  Ok(())
}

/// Telegram fails the purchase unless the answer arrives within 10 seconds,
/// so the checks here are database-only.
#[instrument(skip(bot, ctx, query))]
pub async fn handle_pre_checkout(bot: Bot, ctx: SharedContext, query: PreCheckoutQuery) -> HandlerResult {
  let user_id = query.from.id.0 as i64;
  info!(user_id, payload = %query.invoice_payload, "handling pre-checkout query");

  let order = ctx.db().find_order_by_payload(&query.invoice_payload).await?;
  let product = match order.as_ref().and_then(|order| order.product_id) {
    Some(product_id) => ctx.db().get_product(product_id).await?,
    None => None,
  };

  let verdict = validate_pre_checkout(
    order.as_ref(),
    product.as_ref(),
    i64::from(query.total_amount),
    &currency_code(query.currency),
  );

  match verdict {
    Ok(()) => {
      bot.answer_pre_checkout_query(query.id, true).await?;
      info!(user_id, "pre-checkout accepted");
    },
    Err(err) => {
      warn!(user_id, reason = %err, "pre-checkout rejected");
      let mut request = bot.answer_pre_checkout_query(query.id, false);
      request.error_message = Some(err.user_message());
      request.await?;
    },
  }
  Ok(())
}

/// Telegram invoice amounts are u32; anything outside that range cannot be
/// charged and must not create a pending order.
fn invoice_amount(price_cents: i64) -> Result<u32, CheckoutError> {
  u32::try_from(price_cents).map_err(|_| CheckoutError::PriceOutOfRange)
}

fn validate_pre_checkout(
  order: Option<&OrderRow>,
  product: Option<&ProductRow>,
  total_amount_cents: i64,
  currency_code: &str,
) -> Result<(), CheckoutError> {
  let order = order.ok_or(CheckoutError::UnknownOrder)?;
  if order.status != OrderStatus::Pending {
    return Err(CheckoutError::NotPending);
  }

  let product = product.ok_or(CheckoutError::ProductMissing)?;
  if !product.is_active {
    return Err(CheckoutError::ProductInactive);
  }
  if product.stock <= 0 {
    return Err(CheckoutError::OutOfStock);
  }

  // The buyer accepted the invoice amount; a price edit in between must not
  // silently charge a different figure.
  if total_amount_cents != order.amount_cents || currency_code != order.currency {
    return Err(CheckoutError::AmountMismatch);
  }
  Ok(())
}

#[instrument(skip(bot, ctx, msg))]
pub async fn handle_successful_payment(bot: Bot, ctx: SharedContext, msg: Message) -> HandlerResult {
  let Some(payment) = msg.successful_payment() else {
    return Ok(());
  };

  let Some(order) = ctx.db().find_order_by_payload(&payment.invoice_payload).await? else {
    warn!(payload = %payment.invoice_payload, "successful payment with unknown payload");
    return Ok(());
  };

  // Telegram may redeliver the update; a paid order is final.
  if order.status == OrderStatus::Paid {
    info!(order_id = order.id, "payment already recorded");
    return Ok(());
  }

  let voucher_code = generate_voucher_code(&mut rand::thread_rng());
  ctx
    .db()
    .mark_order_paid(
      order.id,
      &voucher_code,
      &payment.telegram_payment_charge_id.0,
      &payment.provider_payment_charge_id,
    )
    .await?;
  info!(order_id = order.id, user_id = order.user_id, "order paid");

  let mut oversold = false;
  if let Some(product_id) = order.product_id {
    if ctx.db().take_stock_unit(product_id).await? {
      if let Some(product) = ctx.db().get_product(product_id).await?
        && product.stock == 0
      {
        ctx.db().deactivate_product(product_id).await?;
        info!(product_id, "product sold out and deactivated");
      }
    } else {
      // Payment was taken, so the order stays paid; flag it for the admins.
      warn!(order_id = order.id, product_id, "paid order found no stock to take");
      oversold = true;
    }
  }

  let confirmation = format!(
    "✅ Payment received: {} for {}.\n\n🎟 Your voucher code:\n{}",
    format_cents(order.amount_cents, &order.currency),
    order.product_title,
    voucher_code,
  );
  bot.send_message(msg.chat.id, confirmation).await?;

  let notice = FulfillmentNotice {
    order_id: order.id,
    payload: &order.payload,
    user_id: order.user_id,
    product_id: order.product_id,
    product_title: &order.product_title,
    amount_cents: order.amount_cents,
    currency: &order.currency,
    voucher_code: &voucher_code,
    paid_at: chrono::Utc::now(),
  };
  ctx.fulfillment().notify_paid(&notice).await;

  notify_admins_paid(&bot, &ctx, &order, oversold).await;
  Ok(())
}

async fn notify_admins_paid(bot: &Bot, ctx: &SharedContext, order: &OrderRow, oversold: bool) {
  let mut text = format!(
    "💰 Order #{} paid: {} — {}",
    order.id,
    order.product_title,
    format_cents(order.amount_cents, &order.currency),
  );
  if oversold {
    text.push_str("\n⚠️ No stock was left for this order, check the inventory.");
  }

  let sends = ctx
    .admin_ids()
    .into_iter()
    .map(|admin_id| {
      let text = text.clone();
      async move { (admin_id, bot.send_message(ChatId(admin_id), text).await) }
    })
    .collect::<Vec<_>>();

  for (admin_id, result) in join_all(sends).await {
    if let Err(err) = result {
      warn!(error = %err, admin_id, order_id = order.id, "failed to notify admin about paid order");
    }
  }
}

fn currency_code(currency: String) -> String {
  serde_json::to_value(&currency)
    .ok()
    .and_then(|value| value.as_str().map(str::to_owned))
    .unwrap_or_else(|| format!("{currency:?}"))
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::CheckoutError;
  use super::invoice_amount;
  use super::validate_pre_checkout;
  use crate::models::OrderRow;
  use crate::models::OrderStatus;
  use crate::models::ProductRow;

  fn order(status: OrderStatus) -> OrderRow {
    OrderRow {
      id: 1,
      payload: "payload".to_string(),
      user_id: 42,
      product_id: Some(7),
      product_title: "Starter pack".to_string(),
      amount_cents: 1999,
      currency: "USD".to_string(),
      status,
      voucher_code: None,
      telegram_charge_id: None,
      provider_charge_id: None,
      created_at: Utc::now(),
      paid_at: None,
    }
  }

  fn product(stock: i64, is_active: bool) -> ProductRow {
    ProductRow {
      id: 7,
      category_id: 1,
      title: "Starter pack".to_string(),
      description: None,
      price_cents: 1999,
      stock,
      image_file_id: None,
      is_active,
      is_new: false,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn accepts_matching_pending_order() {
    let order = order(OrderStatus::Pending);
    let product = product(3, true);
    assert!(validate_pre_checkout(Some(&order), Some(&product), 1999, "USD").is_ok());
  }

  #[test]
  fn rejects_unknown_payload() {
    let verdict = validate_pre_checkout(None, None, 1999, "USD");
    assert!(matches!(verdict, Err(CheckoutError::UnknownOrder)));
  }

  #[test]
  fn rejects_non_pending_order() {
    let order = order(OrderStatus::Paid);
    let product = product(3, true);
    let verdict = validate_pre_checkout(Some(&order), Some(&product), 1999, "USD");
    assert!(matches!(verdict, Err(CheckoutError::NotPending)));
  }

  #[test]
  fn rejects_missing_product() {
    let order = order(OrderStatus::Pending);
    let verdict = validate_pre_checkout(Some(&order), None, 1999, "USD");
    assert!(matches!(verdict, Err(CheckoutError::ProductMissing)));
  }

  #[test]
  fn rejects_inactive_product() {
    let order = order(OrderStatus::Pending);
    let product = product(3, false);
    let verdict = validate_pre_checkout(Some(&order), Some(&product), 1999, "USD");
    assert!(matches!(verdict, Err(CheckoutError::ProductInactive)));
  }

  #[test]
  fn rejects_sold_out_product() {
    let order = order(OrderStatus::Pending);
    let product = product(0, true);
    let verdict = validate_pre_checkout(Some(&order), Some(&product), 1999, "USD");
    assert!(matches!(verdict, Err(CheckoutError::OutOfStock)));
  }

  #[test]
  fn rejects_amount_mismatch() {
    let order = order(OrderStatus::Pending);
    let product = product(3, true);
    let verdict = validate_pre_checkout(Some(&order), Some(&product), 2099, "USD");
    assert!(matches!(verdict, Err(CheckoutError::AmountMismatch)));
  }

  #[test]
  fn invoice_amount_covers_the_u32_range_only() {
    assert!(matches!(invoice_amount(1999), Ok(1999)));
    assert!(matches!(invoice_amount(0), Ok(0)));
    assert!(matches!(
      invoice_amount(i64::from(u32::MAX) + 1),
      Err(CheckoutError::PriceOutOfRange)
    ));
    assert!(matches!(invoice_amount(-1), Err(CheckoutError::PriceOutOfRange)));
  }

  #[test]
  fn rejects_currency_mismatch() {
    let order = order(OrderStatus::Pending);
    let product = product(3, true);
    let verdict = validate_pre_checkout(Some(&order), Some(&product), 1999, "EUR");
    assert!(matches!(verdict, Err(CheckoutError::AmountMismatch)));
  }
}
