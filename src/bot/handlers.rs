use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::FileId;
use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::InputFile;
use teloxide::types::InputMedia;
use teloxide::types::InputMediaPhoto;
use teloxide::types::Message;
use teloxide::types::MessageEntity;
use teloxide::types::MessageId;
use teloxide::types::ParseMode;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use teloxide::utils::markdown;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::bot::payments;
use crate::bot::payments::CheckoutError;
use crate::bot::state::ConversationState;
use crate::bot::state::DraftStage;
use crate::bot::state::ProductDraft;
use crate::models::CategoryRow;
use crate::models::OrderRow;
use crate::models::OrderStatus;
use crate::models::ProductRow;
use crate::util::format_cents;
use crate::util::parse_money_to_cents;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const MAIN_MENU_TEXT: &str = "🛍 What would you like to do?";
const MEDIA_GROUP_BATCH: usize = 10;

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(
      dptree::filter(|msg: Message| msg.successful_payment().is_some())
        .endpoint(payments::handle_successful_payment),
    )
    .branch(dptree::case![ConversationState::AddProduct(draft)].endpoint(handle_add_product_message))
    .branch(dptree::case![ConversationState::AddCategory { admin_tg_id }].endpoint(handle_add_category_message))
    .branch(dptree::case![ConversationState::RemoveProduct { admin_tg_id }].endpoint(handle_remove_product_message))
    .branch(dptree::case![ConversationState::RemoveCategory { admin_tg_id }].endpoint(handle_remove_category_message))
    .branch(dptree::case![ConversationState::Broadcast { admin_tg_id }].endpoint(handle_broadcast_message))
    .branch(dptree::endpoint(handle_idle_text));

  let callback_handler = Update::filter_callback_query()
    .enter_dialogue::<CallbackQuery, DialogueStorage, ConversationState>()
    .endpoint(handle_callback_query);

  let pre_checkout_handler = Update::filter_pre_checkout_query().endpoint(payments::handle_pre_checkout);

  dptree::entry()
    .branch(message_handler)
    .branch(callback_handler)
    .branch(pre_checkout_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_start(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  dialogue.reset().await?;
  let user = msg.from.as_ref().context("message missing sender")?;
  ensure_user_record(&ctx, user).await?;
  let user_id = user.id.0 as i64;
  let username = user.username.as_deref().unwrap_or("-");
  info!(user_id, chat_id = %msg.chat.id, username, "received /start command");
  send_main_menu_message(&bot, &ctx, msg.chat.id, user_id).await
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str("\n\nEverything in the shop is available from the on-screen menu buttons. Use /start to open the menu again.");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn send_main_menu_message(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64) -> HandlerResult {
  bot
    .send_message(chat, MAIN_MENU_TEXT)
    .reply_markup(main_menu_keyboard(ctx, user_id))
    .await?;
  info!(user_id, chat_id = %chat, "sent main menu message");
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_main_menu(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  user_id: i64,
) -> HandlerResult {
  let keyboard = main_menu_keyboard(ctx, user_id);
  let request = bot
    .edit_message_text(chat, message_id, MAIN_MENU_TEXT)
    .reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(user_id, chat_id = %chat, message_id = %message_id, "updated main menu message"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(user_id, chat_id = %chat, message_id = %message_id, "main menu message already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

fn main_menu_keyboard(ctx: &SharedContext, user_id: i64) -> InlineKeyboardMarkup {
  let mut rows = vec![vec![InlineKeyboardButton::callback(
    "🗂️ Catalogue",
    "menu:catalogue".to_string(),
  )]];

  rows.push(vec![
    InlineKeyboardButton::callback("🧾 My orders", "menu:orders".to_string()),
    InlineKeyboardButton::callback("⚙️ My settings", "menu:settings".to_string()),
  ]);

  if ctx.is_admin(user_id) {
    rows.push(vec![InlineKeyboardButton::callback(
      "🛡️ Admin panel",
      "menu:admin".to_string(),
    )]);
  }

  InlineKeyboardMarkup::new(rows)
}

fn admin_menu_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![
    vec![
      InlineKeyboardButton::callback("🆕 Add category", "admin:add_category".to_string()),
      InlineKeyboardButton::callback("📦 Add product", "admin:add_product".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("🗑 Remove product", "admin:remove_product".to_string()),
      InlineKeyboardButton::callback("🗑 Remove category", "admin:remove_category".to_string()),
    ],
    vec![
      InlineKeyboardButton::callback("📢 Broadcast", "admin:broadcast".to_string()),
      InlineKeyboardButton::callback("🔔 Notify new arrivals", "admin:notify_new".to_string()),
    ],
    vec![InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string())],
  ])
}

fn main_menu_only_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
    "⬅️ Main menu",
    "menu:root".to_string(),
  )]])
}

fn settings_menu_keyboard(notifications_disabled: bool) -> InlineKeyboardMarkup {
  let toggle_label = if notifications_disabled {
    "🔔 Enable updates"
  } else {
    "🔕 Mute updates"
  };

  InlineKeyboardMarkup::new(vec![
    vec![InlineKeyboardButton::callback(
      toggle_label.to_string(),
      "settings:toggle_notifications".to_string(),
    )],
    vec![InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string())],
  ])
}

#[instrument(skip(bot, ctx))]
async fn show_catalogue_menu(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  update_categories_menu(bot, ctx, chat, message_id).await
}

#[instrument(skip(bot))]
async fn show_admin_menu(bot: &Bot, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let request = bot
    .edit_message_text(chat, message_id, "🛡️ Admin panel\n\nChoose an action:")
    .reply_markup(admin_menu_keyboard());
  match request.await {
    Ok(_) => info!(chat_id = %chat, message_id = %message_id, "updated admin menu"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = %message_id, "admin menu already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn show_settings_menu(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  user_id: i64,
) -> HandlerResult {
  let notifications_disabled = ctx.db().notifications_disabled(user_id).await?;
  let status_line = if notifications_disabled {
    "🔕 Notifications are OFF"
  } else {
    "🔔 Notifications are ON"
  };
  let hint_line = "Toggle below to control shop updates.";
  let request = bot
    .edit_message_text(
      chat,
      message_id,
      format!("⚙️ Settings\n\n{}\n{}", status_line, hint_line),
    )
    .reply_markup(settings_menu_keyboard(notifications_disabled));
  match request.await {
    Ok(_) => info!(chat_id = %chat, message_id = %message_id, "updated settings menu"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = %message_id, "settings menu already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

#[instrument(skip(bot, ctx))]
async fn send_orders_list(bot: &Bot, ctx: &SharedContext, chat: ChatId, user_id: i64) -> HandlerResult {
  let orders = ctx.db().list_orders_for_user(user_id).await?;

  if orders.is_empty() {
    info!(user_id, chat_id = %chat, "no orders to display");
    bot.send_message(chat, "🧾 You have not ordered anything yet.").await?;
    return Ok(());
  }

  info!(user_id, chat_id = %chat, count = orders.len(), "sending orders list");
  let mut text = format!("🧾 Your orders ({}):\n", orders.len());
  for order in &orders {
    text.push('\n');
    text.push_str(&render_order_line(order));
  }

  bot.send_message(chat, text).await?;
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg, draft))]
async fn handle_add_product_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  mut draft: ProductDraft,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != draft.admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this product creation can respond.")
      .await?;
    return Ok(());
  }

  let mut added_photo = false;
  if let Some(photo) = msg.photo().and_then(|photos| photos.last())
    && !draft.image_file_ids.iter().any(|existing| existing == &photo.file.id)
  {
    draft.image_file_ids.push(photo.file.id.clone());
    added_photo = true;
  }

  let text = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty());
  let chat_id = msg.chat.id;
  info!(
    admin_tg_id = draft.admin_tg_id,
    chat_id = %chat_id,
    stage = ?draft.stage,
    "handling add product input"
  );

  let Some(input) = text else {
    dialogue.update(ConversationState::AddProduct(draft.clone())).await?;
    if added_photo {
      bot
        .send_message(
          chat_id,
          format!("🖼️ Added photo. Total uploaded: {}.", draft.image_file_ids.len()),
        )
        .await?;
      info!(
        admin_tg_id = draft.admin_tg_id,
        chat_id = %chat_id,
        total_photos = draft.image_file_ids.len(),
        "stored new draft photo"
      );
    }
    return Ok(());
  };

  if is_cancel(input) {
    dialogue.reset().await?;
    bot.send_message(chat_id, "❌ Product creation cancelled.").await?;
    return Ok(());
  }

  if draft.stage == DraftStage::Category {
    let (category, _) = ensure_category(&ctx, input).await?;
    let prompt = select_category(&mut draft, &category);
    dialogue.update(ConversationState::AddProduct(draft)).await?;
    bot.send_message(chat_id, prompt).await?;
    return Ok(());
  }

  match advance_draft(&mut draft, input) {
    DraftStep::Prompt(prompt) => {
      dialogue.update(ConversationState::AddProduct(draft)).await?;
      bot.send_message(chat_id, prompt).await?;
    },
    DraftStep::Invalid(reason) => {
      bot.send_message(chat_id, reason).await?;
    },
    DraftStep::Complete => {
      let image_ids: Vec<String> = draft.image_file_ids.iter().map(|id| id.to_string()).collect();
      let product_id = ctx
        .db()
        .create_product(
          draft.category_id.context("missing category during draft completion")?,
          draft
            .title
            .as_deref()
            .context("missing title during draft completion")?,
          draft.description.as_deref(),
          draft.price_cents.context("missing price during draft completion")?,
          draft.stock.context("missing stock during draft completion")?,
          &image_ids,
        )
        .await?;
      dialogue.reset().await?;
      bot
        .send_message(chat_id, format!("Product created: #{product_id}"))
        .await?;
      match send_product(&bot, &ctx, chat_id, product_id).await {
        Ok(true) => {},
        Ok(false) => warn!(product_id, "product missing immediately after creation"),
        Err(err) => warn!(error = %err, product_id, "failed to present new product"),
      }
    },
  }

  Ok(())
}

#[derive(Debug, PartialEq)]
enum DraftStep {
  Prompt(&'static str),
  Invalid(String),
  Complete,
}

/// Applies one text input to the draft and moves it one stage forward.
/// Category selection resolves through the database and goes through
/// [`select_category`] instead.
fn advance_draft(draft: &mut ProductDraft, input: &str) -> DraftStep {
  match draft.stage {
    DraftStage::Category => DraftStep::Invalid("🗂️ Please provide a category name.".to_string()),
    DraftStage::Title => {
      draft.title = Some(input.to_string());
      draft.stage = DraftStage::Description;
      DraftStep::Prompt("🧾 Enter description (or '-' to skip):")
    },
    DraftStage::Description => {
      draft.description = (input != "-").then(|| input.to_string());
      draft.stage = DraftStage::Price;
      DraftStep::Prompt("💰 Enter price (e.g., 19.99):")
    },
    DraftStage::Price => match parse_money_to_cents(input) {
      Ok(value) => {
        draft.price_cents = Some(value);
        draft.stage = DraftStage::Stock;
        DraftStep::Prompt("📦 Enter stock quantity:")
      },
      Err(err) => DraftStep::Invalid(format!("⚠️ Invalid price: {err}")),
    },
    DraftStage::Stock => match input.parse::<i64>() {
      Ok(value) if value >= 0 => {
        draft.stock = Some(value);
        DraftStep::Complete
      },
      _ => DraftStep::Invalid("🔢 Provide a non-negative whole number.".to_string()),
    },
  }
}

fn select_category(draft: &mut ProductDraft, category: &CategoryRow) -> &'static str {
  draft.category_id = Some(category.id);
  draft.category_name = Some(category.name.clone());
  draft.stage = DraftStage::Title;
  "📝 Enter product title:"
}

fn is_cancel(input: &str) -> bool {
  input.eq_ignore_ascii_case("cancel")
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_add_category_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "🆕 Send the new category name or type cancel to stop.")
      .await?;
    return Ok(());
  };

  info!(admin_tg_id, chat_id = %msg.chat.id, "processing add category input");

  if is_cancel(raw_text) {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Category creation cancelled.").await?;
    return Ok(());
  }

  let (category, existing) = ensure_category(&ctx, raw_text).await?;
  info!(admin_tg_id, category_id = category.id, existing, "ensured category");
  dialogue.reset().await?;

  let response = if existing {
    format!("⚠️ Category already exists: {} (#{})", category.name, category.id)
  } else {
    format!("✅ Category created: {} (#{})", category.name, category.id)
  };

  bot.send_message(msg.chat.id, response).await?;
  Ok(())
}

fn build_category_picker_keyboard(categories: &[CategoryRow]) -> InlineKeyboardMarkup {
  let mut rows = Vec::new();

  for chunk in categories.chunks(2) {
    rows.push(
      chunk
        .iter()
        .map(|c| InlineKeyboardButton::callback(c.name.clone(), format!("pickcat:{}", c.id)))
        .collect::<Vec<_>>(),
    );
  }

  // footer
  let mut footer = vec![InlineKeyboardButton::callback(
    "➕ New category",
    "pickcat:new".to_string(),
  )];

  footer.push(InlineKeyboardButton::callback("⬅️ Main menu", "menu:root".to_string()));

  rows.push(footer);
  InlineKeyboardMarkup::new(rows)
}

#[instrument(skip(bot, ctx))]
async fn send_category_picker_message(bot: &Bot, ctx: &SharedContext, chat: ChatId) -> HandlerResult {
  let categories = ctx.db().list_categories().await?;
  if categories.is_empty() {
    info!(chat_id = %chat, "no categories to show in picker");
    bot
      .send_message(
        chat,
        "🗂️ No categories yet.\nSend a new category name, or /cancel to stop.",
      )
      .await?;
  } else {
    info!(chat_id = %chat, count = categories.len(), "sending category picker");
    let kb = build_category_picker_keyboard(&categories);
    let txt = format!(
      "🗂️ Choose a category \\(or tap {}\\):",
      markdown::bold("➕ New category")
    );
    bot
      .send_message(chat, txt)
      .parse_mode(ParseMode::MarkdownV2)
      .reply_markup(kb)
      .await?;
  }
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_remove_product_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(msg.chat.id, "🗑 Send the product ID to remove or type cancel to stop.")
      .await?;
    return Ok(());
  };

  info!(admin_tg_id, chat_id = %msg.chat.id, "processing remove product input");
  if is_cancel(raw_text) {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Product removal cancelled.").await?;
    info!(admin_tg_id, chat_id = %msg.chat.id, "remove product cancelled by admin");
    return Ok(());
  }

  let product_id: i64 = match raw_text.parse() {
    Ok(value) => value,
    Err(_) => {
      bot.send_message(msg.chat.id, "🔢 Provide a numeric product ID.").await?;
      return Ok(());
    },
  };

  if ctx.db().delete_product(product_id).await? {
    dialogue.reset().await?;
    info!(admin_tg_id, product_id, "product removed");
    bot
      .send_message(
        msg.chat.id,
        format!("🗑 Product #{product_id} removed. Past orders keep their records."),
      )
      .await?;
  } else {
    info!(admin_tg_id, product_id, "product not found for removal");
    bot
      .send_message(msg.chat.id, "❓ Product not found or already removed.")
      .await?;
  }

  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_remove_category_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
    bot
      .send_message(
        msg.chat.id,
        "🗑 Send the category name to remove or type cancel to stop.",
      )
      .await?;
    return Ok(());
  };

  info!(admin_tg_id, chat_id = %msg.chat.id, "processing remove category input");
  if is_cancel(raw_text) {
    dialogue.reset().await?;
    bot.send_message(msg.chat.id, "❌ Category removal cancelled.").await?;
    info!(admin_tg_id, chat_id = %msg.chat.id, "remove category cancelled by admin");
    return Ok(());
  }

  let Some(category) = ctx.db().find_category_by_name(raw_text).await? else {
    bot.send_message(msg.chat.id, "❓ Category not found.").await?;
    return Ok(());
  };

  info!(admin_tg_id, category_id = category.id, "category found for removal");

  let product_count = ctx.db().list_products_by_category(category.id).await?.len();
  info!(admin_tg_id, category_id = category.id, product_count, "removing category");
  if ctx.db().delete_category(category.id).await? {
    dialogue.reset().await?;
    info!(admin_tg_id, category_id = category.id, product_count, "category removed");
    bot
      .send_message(
        msg.chat.id,
        format!(
          "🗑 Category '{}' removed along with {} product(s). Past orders keep their records.",
          category.name, product_count
        ),
      )
      .await?;
  } else {
    info!(admin_tg_id, category_id = category.id, "category not removed");
    bot
      .send_message(msg.chat.id, "❓ Category not found or already removed.")
      .await?;
  }

  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_broadcast_message(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  admin_tg_id: i64,
) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  if user.id.0 as i64 != admin_tg_id {
    bot
      .send_message(msg.chat.id, "Only the admin who started this action can respond.")
      .await?;
    return Ok(());
  }

  let Some(raw_text) = message_text(&msg) else {
    bot
      .send_message(
        msg.chat.id,
        "📢 Send the announcement text (formatting will be preserved).",
      )
      .await?;
    return Ok(());
  };

  let text = raw_text.to_string();
  let entities: Vec<MessageEntity> = msg.entities().map(|slice| slice.to_vec()).unwrap_or_default();

  let recipients = ctx.db().list_user_ids().await?;
  info!(
    admin_tg_id,
    recipient_count = recipients.len(),
    "preparing broadcast message"
  );

  if recipients.is_empty() {
    dialogue.reset().await?;
    bot
      .send_message(msg.chat.id, "📢 No users are registered to receive the announcement.")
      .await?;
    return Ok(());
  }

  let delivered = broadcast_text(&bot, &recipients, &text, (!entities.is_empty()).then_some(&entities)).await;

  dialogue.reset().await?;
  bot
    .send_message(msg.chat.id, format!("📢 Broadcast sent to {delivered} user(s)."))
    .await?;
  Ok(())
}

#[instrument(skip(bot, msg))]
async fn handle_idle_text(bot: Bot, msg: Message, state: ConversationState) -> HandlerResult {
  if matches!(state, ConversationState::Idle)
    && let Some(text) = msg.text()
  {
    if text.starts_with('/') {
      // unknown command, ignore to let telegram handle
    } else {
      info!(chat_id = %msg.chat.id, "idle state received unrecognized message");
      bot
        .send_message(msg.chat.id, "I did not understand that. Use the menu buttons or /help.")
        .await?;
    }
  }
  Ok(())
}

/// Callback prefixes that mutate the catalogue or message other users.
/// `pickcat` feeds the product-creation draft, so it is gated too.
fn admin_only_callback(prefix: &str) -> bool {
  matches!(prefix, "admin" | "pickcat")
}

#[instrument(skip(bot, ctx, dialogue, query))]
async fn handle_callback_query(
  bot: Bot,
  ctx: SharedContext,
  query: CallbackQuery,
  dialogue: BotDialogue,
) -> HandlerResult {
  ensure_user_record(&ctx, &query.from).await?;
  let mut callback_text: Option<String> = None;
  let user_id = query.from.id.0 as i64;
  let message_ctx = query.message.as_ref().map(|message| (message.chat().id, message.id()));
  let callback_data = query.data.as_deref().unwrap_or("<empty>");
  if let Some((chat_id, _)) = message_ctx {
    info!(user_id, chat_id = %chat_id, callback = callback_data, "handling callback query");
  } else {
    info!(
      user_id,
      callback = callback_data,
      "handling callback query without message context"
    );
  }

  if let Some(data) = query.data.as_deref()
    && let Some((prefix, value)) = data.split_once(':')
  {
    // Callback data arrives unvalidated; a modified client can send any
    // prefix regardless of which keyboard was shown.
    if admin_only_callback(prefix) && !ctx.is_admin(user_id) {
      warn!(user_id, callback = callback_data, "admin-only callback from non-admin");
      bot.answer_callback_query(query.id).text("🛡️ Admins only.").await?;
      return Ok(());
    }

    match prefix {
      "menu" => match value {
        "root" => {
          dialogue.reset().await?;
          if let Some((chat_id, message_id)) = message_ctx {
            show_main_menu(&bot, &ctx, chat_id, message_id, user_id).await?;
          }
        },
        "catalogue" => {
          dialogue.reset().await?;
          if let Some((chat_id, message_id)) = message_ctx {
            show_catalogue_menu(&bot, &ctx, chat_id, message_id).await?;
          }
        },
        "orders" => {
          if let Some((chat_id, _)) = message_ctx {
            send_orders_list(&bot, &ctx, chat_id, user_id).await?;
            callback_text = Some("🧾 Sent your orders.".to_string());
          }
        },
        "settings" => {
          dialogue.reset().await?;
          if let Some((chat_id, message_id)) = message_ctx {
            show_settings_menu(&bot, &ctx, chat_id, message_id, user_id).await?;
          }
        },
        "admin" => {
          if ctx.is_admin(user_id) {
            dialogue.reset().await?;
            if let Some((chat_id, message_id)) = message_ctx {
              show_admin_menu(&bot, chat_id, message_id).await?;
            }
          } else {
            callback_text = Some("🛡️ Admins only.".to_string());
          }
        },
        _ => {},
      },
      "admin" => match value {
        "add_category" => {
          dialogue.reset().await?;
          dialogue
            .update(ConversationState::AddCategory { admin_tg_id: user_id })
            .await?;
          if let Some((chat_id, _)) = message_ctx {
            bot.send_message(chat_id, "🆕 Send the new category name:").await?;
          }
          callback_text = Some("🆕 Waiting for category name.".to_string());
        },
        "add_product" => {
          dialogue.reset().await?;
          dialogue
            .update(ConversationState::AddProduct(ProductDraft::new(user_id)))
            .await?;
          if let Some((chat_id, _)) = message_ctx {
            // show picker
            send_category_picker_message(&bot, &ctx, chat_id).await?;
          }
          callback_text = Some("📦 Starting product creation.".to_string());
        },
        "remove_product" => {
          dialogue.reset().await?;
          dialogue
            .update(ConversationState::RemoveProduct { admin_tg_id: user_id })
            .await?;
          if let Some((chat_id, _)) = message_ctx {
            bot
              .send_message(
                chat_id,
                "🗑 Send the product ID to remove (photos will also be removed). Type cancel to stop.",
              )
              .await?;
          }
          callback_text = Some("🗑 Awaiting product ID to remove.".to_string());
        },
        "remove_category" => {
          dialogue.reset().await?;
          dialogue
            .update(ConversationState::RemoveCategory { admin_tg_id: user_id })
            .await?;
          if let Some((chat_id, _)) = message_ctx {
            bot
              .send_message(
                chat_id,
                "🗑 Send the category name to remove (all products under it will be deleted). Type cancel to stop.",
              )
              .await?;
          }
          callback_text = Some("🗑 Awaiting category name to remove.".to_string());
        },
        "broadcast" => {
          dialogue.reset().await?;
          dialogue
            .update(ConversationState::Broadcast { admin_tg_id: user_id })
            .await?;
          if let Some((chat_id, _)) = message_ctx {
            bot
              .send_message(chat_id, "📢 Send the announcement text to broadcast to all users.")
              .await?;
          }
          callback_text = Some("📢 Waiting for announcement text.".to_string());
        },
        "notify_new" => {
          dialogue.reset().await?;
          callback_text = Some(notify_new_arrivals(&bot, &ctx, message_ctx, user_id).await?);
        },
        _ => {},
      },
      "pickcat" => {
        if let Some((chat_id, _message_id)) = message_ctx {
          match value {
            "new" => {
              let state = dialogue.get().await?;
              if !matches!(state, Some(ConversationState::AddProduct(_))) {
                dialogue
                  .update(ConversationState::AddProduct(ProductDraft::new(user_id)))
                  .await?;
              }
              bot
                .send_message(chat_id, "🆕 Send the new category name (or type cancel).")
                .await?;
              callback_text = Some("🆕 Waiting for category name.".to_string());
            },
            id_str => {
              if let Ok(category_id) = id_str.parse::<i64>() {
                let categories = ctx.db().list_categories().await?;
                if let Some(category) = categories.into_iter().find(|c| c.id == category_id) {
                  let mut draft = match dialogue.get().await? {
                    Some(ConversationState::AddProduct(draft)) => draft,
                    _ => ProductDraft::new(user_id),
                  };
                  let prompt = select_category(&mut draft, &category);
                  dialogue.update(ConversationState::AddProduct(draft)).await?;
                  bot.send_message(chat_id, prompt).await?;
                  callback_text = Some("🗂️ Category selected.".to_string());
                } else {
                  callback_text = Some("❓ Category not found".to_string());
                }
              }
            },
          }
        }
      },
      "cat" => {
        if let Ok(category_id) = value.parse::<i64>()
          && let Some((chat_id, message_id)) = message_ctx
        {
          let categories = ctx.db().list_categories().await?;
          if let Some(category) = categories.into_iter().find(|c| c.id == category_id) {
            show_category_products_menu(&bot, &ctx, chat_id, message_id, category.id, category.name.as_str()).await?;
          } else {
            callback_text = Some("❓ Category not found".to_string());
          }
        }
      },
      "product" => {
        if let Ok(product_id) = value.parse::<i64>()
          && let Some((chat_id, _)) = message_ctx
          && !send_product(&bot, &ctx, chat_id, product_id).await?
        {
          callback_text = Some("❓ Product not found".to_string());
        }
      },
      "img" => {
        let mut parts = value.split(':');
        if let (Some(product_str), Some(offset_str)) = (parts.next(), parts.next())
          && let (Ok(product_id), Ok(offset)) = (product_str.parse::<i64>(), offset_str.parse::<usize>())
        {
          let images = ctx.db().list_product_images(product_id).await?;
          if let Some((chat_id, message_id)) = message_ctx {
            let total = images.len();
            if offset >= total {
              let request = bot
                .edit_message_text(chat_id, message_id, "📷 All images shown.")
                .reply_markup(InlineKeyboardMarkup::default());
              if let Err(err) = request.await
                && !matches!(err, RequestError::Api(ApiError::MessageNotModified))
              {
                return Err(err.into());
              }
              callback_text = Some("📷 All images already shown.".to_string());
            } else {
              let next = send_product_images_chunk(&bot, chat_id, &images, offset).await?;
              if next < total {
                let remaining = total - next;
                let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                  format!("Show more images ({remaining})"),
                  format!("img:{product_id}:{next}"),
                )]]);
                let request = bot
                  .edit_message_text(chat_id, message_id, format!("📷 {remaining} more photo(s) available."))
                  .reply_markup(keyboard);
                if let Err(err) = request.await
                  && !matches!(err, RequestError::Api(ApiError::MessageNotModified))
                {
                  return Err(err.into());
                }
              } else {
                let request = bot
                  .edit_message_text(chat_id, message_id, "📷 All images shown.")
                  .reply_markup(InlineKeyboardMarkup::default());
                if let Err(err) = request.await
                  && !matches!(err, RequestError::Api(ApiError::MessageNotModified))
                {
                  return Err(err.into());
                }
              }
              callback_text = Some("📷 Sent more photos.".to_string());
            }
          }
        }
      },
      "back" => {
        if value == "categories"
          && let Some((chat_id, message_id)) = message_ctx
        {
          show_catalogue_menu(&bot, &ctx, chat_id, message_id).await?;
        }
      },
      "buy" => {
        if let Ok(product_id) = value.parse::<i64>()
          && let Some((chat_id, _)) = message_ctx
        {
          match payments::begin_checkout(&bot, &ctx, chat_id, user_id, product_id).await {
            Ok(()) => callback_text = Some("🧾 Invoice sent.".to_string()),
            Err(CheckoutError::Storage(err)) => {
              warn!(error = %err, product_id, user_id, "storage error during checkout");
              callback_text = Some(CheckoutError::Storage(err).user_message());
            },
            Err(CheckoutError::Invoice(err)) => {
              warn!(error = %err, product_id, user_id, "invoice error during checkout");
              callback_text = Some(CheckoutError::Invoice(err).user_message());
            },
            Err(other) => callback_text = Some(other.user_message()),
          }
        }
      },
      "settings" => match value {
        "toggle_notifications" => {
          let currently_disabled = ctx.db().notifications_disabled(user_id).await?;
          let next = !currently_disabled;
          ctx.db().set_notifications_disabled(user_id, next).await?;
          if let Some((chat_id, message_id)) = message_ctx {
            show_settings_menu(&bot, &ctx, chat_id, message_id, user_id).await?;
          }
          callback_text = Some(if next {
            "🔕 Notifications muted.".to_string()
          } else {
            "🔔 Notifications enabled.".to_string()
          });
        },
        _ => {},
      },
      _ => {},
    }
  }

  if let Some(text) = callback_text {
    bot.answer_callback_query(query.id).text(text).await?;
  } else {
    bot.answer_callback_query(query.id).await?;
  }
  Ok(())
}

async fn notify_new_arrivals(
  bot: &Bot,
  ctx: &SharedContext,
  message_ctx: Option<(ChatId, MessageId)>,
  admin_tg_id: i64,
) -> Result<String> {
  let new_products = ctx.db().list_new_products().await?;
  if new_products.is_empty() {
    if let Some((chat_id, _)) = message_ctx {
      bot
        .send_message(chat_id, "🔔 No new arrivals are marked for notification.")
        .await?;
    }
    return Ok("🔔 No new arrivals.".to_string());
  }

  let user_ids = ctx.db().list_user_ids().await?;
  let recipients = ctx.db().filter_notifications_allowed(&user_ids).await?;
  if recipients.is_empty() {
    if let Some((chat_id, _)) = message_ctx {
      bot
        .send_message(chat_id, "🔔 No users are subscribed to receive the update.")
        .await?;
    }
    return Ok("🔔 No subscribed users.".to_string());
  }

  let mut announcement = String::from("🆕 New arrivals in the shop!\n\n");
  for product in &new_products {
    let line = format!(
      "• #{} {} — {}\n",
      product.id,
      product.title,
      format_cents(product.price_cents, ctx.currency_code())
    );
    announcement.push_str(&line);
  }

  info!(
    admin_tg_id,
    product_count = new_products.len(),
    recipient_count = recipients.len(),
    "broadcasting new arrivals"
  );
  let delivered = broadcast_text(bot, &recipients, &announcement, None).await;
  let ids: Vec<i64> = new_products.iter().map(|product| product.id).collect();
  ctx.db().clear_new_product_flags(&ids).await?;

  if let Some((chat_id, _)) = message_ctx {
    bot
      .send_message(
        chat_id,
        format!(
          "🔔 Notified {delivered} user(s) about {} new product(s).",
          new_products.len()
        ),
      )
      .await?;
  }
  Ok("🔔 Notification sent.".to_string())
}

async fn update_categories_menu(bot: &Bot, ctx: &SharedContext, chat: ChatId, message_id: MessageId) -> HandlerResult {
  let categories = ctx.db().list_categories().await?;
  if categories.is_empty() {
    let request = bot
      .edit_message_text(chat, message_id, "🗂️ No categories yet. Check back soon.")
      .reply_markup(main_menu_only_keyboard());
    match request.await {
      Ok(_) => info!(chat_id = %chat, message_id = %message_id, "rendered empty categories menu"),
      Err(RequestError::Api(ApiError::MessageNotModified)) => {
        info!(chat_id = %chat, message_id = %message_id, "categories menu already empty");
        return Ok(());
      },
      Err(err) => return Err(err.into()),
    }
  } else {
    let keyboard = build_categories_keyboard(&categories);
    let request = bot
      .edit_message_text(chat, message_id, "🗂️ Choose a category:")
      .reply_markup(keyboard);
    match request.await {
      Ok(_) => info!(chat_id = %chat, message_id = %message_id, count = categories.len(), "rendered categories menu"),
      Err(RequestError::Api(ApiError::MessageNotModified)) => {
        info!(chat_id = %chat, message_id = %message_id, "categories menu already current");
        return Ok(());
      },
      Err(err) => return Err(err.into()),
    }
  }
  Ok(())
}

async fn show_category_products_menu(
  bot: &Bot,
  ctx: &SharedContext,
  chat: ChatId,
  message_id: MessageId,
  category_id: i64,
  category_name: &str,
) -> HandlerResult {
  let products = ctx.db().list_products_by_category(category_id).await?;
  info!(category_id, count = products.len(), chat_id = %chat, "rendering category products menu");
  let text = if products.is_empty() {
    format!("🗂️ Category: {category_name}\n📭 No products in this category yet.")
  } else {
    format!("🗂️ Category: {category_name}\n🛍️ Select a product:")
  };
  let keyboard = build_products_keyboard(ctx, &products);
  let request = bot.edit_message_text(chat, message_id, text).reply_markup(keyboard);
  match request.await {
    Ok(_) => info!(category_id, chat_id = %chat, message_id = %message_id, "rendered category products menu"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(category_id, chat_id = %chat, message_id = %message_id, "category products menu already current");
      return Ok(());
    },
    Err(err) => return Err(err.into()),
  }
  Ok(())
}

fn build_categories_keyboard(categories: &[CategoryRow]) -> InlineKeyboardMarkup {
  let mut rows = categories
    .chunks(2)
    .map(|row| {
      row
        .iter()
        .map(|category| InlineKeyboardButton::callback(category.name.clone(), format!("cat:{}", category.id)))
        .collect::<Vec<_>>()
    })
    .collect::<Vec<_>>();

  rows.push(vec![InlineKeyboardButton::callback(
    "⬅️ Main menu",
    "menu:root".to_string(),
  )]);

  InlineKeyboardMarkup::new(rows)
}

fn build_products_keyboard(ctx: &SharedContext, products: &[ProductRow]) -> InlineKeyboardMarkup {
  let mut sorted: Vec<&ProductRow> = products.iter().collect();
  sorted.sort_by_key(|product| !product.is_purchasable());

  let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
  for product in sorted {
    let mut label = format!(
      "{}{} — {}",
      if product.is_purchasable() { "" } else { "🔴 " },
      format_cents(product.price_cents, ctx.currency_code()),
      &product.title
    );
    label = truncate_button_text(&label, 48);

    rows.push(vec![InlineKeyboardButton::callback(
      label,
      format!("product:{}", product.id),
    )]);
  }

  rows.push(vec![
    InlineKeyboardButton::callback("⬅️ Categories".to_string(), "back:categories".to_string()),
    InlineKeyboardButton::callback("⬅️ Main menu".to_string(), "menu:root".to_string()),
  ]);

  InlineKeyboardMarkup::new(rows)
}

fn truncate_button_text(text: &str, max_chars: usize) -> String {
  if text.chars().count() <= max_chars {
    return text.to_string();
  }

  let guarded = max_chars.saturating_sub(3);
  if guarded == 0 {
    return "...".to_string();
  }

  let truncated: String = text.chars().take(guarded).collect();
  format!("{truncated}...")
}

async fn send_product(bot: &Bot, ctx: &SharedContext, chat: ChatId, product_id: i64) -> Result<bool> {
  let Some(product) = ctx.db().get_product(product_id).await? else {
    return Ok(false);
  };
  let text = render_product_message(&product, ctx.currency_code());
  let keyboard = product_action_keyboard(&product, ctx.payments_enabled());

  bot
    .send_message(chat, text.clone())
    .parse_mode(ParseMode::MarkdownV2)
    .reply_markup(keyboard)
    .await?;

  let mut images = ctx.db().list_product_images(product.id).await?;
  if images.is_empty()
    && let Some(legacy_cover) = product.image_file_id.clone()
  {
    images.push(legacy_cover);
  }

  if !images.is_empty() {
    let next_offset = send_product_images_chunk(bot, chat, &images, 0).await?;
    if next_offset < images.len() {
      send_more_images_prompt(bot, chat, product.id, next_offset, images.len()).await?;
    }
  }

  Ok(true)
}

async fn send_product_images_chunk(bot: &Bot, chat: ChatId, images: &[FileId], start: usize) -> Result<usize> {
  if start >= images.len() {
    return Ok(start);
  }

  let end = (start + MEDIA_GROUP_BATCH).min(images.len());
  let media = images[start .. end]
    .iter()
    .map(|file_id| InputMedia::Photo(InputMediaPhoto::new(InputFile::file_id(file_id.clone()))))
    .collect::<Vec<_>>();

  bot.send_media_group(chat, media).await?;
  Ok(end)
}

async fn send_more_images_prompt(
  bot: &Bot,
  chat: ChatId,
  product_id: i64,
  next_offset: usize,
  total: usize,
) -> HandlerResult {
  let remaining = total.saturating_sub(next_offset);
  let text = format!("📷 {remaining} more photo(s) available.");
  let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
    format!("Show more images ({remaining})"),
    format!("img:{product_id}:{next_offset}"),
  )]]);
  bot.send_message(chat, text).reply_markup(keyboard).await?;
  Ok(())
}

fn render_product_message(product: &ProductRow, currency: &str) -> String {
  let escaped_id = markdown::escape(&format!("#{}", product.id));
  let escaped_title = markdown::escape(&product.title);
  let escaped_price = markdown::escape(&format_cents(product.price_cents, currency));

  let mut text = format!("🛍 *{}* — *{}*", escaped_id, escaped_title);

  if let Some(description) = product.description.as_deref()
    && !description.trim().is_empty()
  {
    let escaped_description = markdown::escape(description);
    text.push_str(&format!("\n\n{}", escaped_description));
  }

  text.push_str(&format!("\n\n💰 Price: {}", escaped_price));

  let stock_line = if !product.is_active {
    "🚫 Unavailable".to_string()
  } else if product.stock == 0 {
    "⛔ Sold out".to_string()
  } else {
    markdown::escape(&format!("📦 In stock: {}", product.stock))
  };
  text.push_str(&format!("\n{}", stock_line));

  if product.is_new {
    let line = markdown::escape("🆕 New arrival");
    text.push_str(&format!("\n{}", line));
  }

  text
}

fn product_action_keyboard(product: &ProductRow, payments_enabled: bool) -> InlineKeyboardMarkup {
  if product.is_purchasable() && payments_enabled {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
      "💳 Buy",
      format!("buy:{}", product.id),
    )]])
  } else {
    InlineKeyboardMarkup::default()
  }
}

fn render_order_line(order: &OrderRow) -> String {
  let status = match order.status {
    OrderStatus::Pending => "⏳ pending",
    OrderStatus::Paid => "✅ paid",
    OrderStatus::Cancelled => "❌ cancelled",
  };
  let mut line = format!(
    "#{} — {} — {} — {} ({})",
    order.id,
    order.product_title,
    format_cents(order.amount_cents, &order.currency),
    status,
    order.created_at.format("%Y-%m-%d"),
  );
  if order.status == OrderStatus::Paid
    && let Some(code) = order.voucher_code.as_deref()
  {
    line.push_str(&format!("\n   🎟 {code}"));
  }
  line
}

async fn broadcast_text(bot: &Bot, user_ids: &[i64], text: &str, entities: Option<&[MessageEntity]>) -> usize {
  let mut delivered = 0usize;
  let payload = text.to_string();
  let entity_payload = entities.map(|data| data.to_vec());
  for user_id in user_ids {
    let mut request = bot.send_message(ChatId(*user_id), payload.clone());
    if let Some(entities) = &entity_payload {
      request = request.entities(entities.clone());
    }
    match request.await {
      Ok(_) => {
        delivered += 1;
      },
      Err(err) => {
        warn!(error = %err, target_user_id = user_id, "failed to deliver broadcast");
      },
    }
  }
  delivered
}

async fn ensure_user_record(ctx: &SharedContext, user: &User) -> Result<()> {
  ctx
    .db()
    .upsert_user(
      user.id.0 as i64,
      user.username.clone(),
      Some(user.first_name.clone()),
      user.last_name.clone(),
    )
    .await
    .context("failed to upsert user record")
}

async fn ensure_category(ctx: &SharedContext, name: &str) -> Result<(CategoryRow, bool)> {
  if let Some(existing) = ctx.db().find_category_by_name(name).await? {
    return Ok((existing, true));
  }
  let id = ctx.db().create_category(name).await?;
  Ok((
    CategoryRow {
      id,
      name: name.to_string(),
    },
    false,
  ))
}

fn message_text(msg: &Message) -> Option<&str> {
  msg.text().or_else(|| msg.caption())
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::DraftStep;
  use super::admin_only_callback;
  use super::advance_draft;
  use super::is_cancel;
  use super::product_action_keyboard;
  use super::render_order_line;
  use super::render_product_message;
  use super::select_category;
  use super::truncate_button_text;
  use crate::bot::state::DraftStage;
  use crate::bot::state::ProductDraft;
  use crate::models::CategoryRow;
  use crate::models::OrderRow;
  use crate::models::OrderStatus;
  use crate::models::ProductRow;

  fn product(stock: i64, is_active: bool) -> ProductRow {
    ProductRow {
      id: 1,
      category_id: 1,
      title: "Test".to_string(),
      description: Some("Description".to_string()),
      price_cents: 1999,
      stock,
      image_file_id: None,
      is_active,
      is_new: false,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn renders_buy_button_only_when_purchasable() {
    let keyboard = product_action_keyboard(&product(3, true), true);
    assert!(!keyboard.inline_keyboard.is_empty());

    let sold_out = product_action_keyboard(&product(0, true), true);
    assert!(sold_out.inline_keyboard.is_empty());

    let inactive = product_action_keyboard(&product(3, false), true);
    assert!(inactive.inline_keyboard.is_empty());

    let no_payments = product_action_keyboard(&product(3, true), false);
    assert!(no_payments.inline_keyboard.is_empty());
  }

  #[test]
  fn renders_product_text() {
    let text = render_product_message(&product(3, true), "USD");
    assert!(text.contains("#1"));
    assert!(text.contains("In stock: 3"));
    assert!(text.contains("19"));
  }

  #[test]
  fn renders_sold_out_and_unavailable_states() {
    let sold_out = render_product_message(&product(0, true), "USD");
    assert!(sold_out.contains("Sold out"));

    let unavailable = render_product_message(&product(0, false), "USD");
    assert!(unavailable.contains("Unavailable"));
  }

  #[test]
  fn renders_new_arrival_tag() {
    let mut item = product(3, true);
    item.is_new = true;
    let text = render_product_message(&item, "USD");
    assert!(text.contains("New arrival"));
  }

  #[test]
  fn renders_order_line_with_voucher() {
    let order = OrderRow {
      id: 9,
      payload: "payload".to_string(),
      user_id: 42,
      product_id: Some(1),
      product_title: "Starter pack".to_string(),
      amount_cents: 1999,
      currency: "USD".to_string(),
      status: OrderStatus::Paid,
      voucher_code: Some("AAAA-BBBB-CCCC-DDDD".to_string()),
      telegram_charge_id: None,
      provider_charge_id: None,
      created_at: Utc::now(),
      paid_at: Some(Utc::now()),
    };
    let line = render_order_line(&order);
    assert!(line.contains("#9"));
    assert!(line.contains("paid"));
    assert!(line.contains("AAAA-BBBB-CCCC-DDDD"));
  }

  #[test]
  fn pending_order_line_has_no_voucher() {
    let order = OrderRow {
      id: 10,
      payload: "payload".to_string(),
      user_id: 42,
      product_id: Some(1),
      product_title: "Starter pack".to_string(),
      amount_cents: 1999,
      currency: "USD".to_string(),
      status: OrderStatus::Pending,
      voucher_code: None,
      telegram_charge_id: None,
      provider_charge_id: None,
      created_at: Utc::now(),
      paid_at: None,
    };
    let line = render_order_line(&order);
    assert!(line.contains("pending"));
    assert!(!line.contains("🎟"));
  }

  #[test]
  fn draft_advances_through_every_stage() {
    let mut draft = ProductDraft::new(1);
    let category = CategoryRow {
      id: 3,
      name: "Games".to_string(),
    };

    assert_eq!(select_category(&mut draft, &category), "📝 Enter product title:");
    assert_eq!(draft.stage, DraftStage::Title);
    assert_eq!(draft.category_id, Some(3));

    assert_eq!(
      advance_draft(&mut draft, "Starter pack"),
      DraftStep::Prompt("🧾 Enter description (or '-' to skip):")
    );
    assert_eq!(draft.stage, DraftStage::Description);

    assert_eq!(
      advance_draft(&mut draft, "-"),
      DraftStep::Prompt("💰 Enter price (e.g., 19.99):")
    );
    assert_eq!(draft.description, None);

    assert_eq!(
      advance_draft(&mut draft, "19.99"),
      DraftStep::Prompt("📦 Enter stock quantity:")
    );
    assert_eq!(draft.price_cents, Some(1999));

    assert_eq!(advance_draft(&mut draft, "5"), DraftStep::Complete);
    assert_eq!(draft.stock, Some(5));
  }

  #[test]
  fn draft_keeps_description_text() {
    let mut draft = ProductDraft::new(1);
    draft.stage = DraftStage::Description;
    advance_draft(&mut draft, "A fine bundle");
    assert_eq!(draft.description, Some("A fine bundle".to_string()));
  }

  #[test]
  fn draft_rejects_invalid_price_and_keeps_stage() {
    let mut draft = ProductDraft::new(1);
    draft.stage = DraftStage::Price;
    assert!(matches!(advance_draft(&mut draft, "abc"), DraftStep::Invalid(_)));
    assert_eq!(draft.stage, DraftStage::Price);
    assert_eq!(draft.price_cents, None);
  }

  #[test]
  fn draft_rejects_negative_stock() {
    let mut draft = ProductDraft::new(1);
    draft.stage = DraftStage::Stock;
    assert!(matches!(advance_draft(&mut draft, "-1"), DraftStep::Invalid(_)));
    assert_eq!(draft.stage, DraftStage::Stock);
    assert_eq!(draft.stock, None);
  }

  #[test]
  fn cancel_matches_case_insensitively() {
    assert!(is_cancel("cancel"));
    assert!(is_cancel("CANCEL"));
    assert!(!is_cancel("continue"));
  }

  #[test]
  fn catalogue_mutating_callbacks_require_admin() {
    assert!(admin_only_callback("admin"));
    assert!(admin_only_callback("pickcat"));
    assert!(!admin_only_callback("menu"));
    assert!(!admin_only_callback("cat"));
    assert!(!admin_only_callback("product"));
    assert!(!admin_only_callback("buy"));
    assert!(!admin_only_callback("settings"));
  }

  #[test]
  fn truncates_long_button_labels() {
    let label = truncate_button_text(&"x".repeat(60), 48);
    assert_eq!(label.chars().count(), 48);
    assert!(label.ends_with("..."));

    let short = truncate_button_text("short", 48);
    assert_eq!(short, "short");
  }
}
