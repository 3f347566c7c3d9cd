//! Telegram transport adapter
//!
//! Translates Telegram updates into transport events and renders the
//! router's replies as Telegram messages and inline keyboards:
//! - `/start [department]` → `Start` (optional deep-link department id)
//! - `dept_<id>` callback buttons → `DepartmentChosen`
//! - plain text → `Text`
//! - `/stop` → `SessionEnd`
//!
//! Uses the explicit Dispatcher pattern for reliable message polling.

use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, Update},
};
use tracing::{debug, info, warn};

use crate::router::SessionRouter;
use crate::transport::{ExternalUser, InboundEvent, OutboundReply};

/// Space-directory cache key for conversations arriving via this adapter
pub const CHANNEL_KEY: &str = "telegram";

const DEPARTMENT_CALLBACK_PREFIX: &str = "dept_";

/// Run the Telegram bot until the dispatcher stops
pub async fn run_telegram_bot(token: String, router: Arc<SessionRouter>) -> anyhow::Result<()> {
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => info!(
            "Bot authenticated: @{} (ID: {})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id
        ),
        Err(e) => anyhow::bail!("Bot authentication failed: {e}"),
    }

    // Clear any webhook so long polling receives updates.
    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .default_handler(|update| async move {
            debug!("Unhandled update: {:?}", update);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in update handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    warn!("Dispatcher stopped");
    Ok(())
}

fn external_user(user: &teloxide::types::User) -> ExternalUser {
    ExternalUser {
        id: user.id.0.to_string(),
        display_name: Some(user.first_name.clone()).filter(|s| !s.is_empty()),
        handle: user.username.clone(),
    }
}

/// Map one Telegram message to a transport event, if it carries one
fn event_for_message(user: ExternalUser, text: &str) -> Option<InboundEvent> {
    if let Some(rest) = text.strip_prefix("/start") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let department = rest.split_whitespace().next().map(str::to_string);
            return Some(InboundEvent::Start { user, department });
        }
    }
    if text.trim() == "/stop" {
        return Some(InboundEvent::SessionEnd { user });
    }
    if text.starts_with('/') {
        return None;
    }
    Some(InboundEvent::Text {
        user,
        text: text.to_string(),
    })
}

async fn message_handler(
    bot: Bot,
    msg: Message,
    router: Arc<SessionRouter>,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    debug!(
        "Message from user {} in chat {}: {:?}",
        from.id,
        msg.chat.id,
        text.chars().take(50).collect::<String>()
    );

    let Some(event) = event_for_message(external_user(from), text) else {
        bot.send_message(msg.chat.id, "Unknown command. Send /start to begin.")
            .await?;
        return Ok(());
    };

    let replies = router.handle(event).await;
    send_replies(&bot, msg.chat.id, replies).await
}

async fn callback_handler(
    bot: Bot,
    query: CallbackQuery,
    router: Arc<SessionRouter>,
) -> ResponseResult<()> {
    let Some(data) = query.data.as_deref() else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };
    let Some(department_id) = data.strip_prefix(DEPARTMENT_CALLBACK_PREFIX) else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };

    bot.answer_callback_query(&query.id).await?;

    let chat_id = query.message.as_ref().map(|m| m.chat().id);
    if let (Some(chat_id), Some(message)) = (chat_id, query.message.as_ref()) {
        // Immediate feedback while provisioning runs.
        let _ = bot
            .edit_message_text(chat_id, message.id(), "Connecting you to the department...")
            .await;
    }

    let event = InboundEvent::DepartmentChosen {
        user: external_user(&query.from),
        department_id: department_id.to_string(),
    };
    let replies = router.handle(event).await;

    if let Some(chat_id) = chat_id {
        send_replies(&bot, chat_id, replies).await?;
    }
    Ok(())
}

async fn send_replies(
    bot: &Bot,
    chat_id: ChatId,
    replies: Vec<OutboundReply>,
) -> ResponseResult<()> {
    for reply in replies {
        match reply {
            OutboundReply::Text(text) => {
                bot.send_message(chat_id, text)
                    .parse_mode(ParseMode::Markdown)
                    .await?;
            }
            OutboundReply::DepartmentMenu { text, options } => {
                let rows: Vec<Vec<InlineKeyboardButton>> = options
                    .into_iter()
                    .map(|option| {
                        vec![InlineKeyboardButton::callback(
                            option.label,
                            format!("{DEPARTMENT_CALLBACK_PREFIX}{}", option.id),
                        )]
                    })
                    .collect();
                bot.send_message(chat_id, text)
                    .parse_mode(ParseMode::Markdown)
                    .reply_markup(InlineKeyboardMarkup::new(rows))
                    .await?;
            }
        }
    }
    Ok(())
}
