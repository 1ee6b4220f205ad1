//! Telegram client using teloxide.

use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::warn;

use crate::registry::{Messenger, SendFailure};

/// Telegram API client wrapper used by the relay and the scheduler broadcast.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, SendFailure> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let failure = to_failure(&e);
                warn!("Failed to send to chat {chat_id}: {failure}");
                failure
            })
    }

    /// Send a photo by its hosted URL.
    pub async fn send_photo_url(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
    ) -> Result<i64, SendFailure> {
        let parsed = reqwest::Url::parse(url).map_err(|e| SendFailure {
            message: format!("invalid image URL: {e}"),
            permanent: false,
        })?;

        self.bot
            .send_photo(ChatId(chat_id), InputFile::url(parsed))
            .caption(caption)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let failure = to_failure(&e);
                warn!("Failed to send photo to chat {chat_id}: {failure}");
                failure
            })
    }
}

/// Map a teloxide error, flagging failures that mean the chat is gone for
/// good so the registry can prune it.
fn to_failure(error: &RequestError) -> SendFailure {
    let permanent = matches!(
        error,
        RequestError::Api(
            ApiError::ChatNotFound
                | ApiError::BotBlocked
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::UserDeactivated
                | ApiError::GroupDeactivated
        )
    );
    SendFailure {
        message: error.to_string(),
        permanent,
    }
}

impl Messenger for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendFailure> {
        self.send_message(chat_id, text).await.map(|_| ())
    }
}
