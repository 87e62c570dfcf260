//! Telegram adapter (teloxide).
//!
//! Implements the `siahe-core` transport port over the Telegram Bot API and
//! wires the bot's handlers and background jobs around a supervised session.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{InputFile, Me},
};
use tracing::debug;

pub mod convert;
pub mod handlers;
pub mod router;

use siahe_core::{
    domain::{BotIdentity, BotToken, ChatId, FileRef, MessageRef, MessageId, UserId},
    errors::Error,
    transport::{Call, Connector, Reply, Transport},
    Result,
};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Opens HTTP connections to the Bot API host.
pub struct TelegramConnector {
    api_url: reqwest::Url,
}

impl TelegramConnector {
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = reqwest::Url::parse(api_url)
            .map_err(|e| Error::Config(format!("invalid Telegram API url {api_url}: {e}")))?;
        Ok(Self { api_url })
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let client = teloxide::net::client_from_env();

        // Any HTTP answer means the host is reachable; only transport
        // failures count as a failed connect.
        client
            .get(self.api_url.clone())
            .send()
            .await
            .map_err(|e| Error::Connect(format!("cannot reach {}: {e}", self.api_url)))?;

        Ok(Arc::new(TelegramTransport::new(client, self.api_url.clone())))
    }
}

/// One connection to the Bot API. The bot handle exists only after
/// `AuthorizeBot` succeeded.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_url: reqwest::Url,
    bot: RwLock<Option<Bot>>,
    closed: AtomicBool,
}

impl TelegramTransport {
    pub fn new(client: reqwest::Client, api_url: reqwest::Url) -> Self {
        Self {
            client,
            api_url,
            bot: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn bot(&self) -> Result<Bot> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::External("connection closed".to_string()));
        }
        self.bot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::Unauthorized)
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn sent(msg: &Message) -> Reply {
        Reply::Sent(MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        })
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        match e {
            teloxide::RequestError::RetryAfter(wait) => Error::FloodWait(wait),
            // The Bot API answers a rejected token with 404 "Unauthorized".
            teloxide::RequestError::Api(teloxide::ApiError::NotFound) => Error::Unauthorized,
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    fn map_auth_err(e: teloxide::RequestError) -> Error {
        match Self::map_err(e) {
            Error::Unauthorized => Error::Auth("bot token rejected".to_string()),
            other => other,
        }
    }

    fn ensure_authorized(&self) -> Result<()> {
        self.bot().map(drop)
    }

    async fn authorize(&self, token: BotToken) -> Result<Reply> {
        let bot = Bot::with_client(token.expose(), self.client.clone())
            .set_api_url(self.api_url.clone());
        let me: Me = bot.get_me().await.map_err(Self::map_auth_err)?;

        *self.bot.write().unwrap_or_else(|e| e.into_inner()) = Some(bot);
        Ok(Reply::Authorized(BotIdentity {
            id: UserId(me.user.id.0 as i64),
            username: me.username().to_string(),
        }))
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn invoke(&self, call: Call) -> Result<Reply> {
        match call {
            Call::AuthorizeBot { token } => self.authorize(token).await,

            Call::GetUpdates { offset, timeout } => {
                let updates = self
                    .bot()?
                    .get_updates()
                    .offset(offset as i32)
                    .timeout(timeout.as_secs() as u32)
                    .await
                    .map_err(Self::map_err)?;
                Ok(Reply::Updates(
                    updates.into_iter().map(convert::update).collect(),
                ))
            }

            Call::SendText { chat_id, text } => {
                let msg = self
                    .bot()?
                    .send_message(Self::tg_chat(chat_id), text)
                    .await
                    .map_err(Self::map_err)?;
                Ok(Self::sent(&msg))
            }

            // The Bot API takes file bytes with the message itself, so
            // uploading only stages the artifact for `SendDocument`.
            Call::Upload { artifact } => {
                self.ensure_authorized()?;
                debug!(name = %artifact.name, bytes = artifact.bytes.len(), "staged upload");
                Ok(Reply::Uploaded(FileRef::Staged(artifact)))
            }

            Call::SendDocument {
                chat_id,
                file,
                caption,
            } => {
                let input = match file {
                    FileRef::Remote { id } => InputFile::file_id(id),
                    FileRef::Staged(artifact) => {
                        InputFile::memory(artifact.bytes.to_vec()).file_name(artifact.name)
                    }
                };
                let mut req = self.bot()?.send_document(Self::tg_chat(chat_id), input);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                let msg = req.await.map_err(Self::map_err)?;
                Ok(Self::sent(&msg))
            }

            Call::AnswerCallback { callback_id, text } => {
                let mut req = self.bot()?.answer_callback_query(callback_id);
                if let Some(text) = text {
                    req = req.text(text);
                }
                req.await.map_err(Self::map_err)?;
                Ok(Reply::Done)
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bot.write().unwrap_or_else(|e| e.into_inner()).take();
    }
}
