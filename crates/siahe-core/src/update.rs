use std::fmt;

use crate::domain::{ChatId, MessageId, MessageRef, UserId};

/// Inbound update, already converted out of the platform's wire types.
///
/// Telegram-specific fields should live in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct Update {
    pub id: i64,
    pub event: Event,
}

#[derive(Clone, Debug)]
pub enum Event {
    NewMessage(Message),
    EditedMessage(Message),
    CallbackQuery(CallbackQuery),
    /// Anything the bot does not route specially.
    Other,
}

/// Routing key for the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    NewMessage,
    EditedMessage,
    CallbackQuery,
    Other,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateKind::NewMessage => "new_message",
            UpdateKind::EditedMessage => "edited_message",
            UpdateKind::CallbackQuery => "callback_query",
            UpdateKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl Update {
    pub fn kind(&self) -> UpdateKind {
        match &self.event {
            Event::NewMessage(_) => UpdateKind::NewMessage,
            Event::EditedMessage(_) => UpdateKind::EditedMessage,
            Event::CallbackQuery(_) => UpdateKind::CallbackQuery,
            Event::Other => UpdateKind::Other,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.event {
            Event::NewMessage(m) | Event::EditedMessage(m) => Some(m),
            _ => None,
        }
    }

    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match &self.event {
            Event::CallbackQuery(q) => Some(q),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub text: Option<String>,
}

impl Message {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub id: String,
    pub user_id: UserId,
    pub username: Option<String>,
    pub data: Option<String>,
    pub message: Option<MessageRef>,
}
