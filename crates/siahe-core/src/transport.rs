use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    domain::{Artifact, BotIdentity, BotToken, ChatId, FileRef, MessageRef},
    update::Update,
    Result,
};

/// Component that issued an outbound request. Used for logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Issuer {
    Authenticator,
    Dispatcher,
    Handler,
    Backup,
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Issuer::Authenticator => "authenticator",
            Issuer::Dispatcher => "dispatcher",
            Issuer::Handler => "handler",
            Issuer::Backup => "backup",
        };
        f.write_str(s)
    }
}

/// A single platform call.
#[derive(Clone, Debug)]
pub enum Call {
    AuthorizeBot {
        token: BotToken,
    },
    GetUpdates {
        offset: i64,
        timeout: Duration,
    },
    SendText {
        chat_id: ChatId,
        text: String,
    },
    Upload {
        artifact: Artifact,
    },
    SendDocument {
        chat_id: ChatId,
        file: FileRef,
        caption: Option<String>,
    },
    AnswerCallback {
        callback_id: String,
        text: Option<String>,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::AuthorizeBot { .. } => "authorize_bot",
            Call::GetUpdates { .. } => "get_updates",
            Call::SendText { .. } => "send_text",
            Call::Upload { .. } => "upload",
            Call::SendDocument { .. } => "send_document",
            Call::AnswerCallback { .. } => "answer_callback",
        }
    }

    /// Authorization is attempted once per session, so a flood-waited
    /// `AuthorizeBot` is reported instead of re-sent.
    pub fn resubmits_after_flood(&self) -> bool {
        !matches!(self, Call::AuthorizeBot { .. })
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Authorized(BotIdentity),
    Updates(Vec<Update>),
    Sent(MessageRef),
    Uploaded(FileRef),
    Done,
}

/// A unit of outbound work. Every one of these passes the middleware chain.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub issuer: Issuer,
    pub call: Call,
}

impl OutboundRequest {
    pub fn new(issuer: Issuer, call: Call) -> Self {
        Self { issuer, call }
    }
}

/// Live connection to the platform.
///
/// Implementations report platform "slow down" responses as
/// `Error::FloodWait` so the middleware chain can suspend traffic.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, call: Call) -> Result<Reply>;

    /// Tear the connection down. Must be idempotent and must not block.
    fn close(&self);
}

/// Establishes transports. One `connect` per session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}
