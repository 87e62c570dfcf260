//! Bot update handlers.
//!
//! Handlers only talk to Telegram through the session client, so every reply
//! shares the same pacing and flood-wait handling as the backup job.

use std::sync::Arc;

use siahe_core::{backup::BackupJob, config::Config, dispatcher::Dispatcher};

mod callback;
mod commands;

pub use callback::CallbackHandler;
pub use commands::CommandHandler;

/// Shared state the handlers need besides the session.
pub struct BotState {
    pub cfg: Arc<Config>,
    pub backup: Arc<BackupJob>,
}

pub fn dispatcher(state: Arc<BotState>) -> Arc<Dispatcher> {
    Dispatcher::builder()
        .on_new_message(CommandHandler::new(state))
        .on_callback_query(CallbackHandler)
        .build()
}
