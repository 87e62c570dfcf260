use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use siahe_core::{
    backup::BackupOutcome,
    dispatcher::{Context, Handler},
    transport::Issuer,
    update::{Message, Update},
    Result,
};

use super::BotState;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Command<'a> {
    pub name: String,
    /// `@botname` suffix, if the command was addressed to a specific bot.
    pub bot: Option<&'a str>,
    pub args: &'a str,
}

pub(crate) fn parse_command(text: &str) -> Option<Command<'_>> {
    // Telegram may send `/cmd@botname arg1 ...`
    let rest = text.trim().strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let args = parts.next().unwrap_or("").trim();

    let (name, bot) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name: name.to_lowercase(),
        bot,
        args,
    })
}

fn password_matches(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Slash commands: `/start`, `/ping`, `/backup <password>`.
pub struct CommandHandler {
    state: Arc<BotState>,
}

impl CommandHandler {
    pub fn new(state: Arc<BotState>) -> Self {
        Self { state }
    }

    async fn reply(&self, ctx: &Context, msg: &Message, text: &str) -> Result<()> {
        ctx.client
            .send_text(Issuer::Handler, msg.chat_id, text)
            .await
            .map(|_| ())
    }

    async fn backup(&self, ctx: &Context, msg: &Message, password: &str) -> Result<()> {
        let Some(expected) = self.state.cfg.admin_password.as_deref() else {
            return self
                .reply(ctx, msg, "On-demand backups are disabled.")
                .await;
        };
        if !password_matches(expected, password) {
            warn!(
                user_id = msg.user_id.map(|u| u.0),
                chat = msg.chat_id.0,
                "backup requested with a wrong password"
            );
            return self.reply(ctx, msg, "Wrong password.").await;
        }

        info!(user_id = msg.user_id.map(|u| u.0), "backup requested");
        let text = match self.state.backup.tick(&ctx.client).await {
            BackupOutcome::Delivered(_) => "Backup sent.",
            BackupOutcome::Skipped => "A backup is already running.",
            BackupOutcome::Failed => "Backup failed, see the logs.",
            BackupOutcome::Interrupted => return Ok(()),
        };
        self.reply(ctx, msg, text).await
    }
}

#[async_trait]
impl Handler for CommandHandler {
    async fn handle(&self, ctx: &Context, update: &Update) -> Result<()> {
        let Some(msg) = update.message() else {
            return Ok(());
        };
        let Some(cmd) = msg.text.as_deref().and_then(parse_command) else {
            return Ok(());
        };
        if let Some(bot) = cmd.bot {
            if !bot.eq_ignore_ascii_case(&ctx.me.username) {
                return Ok(());
            }
        }

        match cmd.name.as_str() {
            "start" => {
                let text = format!(
                    "Hi, I'm @{}. I send a database backup to the backup chat every {} hours.",
                    ctx.me.username,
                    self.state.cfg.backup_interval.as_secs() / 3600
                );
                self.reply(ctx, msg, &text).await
            }
            "ping" => self.reply(ctx, msg, "pong").await,
            "backup" => self.backup(ctx, msg, cmd.args).await,
            other => {
                debug!(command = other, "ignoring unknown command");
                Ok(())
            }
        }
    }
}
