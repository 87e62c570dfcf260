use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use siahe_core::{
    backup::BackupJob,
    config::Config,
    dispatcher::Context,
    session::{FileSessionStore, Supervisor},
    Error,
};

use crate::{handlers, TelegramConnector};

/// Run the bot until `shutdown` fires or the session fails fatally.
///
/// One supervised session hosts both the update polling loop and the backup
/// job; when either the session ends or polling stops, the other is stopped
/// with it.
pub async fn run(cfg: Arc<Config>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let connector = TelegramConnector::new(&cfg.telegram_api_url)
        .context("building the Telegram connector")?;
    let supervisor = Supervisor::new(Arc::new(connector), cfg.chain())
        .with_store(FileSessionStore::new(cfg.session_path.clone()));

    let backup = Arc::new(BackupJob::from_config(&cfg));
    let dispatcher = handlers::dispatcher(Arc::new(handlers::BotState {
        cfg: cfg.clone(),
        backup: backup.clone(),
    }));

    let outcome = supervisor
        .run(&shutdown, move |session| async move {
            let me = session.authorize_bot(&cfg.telegram_bot_token).await?;
            info!(username = %me.username, "siahe started");
            info!(
                backup_chat = cfg.backup_chat.0,
                sqlite = %cfg.sqlite_path.display(),
                "backing up"
            );

            let scope = session.scope();
            let backup_task = tokio::spawn(backup.run(session.client(), scope.clone()));

            let ctx = Context {
                client: session.client(),
                me,
                scope: scope.clone(),
            };
            let polled = dispatcher.run_polling(ctx, cfg.poll_timeout).await;

            scope.cancel();
            if let Err(e) = backup_task.await {
                warn!(error = %e, "backup task ended abnormally");
            }
            polled
        })
        .await;

    match outcome {
        Ok(()) | Err(Error::Cancelled) => {
            info!("siahe stopped");
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e).context("cannot start the session"),
        Err(e) => Err(e).context("session ended"),
    }
}
