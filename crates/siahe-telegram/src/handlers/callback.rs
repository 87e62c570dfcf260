use async_trait::async_trait;
use tracing::debug;

use siahe_core::{
    dispatcher::{Context, Handler},
    transport::Issuer,
    update::Update,
    Result,
};

/// Acknowledges every callback query so the client stops its spinner.
pub struct CallbackHandler;

#[async_trait]
impl Handler for CallbackHandler {
    async fn handle(&self, ctx: &Context, update: &Update) -> Result<()> {
        let Some(q) = update.callback_query() else {
            return Ok(());
        };
        debug!(
            user_id = q.user_id.0,
            data = q.data.as_deref().unwrap_or(""),
            "callback query"
        );
        ctx.client.answer_callback(Issuer::Handler, &q.id, None).await
    }
}
