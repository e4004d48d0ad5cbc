use crate::bot_handler::{BotHandlerResult, commands::Context};

pub async fn handle(ctx: Context<'_>) -> BotHandlerResult<()> {
    let referrers = ctx.handler.referral_service.top_referrers().await?;
    tracing::debug!("Retrieved {} top referrers", referrers.len());

    ctx.handler.messaging_service.send_top_referrers_msg(ctx.chat_id, &referrers).await?;
    Ok(())
}
