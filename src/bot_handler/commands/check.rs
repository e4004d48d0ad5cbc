use crate::bot_handler::{BotHandlerResult, commands::Context};

pub async fn handle(ctx: Context<'_>) -> BotHandlerResult<()> {
    tracing::debug!("Checking referrals for user {}", ctx.member.id.0);

    match ctx.handler.referral_service.referral_count(ctx.member.id).await? {
        Some(count) => {
            ctx.handler.messaging_service.send_referral_count_msg(ctx.chat_id, count).await?
        }
        None => ctx.handler.messaging_service.send_no_referral_code_msg(ctx.chat_id).await?,
    }
    Ok(())
}
