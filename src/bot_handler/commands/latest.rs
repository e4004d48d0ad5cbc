use crate::bot_handler::{BotHandlerResult, commands::Context};

pub async fn handle(ctx: Context<'_>) -> BotHandlerResult<()> {
    if !ctx.handler.referral_service.is_channel_admin(ctx.member.id).await? {
        ctx.handler.messaging_service.send_permission_denied_msg(ctx.chat_id).await?;
        return Ok(());
    }

    let referrals = ctx.handler.referral_service.latest_referrals().await?;
    ctx.handler.messaging_service.send_latest_referrals_msg(ctx.chat_id, &referrals).await?;
    Ok(())
}
