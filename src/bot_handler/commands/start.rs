use crate::{
    bot_handler::{BotHandlerResult, commands::Context},
    referral::Attribution,
};

pub async fn handle(ctx: Context<'_>, payload: &str) -> BotHandlerResult<()> {
    tracing::debug!("Handling start command for user {}", ctx.member.id.0);

    let outcome = ctx.handler.referral_service.start(ctx.member, payload).await?;

    // The referral is committed at this point; notify before replying.
    if let Attribution::Attributed { referrer } = outcome.attribution {
        tracing::info!("User {} referred by {}", ctx.member.id.0, referrer.0);
        ctx.handler.notify_referrer(referrer, ctx.member).await;
    }

    ctx.handler.messaging_service.send_start_msg(ctx.chat_id, &outcome).await?;
    Ok(())
}
