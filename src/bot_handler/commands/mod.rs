pub mod check;
pub mod help;
pub mod latest;
pub mod start;
pub mod top;

use teloxide::types::ChatId;

use crate::{bot_handler::BotHandler, referral::Member};

/// Context groups the data needed by all command handlers.
pub struct Context<'a> {
    pub handler: &'a BotHandler,
    pub chat_id: ChatId,
    pub member: &'a Member,
}
