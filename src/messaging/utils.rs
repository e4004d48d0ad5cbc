use teloxide::{types::UserId, utils::html};

/// Fallback shown for users without a username or name.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Builds an HTML link that opens the user's profile.
pub fn user_link(user_id: UserId, name: Option<&str>) -> String {
    let name = name.filter(|n| !n.trim().is_empty()).unwrap_or(UNKNOWN_USER);
    format!("<a href=\"tg://user?id={}\">{}</a>", user_id.0, html::escape(name))
}
