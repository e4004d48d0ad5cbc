use std::sync::Arc;

use rand::{Rng, distributions::Alphanumeric};

/// Length of generated referral codes.
pub const REFERRAL_CODE_LENGTH: usize = 8;
/// How many codes are tried before giving up on a collision streak.
pub const MAX_CODE_ATTEMPTS: usize = 5;
/// Telegram limits deep-link payloads to 64 characters.
const MAX_PAYLOAD_LENGTH: usize = 64;

/// Source of new referral codes. Swappable so collisions can be exercised.
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Generates a random alphanumeric referral code.
pub fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Trims a `/start` payload and returns it if it can be a referral code.
///
/// Deep-link payloads may only contain `A-Z`, `a-z`, `0-9`, `_` and `-`.
pub fn normalize_referral_code(payload: &str) -> Option<&str> {
    let code = payload.trim();
    let valid = !code.is_empty()
        && code.len() <= MAX_PAYLOAD_LENGTH
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(code)
}
