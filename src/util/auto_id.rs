use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

pub const AUTO_ID_LENGTH: usize = 20;

/// Generates a random document identifier made of `[A-Za-z0-9]`.
pub fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LENGTH)
        .map(char::from)
        .collect()
}
