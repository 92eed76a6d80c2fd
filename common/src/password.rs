use rand::Rng;
use rand::distributions::Alphanumeric;

pub const GENERATED_PASSWORD_LEN: usize = 16;

/// Throwaway password for accounts created on behalf of a user. The user resets it by email.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
