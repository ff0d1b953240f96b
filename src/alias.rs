use rand::Rng;

/// Length of generated aliases
pub const DEFAULT_ALIAS_LENGTH: usize = 8;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random alphanumeric string of exactly `length` characters.
///
/// Uses the thread-local CSPRNG so aliases are not predictable. Uniqueness is
/// not guaranteed here; stores reject collisions on insert.
pub fn new_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generate an alias of the default length
pub fn generate_alias() -> String {
    new_random_string(DEFAULT_ALIAS_LENGTH)
}
