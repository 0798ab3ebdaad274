//! Short prefixed identifiers such as `tkt-a7f3b2c1`.

use rand::Rng;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_SUFFIX_LEN: usize = 8;

pub const TASK_PREFIX: &str = "tkt";
pub const RELATIONSHIP_PREFIX: &str = "rel";
pub const CONTEXT_PREFIX: &str = "ctx";
pub const PROGRESS_PREFIX: &str = "prg";

/// Generate a random id with the given prefix and an 8 character `[a-z0-9]` suffix.
pub fn random_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}
