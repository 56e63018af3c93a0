//! Opaque id generation shared by the dialect converters: prefix `msg_`,
//! `fc_`, `rs_`, etc. followed by 24 random lowercase-alphanumeric
//! characters (`^[a-z0-9]{24}$`, per spec.md's id-shape scenario).
//! Centralized here rather than duplicated per converter crate.

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A prefixed opaque id: `{prefix}_{24 random alphanumeric chars}`.
pub fn generate(prefix: &str) -> String {
    format!("{prefix}_{}", random_suffix(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_prefixed_id_of_expected_length() {
        let id = generate("msg");
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 24);
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = generate("fc");
        let b = generate("fc");
        assert_ne!(a, b);
    }

    #[test]
    fn suffix_is_lowercase_alphanumeric_only() {
        let id = generate("msg");
        let suffix = id.strip_prefix("msg_").unwrap();
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
