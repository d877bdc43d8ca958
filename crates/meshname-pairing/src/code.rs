//! Pairing code generation

use rand::rngs::OsRng;
use rand::RngCore;

/// Characters a code suffix is drawn from. Deliberately excludes I, O, 0
/// and 1, which are easy to confuse when read aloud or typed.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Every code starts with this prefix
pub const CODE_PREFIX: &str = "MESH-";

/// Generate a human-typable pairing code, `MESH-` plus four characters.
///
/// Easy to type, hard to guess within the ten-minute code lifetime.
pub fn generate_code() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);

    let suffix: String = bytes
        .iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_the_expected_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_PREFIX.len() + 4);
            assert!(code.starts_with(CODE_PREFIX));

            let suffix = &code[CODE_PREFIX.len()..];
            assert!(suffix.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn alphabet_omits_confusable_glyphs() {
        for confusable in [b'I', b'O', b'0', b'1'] {
            assert!(!CODE_ALPHABET.contains(&confusable));
        }
    }
}
