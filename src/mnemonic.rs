//! BIP-39 mnemonic support for the mnemonic bootstrap path.
//!
//! Generation draws entropy from the injected [`RandomSource`]; validation
//! and seed computation follow BIP-39 exactly (PBKDF2-HMAC-SHA512 over the
//! normalized phrase, 2048 iterations). The hierarchy uses the tenant id
//! as the BIP-39 passphrase so that the same phrase yields unrelated
//! master secrets for different tenants.

use bip39::Mnemonic;

use crate::error::{ClientError, Result};
use crate::primitives::{random_bytes, RandomSource};

/// Supported entropy strengths in bits (12 to 24 words).
const VALID_STRENGTHS: [usize; 5] = [128, 160, 192, 224, 256];

/// Generates a new mnemonic phrase with the given entropy strength.
///
/// # Arguments
///
/// * `strength_bits` - Entropy size: 128, 160, 192, 224, or 256 bits.
/// * `rng` - Source of the entropy bytes.
///
/// # Errors
///
/// Returns `ClientError::InvalidMnemonic` for an unsupported strength and
/// `ClientError::RandomSourceFailed` if entropy cannot be drawn.
pub fn generate(strength_bits: usize, rng: &dyn RandomSource) -> Result<String> {
    if !VALID_STRENGTHS.contains(&strength_bits) {
        return Err(ClientError::InvalidMnemonic(format!(
            "unsupported strength: {} bits",
            strength_bits
        )));
    }
    let entropy = random_bytes(rng, strength_bits / 8)?;
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| ClientError::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Validates a phrase against the BIP-39 word list and checksum.
pub fn validate(phrase: &str) -> Result<()> {
    Mnemonic::parse(phrase)
        .map(|_| ())
        .map_err(|e| ClientError::InvalidMnemonic(e.to_string()))
}

/// Computes the 64-byte BIP-39 seed for a phrase and passphrase.
///
/// # Errors
///
/// Returns `ClientError::InvalidMnemonic` if the checksum does not
/// validate.
pub fn to_seed(phrase: &str, passphrase: &str) -> Result<[u8; 64]> {
    let mnemonic =
        Mnemonic::parse(phrase).map_err(|e| ClientError::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_seed(passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedRandom;

    const TEST_MNEMONIC_12: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generate_produces_valid_phrases() {
        let rng = FixedRandom::new(1);
        for strength in [128, 160, 192, 224, 256] {
            let phrase = generate(strength, &rng).unwrap();
            validate(&phrase).unwrap();
            // 11 bits per word: 128 bits + 4-bit checksum = 12 words, etc.
            let words = phrase.split_whitespace().count();
            assert_eq!(words, (strength + strength / 32) / 11);
        }
    }

    #[test]
    fn generate_is_deterministic_for_a_seeded_source() {
        let a = generate(128, &FixedRandom::new(9)).unwrap();
        let b = generate(128, &FixedRandom::new(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generate_rejects_unsupported_strength() {
        let rng = FixedRandom::new(1);
        assert!(matches!(
            generate(100, &rng),
            Err(ClientError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn validate_accepts_known_good_phrase() {
        validate(TEST_MNEMONIC_12).unwrap();
    }

    #[test]
    fn validate_rejects_bad_checksum() {
        // Right word count, wrong final word.
        let phrase =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(matches!(
            validate(phrase),
            Err(ClientError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn validate_rejects_unknown_words() {
        assert!(matches!(
            validate("definitely not a bip39 phrase at all"),
            Err(ClientError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn seed_depends_on_passphrase() {
        let a = to_seed(TEST_MNEMONIC_12, "tenant-a").unwrap();
        let b = to_seed(TEST_MNEMONIC_12, "tenant-b").unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn seed_is_deterministic() {
        let a = to_seed(TEST_MNEMONIC_12, "acme").unwrap();
        let b = to_seed(TEST_MNEMONIC_12, "acme").unwrap();
        assert_eq!(a, b);
    }
}
