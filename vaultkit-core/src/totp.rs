//! RFC 6238 time-based one-time passwords for secrets stored in the vault.
//!
//! Fixed to the common otpauth profile: HMAC-SHA1, 30-second period,
//! 6 digits. Recovery codes live here too since they back up the same
//! second factor.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng, RngCore};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Time step in seconds.
pub const TOTP_PERIOD: u64 = 30;

/// Number of output digits.
pub const TOTP_DIGITS: u32 = 6;

/// Minimum accepted secret length in Base32 characters.
pub const SECRET_MIN_LEN: usize = 16;

/// Maximum accepted secret length in Base32 characters.
pub const SECRET_MAX_LEN: usize = 100;

/// Random bytes behind a generated secret (160 bits, 32 Base32 chars).
const SECRET_BYTES: usize = 20;

const BACKUP_CODE_LEN: usize = 6;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Errors returned while handling a TOTP secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TotpError {
    /// A character outside `A-Z2-7` was found.
    #[error("secret contains characters outside the base32 alphabet")]
    InvalidAlphabet,
    /// The secret is too short or too long.
    #[error("secret length {0} outside 16..=100")]
    InvalidLength(usize),
    /// The characters are valid but do not form a decodable base32 string.
    #[error("secret is not valid base32")]
    InvalidEncoding,
}

/// A generated code and where it sits in its time step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TotpToken {
    /// Zero-padded decimal code.
    pub token: String,
    /// Seconds until the next step, in `1..=period`.
    pub remaining_seconds: u64,
    /// Step length in seconds.
    pub period: u64,
}

/// Canonical form of a secret: whitespace and `=` padding stripped,
/// upper-cased, then checked for alphabet and length.
///
/// # Errors
///
/// Returns [`TotpError`] describing why the secret is rejected.
pub fn normalize_secret(secret: &str) -> Result<String, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace() && *ch != '=')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if !normalized
        .bytes()
        .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
    {
        return Err(TotpError::InvalidAlphabet);
    }
    if !(SECRET_MIN_LEN..=SECRET_MAX_LEN).contains(&normalized.len()) {
        return Err(TotpError::InvalidLength(normalized.len()));
    }
    Ok(normalized)
}

/// Checks that `secret` can be used to produce tokens.
///
/// # Errors
///
/// Returns [`TotpError`] if the secret is malformed.
pub fn validate_secret(secret: &str) -> Result<(), TotpError> {
    decode_secret(secret).map(drop)
}

fn decode_secret(secret: &str) -> Result<Zeroizing<Vec<u8>>, TotpError> {
    let normalized = Zeroizing::new(normalize_secret(secret)?);
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map(Zeroizing::new)
        .map_err(|_| TotpError::InvalidEncoding)
}

/// Generates a random 160-bit secret, Base32 encoded without padding.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    BASE32_NOPAD.encode(&bytes[..])
}

fn hotp(key: &[u8], counter: u64) -> Result<u32, TotpError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| TotpError::InvalidEncoding)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary % 10u32.pow(TOTP_DIGITS))
}

fn format_code(value: u32) -> String {
    format!("{value:0width$}", width = TOTP_DIGITS as usize)
}

/// Computes the token for `unix_time` (seconds).
///
/// # Errors
///
/// Returns [`TotpError`] if the secret is malformed.
pub fn generate_token(secret: &str, unix_time: u64) -> Result<TotpToken, TotpError> {
    let key = decode_secret(secret)?;
    let token = format_code(hotp(&key, unix_time / TOTP_PERIOD)?);
    Ok(TotpToken {
        token,
        remaining_seconds: TOTP_PERIOD - unix_time % TOTP_PERIOD,
        period: TOTP_PERIOD,
    })
}

/// Checks `token` against the current time step only.
///
/// # Errors
///
/// Returns [`TotpError`] if the secret is malformed.
pub fn verify_token(secret: &str, token: &str, unix_time: u64) -> Result<bool, TotpError> {
    verify_token_with_window(secret, token, unix_time, 0)
}

/// Checks `token` against the current step and `skew_steps` steps on
/// either side of it.
///
/// # Errors
///
/// Returns [`TotpError`] if the secret is malformed.
pub fn verify_token_with_window(
    secret: &str,
    token: &str,
    unix_time: u64,
    skew_steps: u8,
) -> Result<bool, TotpError> {
    let key = decode_secret(secret)?;
    let token = token.trim();
    if token.len() != TOTP_DIGITS as usize || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }

    let current = unix_time / TOTP_PERIOD;
    let skew = u64::from(skew_steps);
    let mut matched = false;
    for step in current.saturating_sub(skew)..=current.saturating_add(skew) {
        let candidate = format_code(hotp(&key, step)?);
        matched |= bool::from(candidate.as_bytes().ct_eq(token.as_bytes()));
    }
    Ok(matched)
}

/// Generates `count` independent 6-character recovery codes drawn from
/// `A-Z0-9`. Tracking which codes were consumed is up to the caller.
#[must_use]
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    let mut rng = OsRng;
    (0..count)
        .map(|_| {
            (0..BACKUP_CODE_LEN)
                .map(|_| {
                    let index = rng.gen_range(0..BACKUP_CODE_ALPHABET.len());
                    char::from(BACKUP_CODE_ALPHABET[index])
                })
                .collect()
        })
        .collect()
}

/// Builds an `otpauth://totp/` URI for provisioning authenticator apps.
///
/// # Errors
///
/// Returns [`TotpError`] if the secret is malformed.
pub fn provisioning_uri(secret: &str, issuer: &str, account: &str) -> Result<String, TotpError> {
    let secret = normalize_secret(secret)?;
    validate_secret(&secret)?;
    let issuer_enc = urlencoding::encode(issuer);
    let account_enc = urlencoding::encode(account);
    Ok(format!(
        "otpauth://totp/{issuer_enc}:{account_enc}?secret={secret}&issuer={issuer_enc}\
         &algorithm=SHA1&digits={TOTP_DIGITS}&period={TOTP_PERIOD}"
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use test_case::test_case;

    use super::*;

    // RFC 6238 appendix B, SHA-1 seed "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test_case(59, "287082" ; "t59")]
    #[test_case(1_111_111_109, "081804" ; "t1111111109")]
    #[test_case(1_111_111_111, "050471" ; "t1111111111")]
    #[test_case(1_234_567_890, "005924" ; "t1234567890")]
    #[test_case(2_000_000_000, "279037" ; "t2000000000")]
    #[test_case(20_000_000_000, "353130" ; "t20000000000")]
    fn test_rfc6238_sha1_vectors(time: u64, expected: &str) {
        let token = generate_token(RFC_SECRET, time).expect("token");
        assert_eq!(token.token, expected);
        assert_eq!(token.period, TOTP_PERIOD);
        assert!(verify_token(RFC_SECRET, expected, time).expect("verify"));
    }

    #[test]
    fn test_remaining_seconds() {
        assert_eq!(generate_token(RFC_SECRET, 60).expect("token").remaining_seconds, 30);
        assert_eq!(generate_token(RFC_SECRET, 59).expect("token").remaining_seconds, 1);
        assert_eq!(generate_token(RFC_SECRET, 75).expect("token").remaining_seconds, 15);
    }

    #[test]
    fn test_verify_accepts_current_step_only_by_default() {
        let previous = generate_token(RFC_SECRET, 59).expect("token").token;
        assert!(!verify_token(RFC_SECRET, &previous, 61).expect("verify"));
        assert!(verify_token_with_window(RFC_SECRET, &previous, 61, 1).expect("verify"));
        assert!(!verify_token(RFC_SECRET, "12345", 59).expect("verify"));
        assert!(!verify_token(RFC_SECRET, "abcdef", 59).expect("verify"));
    }

    #[test]
    fn test_secret_normalization() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(normalize_secret(spaced).expect("normalize"), RFC_SECRET);
        assert_eq!(
            generate_token(spaced, 59).expect("token").token,
            generate_token(RFC_SECRET, 59).expect("token").token
        );
    }

    #[test]
    fn test_invalid_secrets_fail_fast() {
        assert_eq!(normalize_secret("GEZDGNBVGY3TQOJ1"), Err(TotpError::InvalidAlphabet));
        assert_eq!(normalize_secret("GEZDGNBV"), Err(TotpError::InvalidLength(8)));
        assert_eq!(
            normalize_secret(&"A".repeat(SECRET_MAX_LEN + 1)),
            Err(TotpError::InvalidLength(SECRET_MAX_LEN + 1))
        );
        // 17 characters leave dangling bits that do not decode
        assert_eq!(
            generate_token("GEZDGNBVGY3TQOJQG", 0),
            Err(TotpError::InvalidEncoding)
        );
    }

    #[test]
    fn test_generated_secret_is_usable() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        validate_secret(&secret).expect("valid");
        let token = generate_token(&secret, 1_700_000_000).expect("token");
        assert!(verify_token(&secret, &token.token, 1_700_000_000).expect("verify"));
        assert_ne!(generate_secret(), secret);
    }

    #[test]
    fn test_backup_codes() {
        let codes = generate_backup_codes(10);
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), BACKUP_CODE_LEN);
            assert!(code.bytes().all(|b| BACKUP_CODE_ALPHABET.contains(&b)));
        }
        let unique: HashSet<_> = codes.iter().collect();
        assert!(unique.len() > 1);
        assert!(generate_backup_codes(0).is_empty());
    }

    #[test]
    fn test_provisioning_uri() {
        let uri = provisioning_uri("gezdgnbvgy3tqojqgezdgnbvgy3tqojq", "Acme Co", "ana@example.com")
            .expect("uri");
        assert_eq!(
            uri,
            "otpauth://totp/Acme%20Co:ana%40example.com?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ\
             &issuer=Acme%20Co&algorithm=SHA1&digits=6&period=30"
        );
    }
}
