// Token expiry extraction

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// base64url, padded or not
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Standard alphabet, for issuers that do not use base64url
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Read the `exp` claim (epoch seconds) from a three-segment token
///
/// Returns `None` for anything that is not a well-formed token with a
/// positive numeric `exp`.
pub fn expiry_from_token(token: &str) -> Option<i64> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let decoded = URL_SAFE_LENIENT
        .decode(payload)
        .or_else(|_| STANDARD_LENIENT.decode(payload))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;

    let exp = claims.get("exp")?;
    let exp = exp
        .as_i64()
        .or_else(|| exp.as_f64().map(|f| f.floor() as i64))?;
    (exp > 0).then_some(exp)
}

/// Expiry for a freshly issued token
///
/// Uses the `exp` claim when present, otherwise `issued_at + refresh_interval`.
pub fn resolve_expiry(token: &str, issued_at: i64, refresh_interval: i64) -> i64 {
    match expiry_from_token(token) {
        Some(exp) => exp,
        None => {
            tracing::warn!(
                "Failed to parse token expiration, falling back to refresh interval ({}s)",
                refresh_interval
            );
            issued_at.saturating_add(refresh_interval)
        }
    }
}
