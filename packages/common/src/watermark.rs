//! Watermark payload codec.
//!
//! The text burned into a revealed artifact is `{viewer}#{issued_at}`, where
//! both halves are base62 so the mark stays short enough to tile densely.
//! Numeric viewer ids (chat-platform snowflakes) are base62-encoded; any other
//! id is embedded verbatim behind a `~` marker. `decode` turns a mark read off
//! a leaked copy back into the viewer id and issue time.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const RAW_MARKER: char = '~';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("watermark text must contain exactly one '#'")]
    Malformed,
    #[error("invalid base62 digit '{0}'")]
    InvalidDigit(char),
    #[error("encoded value does not fit in 128 bits")]
    Overflow,
    #[error("issue time is out of range")]
    BadTimestamp,
}

pub fn encode_base62(mut n: u128) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE62[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

pub fn decode_base62(s: &str) -> Result<u128, PayloadError> {
    if s.is_empty() {
        return Err(PayloadError::Malformed);
    }
    s.chars().try_fold(0u128, |acc, c| {
        let digit = BASE62
            .iter()
            .position(|&b| b as char == c)
            .ok_or(PayloadError::InvalidDigit(c))?;
        acc.checked_mul(62)
            .and_then(|v| v.checked_add(digit as u128))
            .ok_or(PayloadError::Overflow)
    })
}

/// Build the mark for `viewer_id` issued at `at`.
pub fn encode(viewer_id: &str, at: DateTime<Utc>) -> String {
    let viewer = match viewer_id.parse::<u128>() {
        Ok(n) if !viewer_id.starts_with('0') || viewer_id == "0" => encode_base62(n),
        _ => format!("{RAW_MARKER}{}", viewer_id.replace('#', "")),
    };
    let millis = at.timestamp_millis().max(0) as u128;
    format!("{viewer}#{}", encode_base62(millis))
}

/// What a watermark says about who it was issued to and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMark {
    pub viewer_id: String,
    pub issued_at: DateTime<Utc>,
}

pub fn decode(text: &str) -> Result<DecodedMark, PayloadError> {
    let (viewer, issued) = text.trim().split_once('#').ok_or(PayloadError::Malformed)?;
    if issued.contains('#') {
        return Err(PayloadError::Malformed);
    }

    let viewer_id = match viewer.strip_prefix(RAW_MARKER) {
        Some(raw) if !raw.is_empty() => raw.to_string(),
        Some(_) => return Err(PayloadError::Malformed),
        None => decode_base62(viewer)?.to_string(),
    };

    let millis = i64::try_from(decode_base62(issued)?).map_err(|_| PayloadError::BadTimestamp)?;
    let issued_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or(PayloadError::BadTimestamp)?;

    Ok(DecodedMark {
        viewer_id,
        issued_at,
    })
}
