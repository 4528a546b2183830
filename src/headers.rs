//! Validation for user-supplied `headers_json` on routine create/update.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

const MAX_KEY_LEN: usize = 100;
const MAX_VALUE_LEN: usize = 4096;

const FORBIDDEN_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key", "x-auth-token"];

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap());

/// Rejects a header map that would let a caller smuggle credentials or
/// perform CRLF injection through a routine's outbound headers.
pub fn validate_headers(headers: &HashMap<String, String>) -> Result<(), String> {
    for (key, value) in headers {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(format!("header key length must be 1..={MAX_KEY_LEN}: {key:?}"));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(format!("header value exceeds {MAX_VALUE_LEN} characters for key {key:?}"));
        }
        if !TOKEN_RE.is_match(key) {
            return Err(format!("header key is not a valid token: {key:?}"));
        }
        if FORBIDDEN_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
            return Err(format!("header {key:?} is not allowed"));
        }
        if value.contains('\r') || value.contains('\n') {
            return Err(format!("header value for {key:?} contains CR/LF"));
        }
    }
    Ok(())
}
