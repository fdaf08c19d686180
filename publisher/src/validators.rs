//! Input checks for user-supplied connection settings.

use url::Url;

const MIN_STREAM_NAME_LEN: usize = 3;
const MIN_KEY_LEN: usize = 8;

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_token(value: &str, min_len: usize) -> bool {
    value.len() >= min_len && value.chars().all(is_token_char)
}

/// Absolute URL of any scheme
pub fn validate_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

pub fn validate_stream_name(name: &str) -> bool {
    is_token(name, MIN_STREAM_NAME_LEN)
}

pub fn validate_api_key(key: &str) -> bool {
    is_token(key, MIN_KEY_LEN)
}

pub fn validate_stream_key(key: &str) -> bool {
    is_token(key, MIN_KEY_LEN)
}

pub fn validate_rtmp_url(url: &str) -> bool {
    url.starts_with("rtmp://")
}
