use std::borrow::Cow;

const TRUNCATE_SUFFIX: &str = "... (truncated)";
const SHORT_ID_LEN: usize = 12;

/// Random identifier with a readable prefix, e.g. `item_3f9c0a1b2d4e`.
pub(crate) fn short_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &uuid[..SHORT_ID_LEN])
}

/// Clip a log payload to `max_bytes`, respecting UTF-8 boundaries.
pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
