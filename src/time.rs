use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn now_s() -> i64 {
    now_ms().div_euclid(1_000)
}

/// Renders a panel timestamp the way operators read it, e.g. `Jan 17, 04:10`.
///
/// Accepts RFC 3339 and the panel's `YYYY-MM-DD HH:MM:SS` form; anything else
/// renders as `-`.
pub fn format_short(raw: &str) -> String {
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;

    let raw = raw.trim();
    let out = format_description!("[month repr:short] [day], [hour]:[minute]");

    if let Ok(dt) = time::OffsetDateTime::parse(raw, &Rfc3339) {
        return dt.format(&out).unwrap_or_else(|_| "-".to_string());
    }

    let plain = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    match time::PrimitiveDateTime::parse(raw, &plain) {
        Ok(dt) => dt.format(&out).unwrap_or_else(|_| "-".to_string()),
        Err(_) => "-".to_string(),
    }
}
