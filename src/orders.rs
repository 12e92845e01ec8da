use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PanelError, PanelResult};

/// Order status codes used by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OrderStatus {
    Pending = 0,
    InProgress = 1,
    Completed = 2,
    Partial = 3,
    Canceled = 4,
    Processing = 5,
    Fail = 6,
    Error = 7,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Partial,
        Self::Canceled,
        Self::Processing,
        Self::Fail,
        Self::Error,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "inprogress",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Canceled => "canceled",
            Self::Processing => "processing",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }

    pub fn from_label(label: &str) -> PanelResult<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| PanelError::Decode(format!("unknown order status label: {label}")))
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = PanelError;

    fn try_from(code: u8) -> Result<Self, PanelError> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or_else(|| PanelError::Decode(format!("order status out of range 0..=7: {code}")))
    }
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = PanelError;

    /// Accepts a numeric code or a label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u8>() {
            Ok(code) => Self::try_from(code),
            Err(_) => Self::from_label(s),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An order as the panel reports it. Only `id` is required; numeric fields
/// tolerate string encodings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub start_count: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub remains: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub status: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub order_cancel_reason: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub order_fail_reason: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub charge: Option<f64>,
}

impl Order {
    pub fn order_status(&self) -> Option<OrderStatus> {
        self.status
            .and_then(|code| u8::try_from(code).ok())
            .and_then(|code| OrderStatus::try_from(code).ok())
    }

    /// Target account handle, from the link or the username field.
    pub fn handle(&self) -> Option<String> {
        [&self.link, &self.username]
            .into_iter()
            .flatten()
            .find(|raw| !raw.trim().is_empty())
            .map(|raw| extract_username(raw.trim()))
    }

    pub fn created(&self) -> Option<&str> {
        self.created_at.as_deref().or(self.date.as_deref())
    }
}

/// Reads `data.orders` from a list response. Anything malformed yields an
/// empty list; individual records that fail to decode are skipped.
pub fn parse_order_list(body: &str) -> Vec<Order> {
    let payload: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(target: "panel", error = %err, "order list is not valid json");
            return Vec::new();
        }
    };

    let Some(items) = payload.pointer("/data/orders").and_then(Value::as_array) else {
        tracing::debug!(target: "panel", "order list response has no data.orders");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match Order::deserialize(item) {
            Ok(order) => Some(order),
            Err(err) => {
                tracing::warn!(target: "panel", error = %err, "skipping undecodable order");
                None
            }
        })
        .collect()
}

/// Account handle from a raw "link or handle" value.
///
/// A leading `@` is dropped. Values that are not absolute URLs with a host
/// come back unchanged; URLs yield their first non-empty path segment, or
/// the input itself when the path is empty.
pub fn extract_username(raw: &str) -> String {
    let input = raw.strip_prefix('@').unwrap_or(raw);
    match url::Url::parse(input) {
        Ok(url) if url.has_host() => url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string()),
        _ => input.to_string(),
    }
}

fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    de_opt_u64(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing u64"))
}

fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(num) => num
            .as_u64()
            .or_else(|| num.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid u64: {num}"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid u64: {e}"))),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "unexpected value for u64: {other}"
        ))),
    }
}

fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(num) => Ok(num.as_f64()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid f64: {e}"))),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "unexpected value for f64: {other}"
        ))),
    }
}

fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(Some(s)),
        Value::Number(num) => Ok(Some(num.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "unexpected value for string: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_extraction() {
        assert_eq!(extract_username("@alice"), "alice");
        assert_eq!(extract_username("https://example.com/alice/"), "alice");
        assert_eq!(extract_username("bob"), "bob");
        assert_eq!(extract_username("https://instagram.com/testuser"), "testuser");
        assert_eq!(
            extract_username("@https://www.instagram.com//carol/reels?x=1"),
            "carol"
        );
        assert_eq!(extract_username("https://example.com/"), "https://example.com/");
        assert_eq!(extract_username("alice:bob"), "alice:bob");
    }

    #[test]
    fn status_labels_and_codes() {
        let labels: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            [
                "pending",
                "inprogress",
                "completed",
                "partial",
                "canceled",
                "processing",
                "fail",
                "error"
            ]
        );
        for (code, status) in OrderStatus::ALL.iter().enumerate() {
            assert_eq!(status.code() as usize, code);
            assert_eq!(OrderStatus::from_label(status.label()).unwrap(), *status);
        }
        assert!(OrderStatus::from_label("invalid_status").is_err());
        assert!(OrderStatus::try_from(8).is_err());
        assert_eq!("3".parse::<OrderStatus>().unwrap(), OrderStatus::Partial);
        assert_eq!("canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Canceled);
    }

    #[test]
    fn status_serializes_as_code() {
        let raw = serde_json::to_string(&serde_json::json!({ "status": OrderStatus::Fail })).unwrap();
        assert_eq!(raw, r#"{"status":6}"#);
    }

    #[test]
    fn parses_order_list() {
        let body = r#"{"data":{"orders":[{"id":1,"link":"https://instagram.com/alice","count":"500","start_count":null,"remains":"120","status":"3","charge":"1.25","created_at":"2026-01-17 04:10:00"}]}}"#;
        let orders = parse_order_list(body);
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.id, 1);
        assert_eq!(order.count, Some(500));
        assert_eq!(order.start_count, None);
        assert_eq!(order.remains, Some(120));
        assert_eq!(order.order_status(), Some(OrderStatus::Partial));
        assert_eq!(order.charge, Some(1.25));
        assert_eq!(order.handle().as_deref(), Some("alice"));
        assert_eq!(order.created(), Some("2026-01-17 04:10:00"));
    }

    #[test]
    fn missing_or_malformed_payload_is_empty() {
        assert!(parse_order_list(r#"{"data":{}}"#).is_empty());
        assert!(parse_order_list(r#"{"success":false}"#).is_empty());
        assert!(parse_order_list(r#"{"data":{"orders":"nope"}}"#).is_empty());
        assert!(parse_order_list("<html>login</html>").is_empty());
        assert!(parse_order_list("").is_empty());
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let body = r#"{"data":{"orders":[{"id":"x"},{"id":2,"username":"@bob"}]}}"#;
        let orders = parse_order_list(body);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 2);
        assert_eq!(orders[0].handle().as_deref(), Some("bob"));
    }
}
