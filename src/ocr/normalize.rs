//! Turning loosely typed model output into line items

use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

/// Category keywords checked in order against name and description
const CATEGORY_KEYWORDS: [(&str, &str); 7] = [
    ("server", "Server"),
    ("docking", "Docking Station"),
    ("monitor", "Monitor"),
    ("printer", "Printer"),
    ("cable", "Cables"),
    ("charger", "Chargers"),
    ("laptop", "Laptop"),
];

pub const FALLBACK_CATEGORY: &str = "Other";

/// One invoice line, ready for review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub category: String,
    pub item_name: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub serial_number: String,
}

pub fn map_category(item_name: &str, description: &str) -> &'static str {
    let text = format!("{} {}", item_name, description).to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(item: &Value, key: &str) -> Option<f64> {
    match item.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Accepts `12.5`, `12,5` and surrounding currency noise such as `$1,234.00`
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };
    normalized.parse().ok()
}

fn to_money(value: f64) -> Decimal {
    Decimal::try_from(value)
        .map(|d| d.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

/// Quantity as a positive integer; anything unusable becomes 1
fn quantity(item: &Value) -> i64 {
    match number_field(item, "quantity") {
        Some(q) if q.is_finite() && q >= 1.0 => q.round() as i64,
        _ => 1,
    }
}

pub fn normalize_item(item: &Value) -> LineItem {
    let quantity = quantity(item);
    let unit_price = number_field(item, "unit_price")
        .filter(|p| p.is_finite() && *p >= 0.0)
        .map(to_money)
        .unwrap_or(Decimal::ZERO);
    let total_price = number_field(item, "total_price")
        .filter(|p| p.is_finite() && *p != 0.0)
        .map(to_money)
        .unwrap_or_else(|| unit_price * Decimal::from(quantity));

    let description = text_field(item, "description").unwrap_or_default();
    let item_name = text_field(item, "item_name")
        .or_else(|| Some(description.clone()).filter(|d| !d.is_empty()))
        .unwrap_or_else(|| "Unknown Item".to_string());

    LineItem {
        category: map_category(&item_name, &description).to_string(),
        item_name,
        description,
        quantity,
        unit_price,
        total_price,
        serial_number: text_field(item, "serial_number").unwrap_or_default(),
    }
}

pub fn normalize_items(items: &[Value]) -> Vec<LineItem> {
    items.iter().filter(|v| v.is_object()).map(normalize_item).collect()
}

/// Split a model reply into an optional invoice number and raw line items.
///
/// The reply is either an array of items or `{"invoice_number", "items"}`.
pub fn split_reply(reply: Value) -> (Option<String>, Vec<Value>) {
    match reply {
        Value::Array(items) => (None, items),
        Value::Object(mut map) => {
            let invoice = map
                .get("invoice_number")
                .and_then(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty());
            let items = match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            (invoice, items)
        }
        _ => (None, Vec::new()),
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap_or_else(|_| unreachable!()))
}

/// Invoice number usable in a file name; `None` when nothing is left
pub fn file_safe_invoice_number(number: &str) -> Option<String> {
    let safe = unsafe_chars().replace_all(number.trim(), "-");
    let safe = safe.trim_matches('-');
    (!safe.is_empty()).then(|| safe.to_string())
}

/// Sum of the line totals
pub fn estimated_total(items: &[LineItem]) -> Decimal {
    items.iter().map(|i| i.total_price).sum()
}
