use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Storage format for every timestamp column (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub theme: Theme,
}

/// Identity of the authenticated caller, built once per request and handed
/// to every service call that mutates state.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub user_id: i64,
    pub username: String,
    pub name: String,
    pub is_admin: bool,
    pub theme: Theme,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor {
            user_id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            is_admin: user.is_admin,
            theme: user.theme,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub brand: String,
    pub stock: i64,
}

impl Product {
    /// Human label used in audit details and warnings.
    pub fn label(&self) -> String {
        format!("{} / {}", self.name, self.brand)
    }

    pub fn to_ref(&self) -> ProductRef {
        ProductRef {
            id: self.id,
            name: self.name.clone(),
            brand: self.brand.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRef {
    pub id: i64,
    pub name: String,
    pub brand: String,
}

/// Number of transactional rows pointing at a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProductUsage {
    pub inventory_entries: i64,
    pub dispatch_entries: i64,
    pub purchase_order_items: i64,
    pub total: i64,
}

impl ProductUsage {
    pub fn new(inventory_entries: i64, dispatch_entries: i64, purchase_order_items: i64) -> Self {
        ProductUsage {
            inventory_entries,
            dispatch_entries,
            purchase_order_items,
            total: inventory_entries + dispatch_entries + purchase_order_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    /// Goods received into the warehouse.
    Receipt,
    /// Signed correction produced by a direct stock edit.
    Adjustment,
}

impl ReceiptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptKind::Receipt => "receipt",
            ReceiptKind::Adjustment => "adjustment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "receipt" => Some(ReceiptKind::Receipt),
            "adjustment" => Some(ReceiptKind::Adjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptLine {
    pub entry_id: i64,
    pub product: ProductRef,
    pub quantity: i64,
}

/// A stock-in batch and its inventory entries.
#[derive(Debug, Clone, Serialize)]
pub struct StockReceipt {
    pub id: i64,
    pub kind: ReceiptKind,
    pub operator: Option<String>,
    pub created_at: String,
    pub items: Vec<ReceiptLine>,
}

impl StockReceipt {
    pub fn total_units(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStage {
    Exit,
    Delivery,
}

impl PhotoStage {
    pub const ALL: [PhotoStage; 2] = [PhotoStage::Exit, PhotoStage::Delivery];

    pub fn as_str(self) -> &'static str {
        match self {
            PhotoStage::Exit => "exit",
            PhotoStage::Delivery => "delivery",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exit" => Some(PhotoStage::Exit),
            "delivery" => Some(PhotoStage::Delivery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchPhoto {
    pub id: i64,
    pub batch_id: i64,
    pub stage: PhotoStage,
    /// File name relative to the upload directory.
    pub path: String,
    pub url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchLine {
    pub entry_id: i64,
    pub product: ProductRef,
    pub requested: i64,
    pub dispatched: i64,
    /// Set when stock could not cover the requested quantity.
    pub short: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Complete,
    Partial,
}

impl DispatchStatus {
    pub fn of(lines: &[DispatchLine]) -> Self {
        if lines.iter().any(|l| l.dispatched < l.requested) {
            DispatchStatus::Partial
        } else {
            DispatchStatus::Complete
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchBatch {
    pub id: i64,
    pub client_id: i64,
    pub client: String,
    pub operator: Option<String>,
    pub order_number: Option<String>,
    pub created_at: String,
    pub status: DispatchStatus,
    pub items: Vec<DispatchLine>,
    pub photos: Vec<DispatchPhoto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Complete,
    Partial,
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub item_id: i64,
    pub product: ProductRef,
    pub requested: i64,
    pub dispatched: i64,
    pub pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub id: i64,
    pub number: String,
    pub client: String,
    pub created_at: String,
    pub status: OrderStatus,
    pub requested_units: i64,
    pub dispatched_units: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub id: i64,
    pub number: String,
    pub client_id: i64,
    pub client: String,
    pub created_at: String,
    pub status: OrderStatus,
    pub items: Vec<OrderLine>,
    pub dispatches: Vec<DispatchBatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub user: String,
    pub action: String,
    pub table: Option<String>,
    pub target_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: String,
}

/// Inclusive day range used by history and log filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Ok(DateRange {
            start: parse_optional_day(start, "start")?,
            end: parse_optional_day(end, "end")?,
        })
    }

    /// First timestamp inside the range.
    pub fn lower_bound(&self) -> Option<String> {
        self.start
            .map(|d| format!("{} 00:00:00", d.format("%Y-%m-%d")))
    }

    /// First timestamp after the range.
    pub fn upper_bound(&self) -> Option<String> {
        self.end
            .map(|d| format!("{} 00:00:00", (d + Duration::days(1)).format("%Y-%m-%d")))
    }
}

fn parse_optional_day(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_day(s)
            .map(Some)
            .ok_or_else(|| LedgerError::validation(format!("invalid {field} date '{s}'"))),
    }
}

/// Accepts `YYYY-MM-DD` or `DD/MM/YYYY`.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

/// Trims user input and drops anything that looks like a markup tag.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// `clean_text` for optional fields; blank becomes `None`.
pub fn clean_optional(raw: Option<&str>) -> Option<String> {
    raw.map(clean_text).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_tags_and_whitespace() {
        assert_eq!(clean_text("  <b>Bolts</b> M8 "), "Bolts M8");
        assert_eq!(clean_text("<script>x</script>"), "x");
        assert_eq!(clean_text("a > b"), "a > b");
        assert_eq!(clean_optional(Some("   ")), None);
    }

    #[test]
    fn parse_day_accepts_both_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_day("2024-03-09"), Some(d));
        assert_eq!(parse_day("09/03/2024"), Some(d));
        assert_eq!(parse_day("March 9"), None);
    }

    #[test]
    fn date_range_bounds_are_inclusive_of_end_day() {
        let range = DateRange::parse(Some("2024-01-31"), Some("2024-01-31")).unwrap();
        assert_eq!(range.lower_bound().as_deref(), Some("2024-01-31 00:00:00"));
        assert_eq!(range.upper_bound().as_deref(), Some("2024-02-01 00:00:00"));
        assert!(DateRange::parse(Some("31-01-2024"), None).is_err());
        assert_eq!(DateRange::parse(Some(""), None).unwrap(), DateRange::default());
    }

    #[test]
    fn dispatch_status_flags_short_lines() {
        let line = |requested, dispatched| DispatchLine {
            entry_id: 1,
            product: ProductRef { id: 1, name: "A".into(), brand: "B".into() },
            requested,
            dispatched,
            short: dispatched < requested,
        };
        assert_eq!(DispatchStatus::of(&[line(3, 3)]), DispatchStatus::Complete);
        assert_eq!(DispatchStatus::of(&[line(3, 3), line(4, 1)]), DispatchStatus::Partial);
    }
}
