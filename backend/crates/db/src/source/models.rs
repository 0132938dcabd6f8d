use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::filters::{BaseFilter, ResolvedFilter};
use crate::sync::models::{ResyncSet, WatermarkCursor};

/// Entity types synchronized from the source trading system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    CodeSet,
    Currency,
    UnitOfMeasure,
    Product,
    Counterparty,
    Colleague,
    Book,
    Location,
    CounterpartyLocation,
    PriceServiceSetup,
    TradePriceType,
    TradePriceValuationRule,
    PaymentTerm,
    Calendar,
    LogisticsPrice,
    ProductLocation,
    Trade,
    BillOfLading,
    Invoice,
    CustomInvoice,
    Eft,
    Price,
    InvoiceDocument,
    TradeDocument,
}

impl EntityKind {
    pub const ALL: [EntityKind; 24] = [
        Self::CodeSet,
        Self::Currency,
        Self::UnitOfMeasure,
        Self::Product,
        Self::Counterparty,
        Self::Colleague,
        Self::Book,
        Self::Location,
        Self::CounterpartyLocation,
        Self::PriceServiceSetup,
        Self::TradePriceType,
        Self::TradePriceValuationRule,
        Self::PaymentTerm,
        Self::Calendar,
        Self::LogisticsPrice,
        Self::ProductLocation,
        Self::Trade,
        Self::BillOfLading,
        Self::Invoice,
        Self::CustomInvoice,
        Self::Eft,
        Self::Price,
        Self::InvoiceDocument,
        Self::TradeDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeSet => "code_set",
            Self::Currency => "currency",
            Self::UnitOfMeasure => "unit_of_measure",
            Self::Product => "product",
            Self::Counterparty => "counterparty",
            Self::Colleague => "colleague",
            Self::Book => "book",
            Self::Location => "location",
            Self::CounterpartyLocation => "counterparty_location",
            Self::PriceServiceSetup => "price_service_setup",
            Self::TradePriceType => "trade_price_type",
            Self::TradePriceValuationRule => "trade_price_valuation_rule",
            Self::PaymentTerm => "payment_term",
            Self::Calendar => "calendar",
            Self::LogisticsPrice => "logistics_price",
            Self::ProductLocation => "product_location",
            Self::Trade => "trade",
            Self::BillOfLading => "bill_of_lading",
            Self::Invoice => "invoice",
            Self::CustomInvoice => "custom_invoice",
            Self::Eft => "eft",
            Self::Price => "price",
            Self::InvoiceDocument => "invoice_document",
            Self::TradeDocument => "trade_document",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown entity kind: {value}"))
    }
}

/// One row read from the source system.
///
/// `change_timestamp` is the effective change time (see [`ChangeTimestamp`]);
/// reference data without change tracking leaves it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: i64,
    pub change_timestamp: Option<DateTime<Utc>>,
    pub counterparty_id: Option<i64>,
    pub payload: serde_json::Value,
}

/// How a relation's change time is computed.
///
/// `Greatest` takes the latest non-null of several sub-record timestamps. The
/// `typed_sql` rendering is reused verbatim in the select list, cursor
/// predicate, cutoff and ordering so the cursor and the filter can never
/// disagree, even over `timestamp without time zone` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeTimestamp {
    Column(String),
    Greatest(Vec<String>),
}

impl ChangeTimestamp {
    pub fn sql(&self) -> String {
        match self {
            Self::Column(column) => column.clone(),
            Self::Greatest(columns) => format!("greatest({})", columns.join(", ")),
        }
    }

    /// The expression cast to `timestamptz`, the type cursor values are bound as.
    pub fn typed_sql(&self) -> String {
        format!("({})::timestamptz", self.sql())
    }
}

/// Where and how one entity type is read from the source database.
#[derive(Debug, Clone)]
pub struct EntitySource {
    pub kind: EntityKind,
    /// `FROM` clause, joins included.
    pub relation: String,
    pub id_column: String,
    pub change_timestamp: Option<ChangeTimestamp>,
    /// Owning counterparty, used by resync passes.
    pub counterparty_column: Option<String>,
    /// SQL expression producing the row's `jsonb` payload.
    pub payload: String,
    pub base_filters: Vec<BaseFilter>,
}

impl EntitySource {
    pub fn new(kind: EntityKind, relation: &str, id_column: &str, payload: &str) -> Self {
        Self {
            kind,
            relation: relation.to_owned(),
            id_column: id_column.to_owned(),
            change_timestamp: None,
            counterparty_column: None,
            payload: payload.to_owned(),
            base_filters: Vec::new(),
        }
    }

    pub fn changed_at(mut self, change_timestamp: ChangeTimestamp) -> Self {
        self.change_timestamp = Some(change_timestamp);
        self
    }

    pub fn owned_by(mut self, counterparty_column: &str) -> Self {
        self.counterparty_column = Some(counterparty_column.to_owned());
        self
    }

    pub fn filter(mut self, filter: BaseFilter) -> Self {
        self.base_filters.push(filter);
        self
    }
}

/// Arguments of one `next_batch` call.
#[derive(Debug, Clone)]
pub struct BatchRequest<'a> {
    pub base: &'a [ResolvedFilter],
    /// `Some` on a resync pass: only rows owned by these counterparties.
    pub resync: Option<&'a ResyncSet>,
    pub cursor: WatermarkCursor,
    /// Rows changed at or after this instant are left for the next run.
    pub cutoff: DateTime<Utc>,
    pub batch_size: usize,
    pub timeout: Option<Duration>,
}

impl BatchRequest<'_> {
    pub fn is_resync(&self) -> bool {
        self.resync.is_some()
    }
}

/// One fetched batch, ordered by `(change_timestamp, id)` ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub records: Vec<SourceRow>,
}

impl BatchResult {
    pub fn new(records: Vec<SourceRow>) -> Self {
        Self { records }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// A full batch means more rows may follow.
    pub fn is_full(&self, batch_size: usize) -> bool {
        self.count() == batch_size
    }

    /// Cursor after this batch: the greatest timestamp seen and the greatest
    /// id at that timestamp. An empty batch leaves the cursor unchanged.
    pub fn advance(&self, cursor: &WatermarkCursor) -> WatermarkCursor {
        let Some(max_ts) = self.records.iter().filter_map(|r| r.change_timestamp).max() else {
            return *cursor;
        };
        let max_id = self
            .records
            .iter()
            .filter(|r| r.change_timestamp == Some(max_ts))
            .map(|r| r.id)
            .max();

        WatermarkCursor {
            last_timestamp: Some(max_ts),
            last_id: max_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: i64, minute: u32) -> SourceRow {
        SourceRow {
            id,
            change_timestamp: Some(Utc.with_ymd_and_hms(2026, 3, 2, 8, minute, 0).unwrap()),
            counterparty_id: None,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn advance_takes_max_id_at_max_timestamp() {
        let batch = BatchResult::new(vec![row(9, 1), row(3, 2), row(5, 2)]);
        let cursor = batch.advance(&WatermarkCursor::empty());
        assert_eq!(cursor.last_timestamp, row(0, 2).change_timestamp);
        assert_eq!(cursor.last_id, Some(5));
    }

    #[test]
    fn advance_on_empty_batch_keeps_cursor() {
        let existing = WatermarkCursor::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), 4);
        assert_eq!(BatchResult::default().advance(&existing), existing);
    }

    #[test]
    fn full_batch_detection() {
        let batch = BatchResult::new(vec![row(1, 1), row(2, 1)]);
        assert!(batch.is_full(2));
        assert!(!batch.is_full(3));
    }

    #[test]
    fn greatest_renders_all_columns() {
        let ts = ChangeTimestamp::Greatest(vec!["th.xhdr_date".into(), "mh.change_date".into()]);
        assert_eq!(ts.sql(), "greatest(th.xhdr_date, mh.change_date)");
        assert_eq!(ChangeTimestamp::Column("dh.revised_at".into()).sql(), "dh.revised_at");
        assert_eq!(ts.typed_sql(), "(greatest(th.xhdr_date, mh.change_date))::timestamptz");
    }

    #[test]
    fn entity_kind_roundtrips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(EntityKind::from_str("widget").is_err());
    }
}
