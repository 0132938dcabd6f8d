use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::uom::{ConversionTable, UomConversionCache};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_db::source::models::{EntityKind, SourceRow};

/// Destination-shaped record produced from one source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationRecord {
    pub source_system_id: i32,
    pub source_id: i64,
    pub entity: EntityKind,
    pub changed_at: Option<DateTime<Utc>>,
    pub fields: Map<String, Value>,
}

/// Converts a batch of source rows into destination records.
///
/// Data-quality problems (an unknown code, a missing conversion) are logged
/// and the affected field is sent as null; they never fail the batch.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Load whatever lookups `translate` needs. Called once per job run,
    /// before the first fetch.
    async fn prepare(&self) -> TradeSyncResult<()> {
        Ok(())
    }

    fn translate(&self, source_system_id: i32, rows: &[SourceRow]) -> Vec<IntegrationRecord>;
}

#[derive(Debug, Clone)]
enum FieldMapping {
    Copy {
        source: String,
        target: String,
    },
    Lookup {
        source: String,
        target: String,
        table: HashMap<String, String>,
    },
    /// `{ "sourceSystemId": .., "sourceId": .. }` pointing at another synced entity.
    Reference {
        source: String,
        target: String,
    },
    Quantity {
        value: String,
        uom: String,
        specific_gravity: Option<String>,
        to_uom: i64,
        target: String,
    },
}

/// Table-driven translator: a list of field mappings applied to each row's
/// JSON payload.
#[derive(Clone)]
pub struct RecordTranslator {
    entity: EntityKind,
    mappings: Vec<FieldMapping>,
    required: Vec<String>,
    uom: Option<Arc<UomConversionCache>>,
}

impl RecordTranslator {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            mappings: Vec::new(),
            required: Vec::new(),
            uom: None,
        }
    }

    pub fn copy(mut self, source: &str, target: &str) -> Self {
        self.mappings.push(FieldMapping::Copy {
            source: source.to_owned(),
            target: target.to_owned(),
        });
        self
    }

    pub fn lookup<'a>(
        mut self,
        source: &str,
        target: &str,
        table: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.mappings.push(FieldMapping::Lookup {
            source: source.to_owned(),
            target: target.to_owned(),
            table: table
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        });
        self
    }

    pub fn reference(mut self, source: &str, target: &str) -> Self {
        self.mappings.push(FieldMapping::Reference {
            source: source.to_owned(),
            target: target.to_owned(),
        });
        self
    }

    /// Convert `value` from the row's `uom` into `to_uom`. A null quantity
    /// is sent as 0 whatever its unit.
    pub fn quantity(
        mut self,
        value: &str,
        uom: &str,
        specific_gravity: Option<&str>,
        to_uom: i64,
        target: &str,
    ) -> Self {
        self.mappings.push(FieldMapping::Quantity {
            value: value.to_owned(),
            uom: uom.to_owned(),
            specific_gravity: specific_gravity.map(str::to_owned),
            to_uom,
            target: target.to_owned(),
        });
        self
    }

    pub fn with_uom_cache(mut self, cache: Arc<UomConversionCache>) -> Self {
        self.uom = Some(cache);
        self
    }

    /// Drop rows whose payload has no value for `column`.
    pub fn skip_without(mut self, column: &str) -> Self {
        self.required.push(column.to_owned());
        self
    }

    fn needs_uom(&self) -> bool {
        self.mappings
            .iter()
            .any(|m| matches!(m, FieldMapping::Quantity { .. }))
    }

    fn translate_row(
        &self,
        source_system_id: i32,
        row: &SourceRow,
        uom: Option<&ConversionTable>,
    ) -> IntegrationRecord {
        let mut fields = Map::new();
        for mapping in &self.mappings {
            let (target, value) = match mapping {
                FieldMapping::Copy { source, target } => (target, field(row, source).clone()),
                FieldMapping::Lookup {
                    source,
                    target,
                    table,
                } => (target, self.lookup_value(row, source, table)),
                FieldMapping::Reference { source, target } => {
                    let value = match field(row, source).as_i64() {
                        Some(id) => serde_json::json!({
                            "sourceSystemId": source_system_id,
                            "sourceId": id,
                        }),
                        None => Value::Null,
                    };
                    (target, value)
                }
                FieldMapping::Quantity {
                    value,
                    uom: uom_column,
                    specific_gravity,
                    to_uom,
                    target,
                } => (
                    target,
                    self.convert_quantity(row, value, uom_column, specific_gravity.as_deref(), *to_uom, uom),
                ),
            };
            fields.insert(target.clone(), value);
        }

        IntegrationRecord {
            source_system_id,
            source_id: row.id,
            entity: self.entity,
            changed_at: row.change_timestamp,
            fields,
        }
    }

    fn lookup_value(&self, row: &SourceRow, source: &str, table: &HashMap<String, String>) -> Value {
        let raw = match field(row, source) {
            Value::Null => return Value::Null,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match table.get(&raw) {
            Some(mapped) => Value::String(mapped.clone()),
            None => {
                tracing::warn!(
                    entity = %self.entity,
                    source_id = row.id,
                    column = source,
                    code = %raw,
                    "unmapped code, sending null"
                );
                Value::Null
            }
        }
    }

    fn convert_quantity(
        &self,
        row: &SourceRow,
        value: &str,
        uom_column: &str,
        specific_gravity: Option<&str>,
        to_uom: i64,
        table: Option<&ConversionTable>,
    ) -> Value {
        let amount = field(row, value);
        if amount.is_null() {
            return serde_json::json!(0.0);
        }
        let (Some(amount), Some(from_uom)) = (number(amount), field(row, uom_column).as_i64()) else {
            return Value::Null;
        };
        let gravity = specific_gravity.and_then(|column| number(field(row, column)));

        let Some(table) = table else {
            tracing::warn!(entity = %self.entity, source_id = row.id, "unit conversions not loaded, sending null");
            return Value::Null;
        };
        match table.convert(amount, from_uom, to_uom, gravity) {
            Ok(converted) => serde_json::Number::from_f64(converted)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Err(e) => {
                tracing::warn!(entity = %self.entity, source_id = row.id, error = %e, "quantity conversion failed, sending null");
                Value::Null
            }
        }
    }
}

fn field<'r>(row: &'r SourceRow, column: &str) -> &'r Value {
    row.payload.get(column).unwrap_or(&Value::Null)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Translator for RecordTranslator {
    async fn prepare(&self) -> TradeSyncResult<()> {
        if !self.needs_uom() {
            return Ok(());
        }
        let cache = self.uom.as_ref().ok_or_else(|| {
            TradeSyncError::Config(format!(
                "{} translator converts quantities but has no unit conversion cache",
                self.entity
            ))
        })?;
        cache.load().await.map(|_| ())
    }

    fn translate(&self, source_system_id: i32, rows: &[SourceRow]) -> Vec<IntegrationRecord> {
        let table = self.uom.as_ref().and_then(|cache| cache.snapshot());
        rows.iter()
            .filter(|row| {
                self.required
                    .iter()
                    .all(|column| !field(row, column).is_null())
            })
            .map(|row| self.translate_row(source_system_id, row, table.as_deref()))
            .collect()
    }
}
