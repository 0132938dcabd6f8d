use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_db::uom::models::UomConversion;
use tradesync_db::uom::repositories::UomConversionRepository;

/// A cache the manager clears once bulk reference data has been re-synced.
pub trait CacheInvalidation: Send + Sync {
    fn name(&self) -> &str;
    fn invalidate(&self);
}

/// Immutable conversion table keyed by `(from_uom, to_uom)`.
#[derive(Debug, Default)]
pub struct ConversionTable {
    conversions: HashMap<(i64, i64), UomConversion>,
}

impl ConversionTable {
    pub fn new(conversions: Vec<UomConversion>) -> Self {
        Self {
            conversions: conversions
                .into_iter()
                .map(|c| ((c.from_uom, c.to_uom), c))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }

    /// Convert `value` between units. Volume to weight multiplies by the
    /// specific gravity, weight to volume divides by it; a missing gravity
    /// counts as 1.
    pub fn convert(
        &self,
        value: f64,
        from_uom: i64,
        to_uom: i64,
        specific_gravity: Option<f64>,
    ) -> TradeSyncResult<f64> {
        if from_uom == to_uom {
            return Ok(value);
        }

        let conversion = self.conversions.get(&(from_uom, to_uom)).ok_or_else(|| {
            TradeSyncError::NotFound(format!("no unit conversion from {from_uom} to {to_uom}"))
        })?;

        let gravity = specific_gravity.unwrap_or(1.0);
        let gravity_factor = match conversion.conversion_type().as_str() {
            "VW" => gravity,
            "WV" => {
                if gravity == 0.0 {
                    return Err(TradeSyncError::Validation(format!(
                        "cannot convert {from_uom} to {to_uom} with zero specific gravity"
                    )));
                }
                1.0 / gravity
            }
            _ => 1.0,
        };

        Ok(value * conversion.factor * gravity_factor)
    }
}

/// Lazily loaded unit-of-measure conversions.
///
/// Constructed once by the service and shared with the translators that need
/// it. There is no timed expiry; [`invalidate`](Self::invalidate) drops the
/// table and the next [`load`](Self::load) reads it again.
pub struct UomConversionCache {
    repo: Arc<dyn UomConversionRepository>,
    table: RwLock<Option<Arc<ConversionTable>>>,
}

impl UomConversionCache {
    pub fn new(repo: Arc<dyn UomConversionRepository>) -> Self {
        Self {
            repo,
            table: RwLock::new(None),
        }
    }

    pub async fn load(&self) -> TradeSyncResult<Arc<ConversionTable>> {
        if let Some(table) = self.snapshot() {
            return Ok(table);
        }

        let table = Arc::new(ConversionTable::new(self.repo.list_conversions().await?));
        if table.is_empty() {
            tracing::warn!("unit conversion table is empty, converted quantities will be sent as null");
        } else {
            tracing::debug!(conversions = table.len(), "loaded unit conversions");
        }
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&table));
        Ok(table)
    }

    pub async fn convert(
        &self,
        value: f64,
        from_uom: i64,
        to_uom: i64,
        specific_gravity: Option<f64>,
    ) -> TradeSyncResult<f64> {
        self.load()
            .await?
            .convert(value, from_uom, to_uom, specific_gravity)
    }

    /// The loaded table, if any.
    pub fn snapshot(&self) -> Option<Arc<ConversionTable>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn invalidate(&self) {
        self.table.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl CacheInvalidation for UomConversionCache {
    fn name(&self) -> &str {
        "uom_conversions"
    }

    fn invalidate(&self) {
        UomConversionCache::invalidate(self);
    }
}
