use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::uom::models::UomConversion;
use crate::uom::repositories::UomConversionRepository;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// Reads the unit conversion table from the source system.
pub struct PgUomConversionRepository {
    pool: PgPool,
}

impl PgUomConversionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> UomConversion {
        UomConversion {
            from_uom: row.get("from_uom"),
            to_uom: row.get("to_uom"),
            factor: row.get("factor"),
            from_uom_type: row.get("from_uom_type"),
            to_uom_type: row.get("to_uom_type"),
        }
    }
}

#[async_trait]
impl UomConversionRepository for PgUomConversionRepository {
    async fn list_conversions(&self) -> TradeSyncResult<Vec<UomConversion>> {
        let rows = sqlx::query(
            "select from_uom::bigint as from_uom, to_uom::bigint as to_uom,
                    factor::float8 as factor,
                    from_uom_type, to_uom_type
             from uom_conversions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Self::map_row).collect())
    }
}
