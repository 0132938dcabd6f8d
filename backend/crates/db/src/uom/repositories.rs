use async_trait::async_trait;

use crate::uom::models::UomConversion;
use tradesync_common::error::TradeSyncResult;

#[async_trait]
pub trait UomConversionRepository: Send + Sync {
    async fn list_conversions(&self) -> TradeSyncResult<Vec<UomConversion>>;
}
