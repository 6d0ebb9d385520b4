pub mod fundamentals;
pub mod models;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;

use crate::market::models::{Candle, ChartRange, Quote, ReportedFinancials};

/// Source of quotes, chart bars and company financials for one symbol.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn quote(&self) -> Result<Quote>;

    async fn candles(&self, range: ChartRange) -> Result<Vec<Candle>>;

    async fn financials(&self) -> Result<ReportedFinancials>;

    /// Human-readable name of this data source.
    fn name(&self) -> &str;
}
