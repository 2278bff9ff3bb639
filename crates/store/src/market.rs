use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::market::entity::{Bar, BarQuery, DataSource, MarketStats, SymbolCoverage};
use kabu_core::store::error::StoreError;
use kabu_core::store::port::MarketStore;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;
use tracing::debug;

/// 行情数据库文件名
const MARKET_DB: &str = "market.db";

type BarRow = (
    DateTime<Utc>,
    f64,
    f64,
    f64,
    f64,
    Option<f64>,
    f64,
    Option<f64>,
    Option<i64>,
    bool,
);

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn row_to_bar(r: BarRow) -> Bar {
    Bar {
        time: r.0,
        open: r.1,
        high: r.2,
        low: r.3,
        close: r.4,
        adj_close: r.5,
        volume: r.6,
        vwap: r.7,
        trade_count: r.8.and_then(|c| u64::try_from(c).ok()),
        is_final: r.9,
    }
}

/// MarketStore 的 SQLite 实现。
///
/// # Summary
/// 全部标的共用一个 `market.db`，主键 `(symbol, timeframe, time)`，
/// 便于跨标的统计与覆盖度查询。
///
/// # Invariants
/// * 表结构在实例创建时初始化。
/// * 周期以 `TimeFrame::as_str` 形式存储 (如 `1d`)。
pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    /// 在全局数据根目录下打开行情库。
    pub async fn new() -> Result<Self, StoreError> {
        Self::open(&crate::config::get_root_dir()).await
    }

    /// 在指定目录下创建或打开 SqliteMarketStore。
    ///
    /// # Logic
    /// 1. 确保目录存在。
    /// 2. 配置 SQLite 连接选项，开启 `create_if_missing` 与 WAL。
    /// 3. 执行建表与建索引 DDL。
    ///
    /// # Arguments
    /// * `dir` - 数据目录。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或错误。
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let db_path = crate::config::prepare_db_path(dir, MARKET_DB)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                time DATETIME NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                adj_close REAL,
                volume REAL NOT NULL,
                vwap REAL,
                trade_count INTEGER,
                is_final INTEGER NOT NULL,
                source TEXT NOT NULL,
                ingested_at DATETIME NOT NULL,
                PRIMARY KEY (symbol, timeframe, time)
            );

            CREATE INDEX IF NOT EXISTS idx_bars_time ON bars (time);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    /// # Summary
    /// 批量保存 K 线数据。
    ///
    /// # Logic
    /// 1. 开启事务。
    /// 2. 逐条执行 `INSERT OR REPLACE`。
    /// 3. 提交事务。
    async fn save_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        source: DataSource,
        bars: &[Bar],
    ) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO bars
                    (symbol, timeframe, time, open, high, low, close, adj_close, volume,
                     vwap, trade_count, is_final, source, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(bar.time)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.adj_close)
            .bind(bar.volume)
            .bind(bar.vwap)
            .bind(bar.trade_count.map(|c| i64::try_from(c).unwrap_or(i64::MAX)))
            .bind(bar.is_final)
            .bind(source.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(
            "Saved {} {} bars for {} from {}",
            bars.len(),
            timeframe,
            symbol,
            source
        );
        Ok(bars.len())
    }

    /// # Summary
    /// 加载 K 线数据。
    ///
    /// # Logic
    /// 1. 按时间倒序查询，`LIMIT -1` 表示不限条数。
    /// 2. 反转为升序返回，这样 `limit` 截取的是最新的若干根。
    async fn load_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StoreError> {
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut rows = sqlx::query_as::<_, BarRow>(
            r#"
            SELECT time, open, high, low, close, adj_close, volume, vwap, trade_count, is_final
            FROM bars
            WHERE symbol = ? AND timeframe = ?
              AND (? IS NULL OR time >= ?)
              AND (? IS NULL OR time <= ?)
            ORDER BY time DESC
            LIMIT ?
            "#,
        )
        .bind(&query.symbol)
        .bind(query.timeframe.as_str())
        .bind(query.start)
        .bind(query.start)
        .bind(query.end)
        .bind(query.end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.reverse();
        Ok(rows.into_iter().map(row_to_bar).collect())
    }

    async fn latest_bar(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<Option<Bar>, StoreError> {
        let row = sqlx::query_as::<_, BarRow>(
            r#"
            SELECT time, open, high, low, close, adj_close, volume, vwap, trade_count, is_final
            FROM bars
            WHERE symbol = ? AND timeframe = ?
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(row_to_bar))
    }

    async fn count_bars(
        &self,
        symbol: &str,
        timeframe: Option<TimeFrame>,
    ) -> Result<u64, StoreError> {
        let tf = timeframe.map(|t| t.as_str());
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bars WHERE symbol = ? AND (? IS NULL OR timeframe = ?)",
        )
        .bind(symbol)
        .bind(tf)
        .bind(tf)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(to_u64(count))
    }

    /// # Summary
    /// 查询覆盖度。
    ///
    /// # Logic
    /// 1. 按 `(symbol, timeframe)` 分组统计条数及首尾时间。
    /// 2. 周期字符串还原为 `TimeFrame`，按标的、周期时长排序。
    async fn coverage(&self, symbol: Option<&str>) -> Result<Vec<SymbolCoverage>, StoreError> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                String,
                i64,
                Option<DateTime<Utc>>,
                Option<DateTime<Utc>>,
            ),
        >(
            r#"
            SELECT symbol, timeframe, COUNT(*), MIN(time), MAX(time)
            FROM bars
            WHERE (? IS NULL OR symbol = ?)
            GROUP BY symbol, timeframe
            "#,
        )
        .bind(symbol)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = rows
            .into_iter()
            .map(|r| {
                let timeframe = r
                    .1
                    .parse::<TimeFrame>()
                    .map_err(StoreError::Corrupted)?;
                Ok(SymbolCoverage {
                    symbol: r.0,
                    timeframe,
                    bar_count: to_u64(r.2),
                    first: r.3,
                    last: r.4,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        out.sort_by(|a, b| (&a.symbol, a.timeframe).cmp(&(&b.symbol, b.timeframe)));
        Ok(out)
    }

    async fn stats(&self) -> Result<MarketStats, StoreError> {
        let (total, earliest, latest, symbols): (
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(*), MIN(time), MAX(time), COUNT(DISTINCT symbol) FROM bars",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let by_timeframe: Vec<(String, i64)> =
            sqlx::query_as("SELECT timeframe, COUNT(*) FROM bars GROUP BY timeframe")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        let by_source: Vec<(String, i64)> =
            sqlx::query_as("SELECT source, COUNT(*) FROM bars GROUP BY source")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(MarketStats {
            symbols_with_data: to_u64(symbols),
            total_bars: to_u64(total),
            earliest,
            latest,
            bars_by_timeframe: by_timeframe
                .into_iter()
                .map(|(k, v)| (k, to_u64(v)))
                .collect(),
            bars_by_source: by_source.into_iter().map(|(k, v)| (k, to_u64(v))).collect(),
            ..MarketStats::default()
        })
    }

    async fn delete_bars(&self, symbol: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM bars WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
