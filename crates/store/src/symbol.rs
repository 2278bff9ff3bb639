use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kabu_core::market::entity::DataSource;
use kabu_core::store::error::StoreError;
use kabu_core::store::port::SymbolStore;
use kabu_core::tracker::entity::{SourceState, SourceStatus, SymbolStatus, TrackedSymbol};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;

/// 标的追踪数据库文件名
const SYMBOLS_DB: &str = "symbols.db";

type SymbolRow = (
    String,
    Option<String>,
    Option<String>,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<String>,
);

type StatusRow = (
    String,
    String,
    NaiveDate,
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
);

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_symbol(r: SymbolRow) -> Result<TrackedSymbol, StoreError> {
    Ok(TrackedSymbol {
        symbol: r.0,
        name: r.1,
        exchange: r.2,
        status: r.3.parse().map_err(StoreError::Corrupted)?,
        added_at: r.4,
        updated_at: r.5,
        last_data_at: r.6,
        delisted_at: r.7,
        status_reason: r.8,
    })
}

fn row_to_status(r: StatusRow) -> Result<SourceStatus, StoreError> {
    Ok(SourceStatus {
        symbol: r.0,
        source: r.1.parse().map_err(StoreError::Corrupted)?,
        date: r.2,
        state: r.3.parse::<SourceState>().map_err(StoreError::Corrupted)?,
        bar_count: u32::try_from(r.4).unwrap_or(0),
        message: r.5,
        checked_at: r.6,
    })
}

/// SymbolStore 的 SQLite 实现。
///
/// # Summary
/// 在 `symbols.db` 中维护标的生命周期 (`symbols`) 与按源按日采集状态 (`source_status`)。
///
/// # Invariants
/// * 数据库结构在存储实例创建时初始化。
/// * 所有操作均通过共享的 `SqlitePool` 执行。
pub struct SqliteSymbolStore {
    pool: SqlitePool,
}

impl SqliteSymbolStore {
    /// 在全局数据根目录下打开追踪库。
    pub async fn new() -> Result<Self, StoreError> {
        Self::open(&crate::config::get_root_dir()).await
    }

    /// 创建新的 SqliteSymbolStore 并初始化表结构。
    ///
    /// # Logic
    /// 1. 确保目录存在。
    /// 2. 连接数据库并执行 DDL。
    ///
    /// # Arguments
    /// * `dir` - 数据目录。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或数据库错误。
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let db_path = crate::config::prepare_db_path(dir, SYMBOLS_DB)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbols (
                symbol TEXT PRIMARY KEY,
                name TEXT,
                exchange TEXT,
                status TEXT NOT NULL,
                added_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_data_at DATETIME,
                delisted_at DATETIME,
                status_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS source_status (
                symbol TEXT NOT NULL,
                source TEXT NOT NULL,
                date DATE NOT NULL,
                state TEXT NOT NULL,
                bar_count INTEGER NOT NULL,
                message TEXT,
                checked_at DATETIME NOT NULL,
                PRIMARY KEY (symbol, source, date)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SymbolStore for SqliteSymbolStore {
    async fn upsert_symbol(&self, symbol: &TrackedSymbol) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO symbols
                (symbol, name, exchange, status, added_at, updated_at, last_data_at, delisted_at, status_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                exchange = excluded.exchange,
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_data_at = excluded.last_data_at,
                delisted_at = excluded.delisted_at,
                status_reason = excluded.status_reason
            "#,
        )
        .bind(&symbol.symbol)
        .bind(&symbol.name)
        .bind(&symbol.exchange)
        .bind(symbol.status.as_str())
        .bind(symbol.added_at)
        .bind(symbol.updated_at)
        .bind(symbol.last_data_at)
        .bind(symbol.delisted_at)
        .bind(&symbol.status_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_symbol(&self, symbol: &str) -> Result<Option<TrackedSymbol>, StoreError> {
        sqlx::query_as::<_, SymbolRow>(
            r#"
            SELECT symbol, name, exchange, status, added_at, updated_at, last_data_at, delisted_at, status_reason
            FROM symbols WHERE symbol = ?
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(row_to_symbol)
        .transpose()
    }

    async fn list_symbols(
        &self,
        status: Option<SymbolStatus>,
    ) -> Result<Vec<TrackedSymbol>, StoreError> {
        let status = status.map(|s| s.as_str());
        sqlx::query_as::<_, SymbolRow>(
            r#"
            SELECT symbol, name, exchange, status, added_at, updated_at, last_data_at, delisted_at, status_reason
            FROM symbols
            WHERE (? IS NULL OR status = ?)
            ORDER BY symbol ASC
            "#,
        )
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(row_to_symbol)
        .collect()
    }

    /// # Summary
    /// 变更标的状态。
    ///
    /// # Logic
    /// 1. 进入 `Delisted` 时写入 `delisted_at`，否则清空。
    /// 2. 未命中任何行时返回 NotFound。
    async fn set_status(
        &self,
        symbol: &str,
        status: SymbolStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let delisted_at = (status == SymbolStatus::Delisted).then_some(at);
        let result = sqlx::query(
            r#"
            UPDATE symbols
            SET status = ?, status_reason = ?, updated_at = ?, delisted_at = ?
            WHERE symbol = ?
            "#,
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(at)
        .bind(delisted_at)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(symbol.to_string()));
        }
        Ok(())
    }

    async fn touch_data(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE symbols SET last_data_at = ?
            WHERE symbol = ? AND (last_data_at IS NULL OR last_data_at < ?)
            "#,
        )
        .bind(at)
        .bind(symbol)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_source_status(&self, statuses: &[SourceStatus]) -> Result<(), StoreError> {
        if statuses.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for s in statuses {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO source_status
                    (symbol, source, date, state, bar_count, message, checked_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&s.symbol)
            .bind(s.source.as_str())
            .bind(s.date)
            .bind(s.state.as_str())
            .bind(i64::from(s.bar_count))
            .bind(&s.message)
            .bind(s.checked_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn source_history(
        &self,
        symbol: &str,
        source: Option<DataSource>,
        since: Option<NaiveDate>,
    ) -> Result<Vec<SourceStatus>, StoreError> {
        let source = source.map(|s| s.as_str());
        sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT symbol, source, date, state, bar_count, message, checked_at
            FROM source_status
            WHERE symbol = ?
              AND (? IS NULL OR source = ?)
              AND (? IS NULL OR date >= ?)
            ORDER BY date DESC, source ASC
            "#,
        )
        .bind(symbol)
        .bind(source)
        .bind(source)
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(row_to_status)
        .collect()
    }
}
