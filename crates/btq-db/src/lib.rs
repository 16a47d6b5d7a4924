//! Postgres adapter for the backtest platform.
//!
//! Everything stateful lives here: the run queue (claimed with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never take the same
//! run), daily bar loading, and idempotent persistence of a run's
//! equity/fills/metrics. The engine itself never sees this crate.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use btq_engine::{Bar, EquityPoint, Fill, RunMetrics, Side};

pub const ENV_DB_URL: &str = "DATABASE_URL";

/// Connect to Postgres using DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests:
/// - Connect using DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(anyhow!("invalid run status: {}", other)),
        }
    }
}

/// A run this worker now exclusively owns (status RUNNING).
#[derive(Debug, Clone)]
pub struct ClaimedRun {
    pub run_id: Uuid,
    pub strategy_id: Option<Uuid>,
    pub config_json: Value,
}

/// Atomically claim the oldest QUEUED run and transition it to RUNNING.
///
/// Single statement: the `FOR UPDATE SKIP LOCKED` select and the status
/// update commit together, so concurrent workers either claim different
/// runs or find the queue empty. Claim order approximates FIFO by
/// `created_at` but is not strict under contention.
pub async fn claim_next_run(pool: &PgPool) -> Result<Option<ClaimedRun>> {
    let row = sqlx::query(
        r#"
        with next_run as (
            select id
            from runs
            where status = 'QUEUED'
            order by created_at asc
            limit 1
            for update skip locked
        )
        update runs
           set status     = 'RUNNING',
               started_at = now(),
               error      = null
         where id in (select id from next_run)
        returning id, strategy_id, config_json
        "#,
    )
    .fetch_optional(pool)
    .await
    .context("claim_next_run failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ClaimedRun {
        run_id: row.try_get("id")?,
        strategy_id: row.try_get("strategy_id")?,
        config_json: row.try_get("config_json")?,
    }))
}

/// Transition a run to FAILED with a truncated error message.
pub async fn mark_failed(pool: &PgPool, run_id: Uuid, error: &str) -> Result<()> {
    let truncated: String = error.chars().take(10_000).collect();
    sqlx::query(
        r#"
        update runs
           set status      = 'FAILED',
               finished_at = now(),
               error       = $2
         where id = $1
        "#,
    )
    .bind(run_id)
    .bind(&truncated)
    .execute(pool)
    .await
    .context("mark_failed failed")?;
    Ok(())
}

/// Manual requeue: put a run back in the queue for re-execution.
///
/// This is the recovery path for runs stuck in RUNNING after a worker
/// crash, and the re-execution path for completed runs. Persistence is
/// idempotent, so re-running is safe. Returns false if the run was
/// already QUEUED (or does not exist).
pub async fn requeue_run(pool: &PgPool, run_id: Uuid) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update runs
           set status      = 'QUEUED',
               started_at  = null,
               finished_at = null,
               error       = null
         where id = $1
           and status in ('RUNNING', 'COMPLETED', 'FAILED')
        "#,
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("requeue_run failed")?;
    Ok(res.rows_affected() == 1)
}

/// Append a structured run log row. Lifecycle milestones only; per-bar
/// chatter stays in tracing.
pub async fn append_run_log(pool: &PgPool, run_id: Uuid, level: &str, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into run_logs (run_id, ts, level, message)
        values ($1, now(), $2, $3)
        "#,
    )
    .bind(run_id)
    .bind(level)
    .bind(message)
    .execute(pool)
    .await
    .context("append_run_log failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Strategy / portfolio resolution
// ---------------------------------------------------------------------------

/// Fetch the stored code text for a strategy, if the row exists.
pub async fn fetch_strategy_code(pool: &PgPool, strategy_id: Uuid) -> Result<Option<String>> {
    let row = sqlx::query("select code from strategies where id = $1")
        .bind(strategy_id)
        .fetch_optional(pool)
        .await
        .context("fetch_strategy_code failed")?;
    Ok(row.map(|r| r.try_get("code")).transpose()?)
}

/// Resolve a portfolio to its tickers, ascending. Empty result means the
/// portfolio has no symbols (or does not exist); the caller decides how
/// fatal that is.
pub async fn resolve_portfolio_tickers(pool: &PgPool, portfolio_id: Uuid) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        select s.ticker
        from portfolio_symbols ps
        join symbols s on s.id = ps.symbol_id
        where ps.portfolio_id = $1
        order by s.ticker asc
        "#,
    )
    .bind(portfolio_id)
    .fetch_all(pool)
    .await
    .context("resolve_portfolio_tickers failed")?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("ticker").map_err(Into::into))
        .collect()
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Bars for a run, grouped per date, plus the ticker -> symbol_id mapping
/// needed to persist fills.
#[derive(Debug, Clone)]
pub struct LoadedBars {
    /// Dates ascending; within a date, bars ascending by ticker.
    pub by_date: BTreeMap<NaiveDate, Vec<Bar>>,
    pub symbol_ids: BTreeMap<String, Uuid>,
}

impl LoadedBars {
    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    pub fn bar_count(&self) -> usize {
        self.by_date.values().map(Vec::len).sum()
    }
}

/// Load daily bars for the given tickers and inclusive date range.
///
/// Ordering contract: dates ascend strictly; within a date, tickers ascend
/// lexicographically. This ordering is observable by strategies and must
/// stay stable. Missing dates are simply absent.
pub async fn load_bars_by_date(
    pool: &PgPool,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<LoadedBars> {
    let rows = sqlx::query(
        r#"
        select
            b.date,
            s.ticker,
            b.open_paise,
            b.high_paise,
            b.low_paise,
            b.close_paise,
            b.volume,
            s.id as symbol_id
        from bars_daily b
        join symbols s on s.id = b.symbol_id
        where s.ticker = any($1)
          and b.date between $2 and $3
        order by b.date asc, s.ticker asc
        "#,
    )
    .bind(tickers)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("load_bars_by_date failed")?;

    let mut by_date: BTreeMap<NaiveDate, Vec<Bar>> = BTreeMap::new();
    let mut symbol_ids: BTreeMap<String, Uuid> = BTreeMap::new();

    for row in rows {
        let date: NaiveDate = row.try_get("date")?;
        let ticker: String = row.try_get("ticker")?;
        symbol_ids.insert(ticker.clone(), row.try_get("symbol_id")?);

        by_date.entry(date).or_default().push(Bar {
            date,
            symbol: ticker,
            open_paise: row.try_get("open_paise")?,
            high_paise: row.try_get("high_paise")?,
            low_paise: row.try_get("low_paise")?,
            close_paise: row.try_get("close_paise")?,
            volume: row.try_get("volume")?,
        });
    }

    Ok(LoadedBars {
        by_date,
        symbol_ids,
    })
}

// ---------------------------------------------------------------------------
// Result persistence
// ---------------------------------------------------------------------------

/// Persist a finished run's outputs and mark it COMPLETED, atomically.
///
/// Idempotent: any derivative rows from a previous execution are deleted
/// inside the same transaction before the fresh rows go in, so requeued
/// runs converge to the same stored state.
pub async fn persist_results(
    pool: &PgPool,
    run_id: Uuid,
    equity: &[EquityPoint],
    fills: &[Fill],
    metrics: &RunMetrics,
    symbol_ids: &BTreeMap<String, Uuid>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin persist tx")?;

    for table in ["run_equity", "run_fills", "run_metrics"] {
        sqlx::query(&format!("delete from {table} where run_id = $1"))
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("clear {table} failed"))?;
    }

    for p in equity {
        sqlx::query(
            r#"
            insert into run_equity (run_id, date, equity_paise)
            values ($1, $2, $3)
            "#,
        )
        .bind(run_id)
        .bind(p.date)
        .bind(p.equity_paise)
        .execute(&mut *tx)
        .await
        .context("insert run_equity failed")?;
    }

    for f in fills {
        let Some(symbol_id) = symbol_ids.get(&f.symbol) else {
            // A fill can only exist for a loaded bar, so this means the
            // caller passed an inconsistent mapping. Skip rather than abort.
            tracing::warn!(run_id = %run_id, symbol = %f.symbol, "fill for unmapped ticker skipped");
            continue;
        };
        sqlx::query(
            r#"
            insert into run_fills
                (run_id, date, symbol_id, side, qty, price_paise, fee_paise, order_id)
            values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run_id)
        .bind(f.date)
        .bind(symbol_id)
        .bind(f.side.as_str())
        .bind(f.qty)
        .bind(f.price_paise)
        .bind(f.fee_paise)
        .bind(f.order_id as i64)
        .execute(&mut *tx)
        .await
        .context("insert run_fills failed")?;
    }

    sqlx::query(
        r#"
        insert into run_metrics
            (run_id, sharpe, max_drawdown_paise, max_drawdown_pct, win_rate,
             trades_closed, realized_pnl_paise, fees_paise, annual_return_pct, volatility)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(run_id)
    .bind(metrics.sharpe)
    .bind(metrics.max_drawdown_paise)
    .bind(metrics.max_drawdown_pct)
    .bind(metrics.win_rate)
    .bind(metrics.trades_closed)
    .bind(metrics.realized_pnl_paise)
    .bind(metrics.fees_paise)
    .bind(metrics.annual_return_pct)
    .bind(metrics.volatility)
    .execute(&mut *tx)
    .await
    .context("insert run_metrics failed")?;

    sqlx::query(
        r#"
        update runs
           set status      = 'COMPLETED',
               finished_at = now()
         where id = $1
        "#,
    )
    .bind(run_id)
    .execute(&mut *tx)
    .await
    .context("mark run COMPLETED failed")?;

    tx.commit().await.context("commit persist tx")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Seeding and readback (testkit + operational tooling)
// ---------------------------------------------------------------------------

/// Insert a symbol if missing, returning its id either way.
pub async fn upsert_symbol(pool: &PgPool, ticker: &str) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        insert into symbols (ticker)
        values ($1)
        on conflict (ticker) do update set ticker = excluded.ticker
        returning id
        "#,
    )
    .bind(ticker)
    .fetch_one(pool)
    .await
    .context("upsert_symbol failed")?;
    Ok(row.try_get("id")?)
}

/// Insert one daily bar (upsert on the (symbol_id, date) key).
pub async fn upsert_daily_bar(pool: &PgPool, symbol_id: Uuid, bar: &Bar) -> Result<()> {
    sqlx::query(
        r#"
        insert into bars_daily
            (symbol_id, date, open_paise, high_paise, low_paise, close_paise, volume)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (symbol_id, date) do update
          set open_paise  = excluded.open_paise,
              high_paise  = excluded.high_paise,
              low_paise   = excluded.low_paise,
              close_paise = excluded.close_paise,
              volume      = excluded.volume
        "#,
    )
    .bind(symbol_id)
    .bind(bar.date)
    .bind(bar.open_paise)
    .bind(bar.high_paise)
    .bind(bar.low_paise)
    .bind(bar.close_paise)
    .bind(bar.volume)
    .execute(pool)
    .await
    .context("upsert_daily_bar failed")?;
    Ok(())
}

pub async fn insert_strategy(pool: &PgPool, name: &str, code: &str) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        insert into strategies (name, code)
        values ($1, $2)
        returning id
        "#,
    )
    .bind(name)
    .bind(code)
    .fetch_one(pool)
    .await
    .context("insert_strategy failed")?;
    Ok(row.try_get("id")?)
}

/// Create a portfolio over existing symbols. Weights are optional and not
/// consumed by equal-weight runs.
pub async fn insert_portfolio(pool: &PgPool, name: &str, symbol_ids: &[Uuid]) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        insert into portfolios (name)
        values ($1)
        returning id
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .context("insert_portfolio failed")?;
    let portfolio_id: Uuid = row.try_get("id")?;

    for symbol_id in symbol_ids {
        sqlx::query(
            r#"
            insert into portfolio_symbols (portfolio_id, symbol_id)
            values ($1, $2)
            on conflict do nothing
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol_id)
        .execute(pool)
        .await
        .context("insert portfolio_symbols failed")?;
    }
    Ok(portfolio_id)
}

pub async fn enqueue_run(
    pool: &PgPool,
    strategy_id: Option<Uuid>,
    config_json: &Value,
) -> Result<Uuid> {
    let row = sqlx::query(
        r#"
        insert into runs (strategy_id, status, config_json)
        values ($1, 'QUEUED', $2)
        returning id
        "#,
    )
    .bind(strategy_id)
    .bind(config_json)
    .fetch_one(pool)
    .await
    .context("enqueue_run failed")?;
    Ok(row.try_get("id")?)
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub async fn fetch_run(pool: &PgPool, run_id: Uuid) -> Result<RunRow> {
    let row = sqlx::query(
        r#"
        select id, status, started_at, finished_at, error
        from runs
        where id = $1
        "#,
    )
    .bind(run_id)
    .fetch_one(pool)
    .await
    .context("fetch_run failed")?;

    Ok(RunRow {
        run_id: row.try_get("id")?,
        status: RunStatus::parse(&row.try_get::<String, _>("status")?)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
    })
}

pub async fn fetch_run_equity(pool: &PgPool, run_id: Uuid) -> Result<Vec<(NaiveDate, i64)>> {
    let rows = sqlx::query(
        r#"
        select date, equity_paise
        from run_equity
        where run_id = $1
        order by date asc
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("fetch_run_equity failed")?;

    rows.iter()
        .map(|r| Ok((r.try_get("date")?, r.try_get("equity_paise")?)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillRow {
    pub date: NaiveDate,
    pub symbol_id: Uuid,
    pub side: Side,
    pub qty: i64,
    pub price_paise: i64,
    pub fee_paise: i64,
    pub order_id: i64,
}

pub async fn fetch_run_fills(pool: &PgPool, run_id: Uuid) -> Result<Vec<FillRow>> {
    let rows = sqlx::query(
        r#"
        select date, symbol_id, side, qty, price_paise, fee_paise, order_id
        from run_fills
        where run_id = $1
        order by date asc, order_id asc
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("fetch_run_fills failed")?;

    rows.iter()
        .map(|r| {
            let side_text: String = r.try_get("side")?;
            let side = Side::parse(&side_text)
                .ok_or_else(|| anyhow!("invalid side in run_fills: {}", side_text))?;
            Ok(FillRow {
                date: r.try_get("date")?,
                symbol_id: r.try_get("symbol_id")?,
                side,
                qty: r.try_get("qty")?,
                price_paise: r.try_get("price_paise")?,
                fee_paise: r.try_get("fee_paise")?,
                order_id: r.try_get("order_id")?,
            })
        })
        .collect()
}

pub async fn fetch_run_metrics(pool: &PgPool, run_id: Uuid) -> Result<Option<RunMetrics>> {
    let row = sqlx::query(
        r#"
        select sharpe, max_drawdown_paise, max_drawdown_pct, win_rate,
               trades_closed, realized_pnl_paise, fees_paise,
               annual_return_pct, volatility
        from run_metrics
        where run_id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("fetch_run_metrics failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(RunMetrics {
        sharpe: row.try_get("sharpe")?,
        max_drawdown_paise: row.try_get("max_drawdown_paise")?,
        max_drawdown_pct: row.try_get("max_drawdown_pct")?,
        win_rate: row.try_get("win_rate")?,
        trades_closed: row.try_get("trades_closed")?,
        realized_pnl_paise: row.try_get("realized_pnl_paise")?,
        fees_paise: row.try_get("fees_paise")?,
        annual_return_pct: row.try_get("annual_return_pct")?,
        volatility: row.try_get("volatility")?,
    }))
}

pub async fn fetch_run_logs(pool: &PgPool, run_id: Uuid) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        select level, message
        from run_logs
        where run_id = $1
        order by ts asc, id asc
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("fetch_run_logs failed")?;

    rows.iter()
        .map(|r| Ok((r.try_get("level")?, r.try_get("message")?)))
        .collect()
}
