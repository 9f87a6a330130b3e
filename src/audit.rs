//! Execution audit trail.
//!
//! A local sqlite flight recorder for everything the core fires: detected
//! tokens, strikes, snipes and auto-sells. This is not the platform's
//! relational persistence (that lives behind the API boundary) - it is the
//! bot's own append-only record, consulted when reconciling what was
//! actually submitted.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::events::{StrikeResult, TokenDetected};

pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open audit database {}", path))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS system_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL DEFAULT (datetime('now')),
                kind TEXT NOT NULL,
                detail TEXT
            );
            CREATE TABLE IF NOT EXISTS detected_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL DEFAULT (datetime('now')),
                mint TEXT NOT NULL,
                symbol TEXT,
                dex TEXT,
                liquidity_sol REAL,
                is_rug INTEGER
            );
            CREATE TABLE IF NOT EXISTS strikes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL DEFAULT (datetime('now')),
                success INTEGER,
                profit REAL,
                output_symbol TEXT,
                worst_venue TEXT,
                best_venue TEXT,
                leg1_method TEXT,
                leg2_method TEXT,
                elapsed_ms INTEGER
            );
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL DEFAULT (datetime('now')),
                source TEXT NOT NULL,
                mint TEXT,
                symbol TEXT,
                amount_sol REAL,
                signature TEXT,
                submitted INTEGER,
                confirmed INTEGER,
                reason TEXT
            );",
        )
        .context("audit schema init")?;
        info!("🗒️ Audit log ready ({})", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn execute(&self, description: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<usize>) {
        let conn = self.conn.lock();
        if let Err(e) = f(&conn) {
            warn!("audit write failed ({}): {}", description, e);
        }
    }

    pub fn record_system_event(&self, kind: &str, detail: &str) {
        self.execute("system_event", |conn| {
            conn.execute(
                "INSERT INTO system_events (kind, detail) VALUES (?1, ?2)",
                params![kind, detail],
            )
        });
    }

    pub fn record_detected_token(&self, token: &TokenDetected) {
        self.execute("detected_token", |conn| {
            conn.execute(
                "INSERT INTO detected_tokens (mint, symbol, dex, liquidity_sol, is_rug)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    token.mint,
                    token.symbol,
                    token.dex_id,
                    token.initial_liquidity,
                    token.is_rug as i64,
                ],
            )
        });
    }

    pub fn record_strike(&self, result: &StrikeResult) {
        self.execute("strike", |conn| {
            conn.execute(
                "INSERT INTO strikes (success, profit, output_symbol, worst_venue, best_venue,
                                      leg1_method, leg2_method, elapsed_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    result.success as i64,
                    result.profit,
                    result.output_symbol,
                    result.worst_venue,
                    result.best_venue,
                    result.leg1_method,
                    result.leg2_method,
                    result.elapsed_ms as i64,
                ],
            )
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_trade(
        &self,
        source: &str,
        mint: &str,
        symbol: &str,
        amount_sol: f64,
        signature: Option<&str>,
        submitted: bool,
        confirmed: bool,
        reason: Option<&str>,
    ) {
        self.execute("trade", |conn| {
            conn.execute(
                "INSERT INTO trades (source, mint, symbol, amount_sol, signature,
                                     submitted, confirmed, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    source,
                    mint,
                    symbol,
                    amount_sol,
                    signature,
                    submitted as i64,
                    confirmed as i64,
                    reason,
                ],
            )
        });
    }

    pub fn strike_count(&self) -> u64 {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM strikes", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as u64
    }

    pub fn trade_count(&self) -> u64 {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_schema_and_inserts() {
        let audit = AuditLog::in_memory().unwrap();
        audit.record_system_event("start", "test run");
        audit.record_trade(
            "HFT Sell (TEST, take_profit)",
            "Mint111",
            "TEST",
            0.1,
            Some("sig111"),
            true,
            true,
            Some("take_profit"),
        );
        assert_eq!(audit.trade_count(), 1);
        assert_eq!(audit.strike_count(), 0);
    }

    #[test]
    fn test_record_strike() {
        let audit = AuditLog::in_memory().unwrap();
        audit.record_strike(&StrikeResult {
            success: true,
            profit: 1.25,
            output_symbol: "USDC".into(),
            worst_venue: "Orca".into(),
            best_venue: "Raydium".into(),
            leg1_method: "aggregator_fallback".into(),
            leg2_method: "raydium_direct".into(),
            leg1_ms: 420,
            leg2_ms: 1,
            elapsed_ms: 900,
            timestamp: Utc::now(),
        });
        assert_eq!(audit.strike_count(), 1);
    }
}
