//! SQLite Persistent Storage
//!
//! Durable swap and checkpoint storage that survives service restarts.
//! Uses connection pooling via r2d2 for concurrent access.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{CheckpointStore, StorageError, StorageResult, SwapStore};
use crate::auth::SignedAuthorization;
use crate::types::{LogPosition, PaymentHash, SwapRecord, SwapState, SyncCheckpoint};

/// SQLite-backed store implementing both [`SwapStore`] and
/// [`CheckpointStore`]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Create a store at the given database path, running migrations if
    /// needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                payment_hash TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                offerer TEXT NOT NULL,
                claimer TEXT NOT NULL,
                token TEXT NOT NULL,
                amount INTEGER NOT NULL,
                security_deposit INTEGER NOT NULL DEFAULT 0,
                claimer_bounty INTEGER NOT NULL DEFAULT 0,
                sequence INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                required_confirmations INTEGER NOT NULL DEFAULT 1,
                nonce INTEGER NOT NULL DEFAULT 0,
                pay_in INTEGER NOT NULL,
                pay_out INTEGER NOT NULL,
                txo_hash TEXT,
                state TEXT NOT NULL DEFAULT 'created',
                commit_txid TEXT,
                claim_txid TEXT,
                authorization TEXT,
                observed_payment_height INTEGER,
                observed_payment_txid TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_swaps_state ON swaps(state);
            CREATE INDEX IF NOT EXISTS idx_swaps_updated_at ON swaps(updated_at);

            CREATE TABLE IF NOT EXISTS checkpoints (
                listener_id TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SwapRecord> {
        let hash_hex: String = row.get("payment_hash")?;
        let payment_hash = decode_hash(&hash_hex, "payment_hash")?;

        let kind_str: String = row.get("kind")?;
        let kind = kind_str
            .parse()
            .map_err(|e: String| invalid_column("kind", e))?;

        let state_str: String = row.get("state")?;
        let state = state_str
            .parse()
            .map_err(|e: String| invalid_column("state", e))?;

        let txo_hash = row
            .get::<_, Option<String>>("txo_hash")?
            .map(|s| decode_hash(&s, "txo_hash"))
            .transpose()?;

        let authorization = row
            .get::<_, Option<String>>("authorization")?
            .map(|json| {
                serde_json::from_str::<SignedAuthorization>(&json)
                    .map_err(|e| invalid_column("authorization", e.to_string()))
            })
            .transpose()?;

        Ok(SwapRecord {
            payment_hash,
            kind,
            offerer: row.get("offerer")?,
            claimer: row.get("claimer")?,
            token: row.get("token")?,
            amount: row.get::<_, i64>("amount")? as u64,
            security_deposit: row.get::<_, i64>("security_deposit")? as u64,
            claimer_bounty: row.get::<_, i64>("claimer_bounty")? as u64,
            sequence: row.get::<_, i64>("sequence")? as u64,
            expiry: row.get::<_, i64>("expiry")? as u64,
            required_confirmations: row.get::<_, i64>("required_confirmations")? as u16,
            nonce: row.get::<_, i64>("nonce")? as u64,
            pay_in: row.get::<_, i64>("pay_in")? != 0,
            pay_out: row.get::<_, i64>("pay_out")? != 0,
            txo_hash,
            state,
            commit_txid: row.get("commit_txid")?,
            claim_txid: row.get("claim_txid")?,
            authorization,
            observed_payment_height: row
                .get::<_, Option<i64>>("observed_payment_height")?
                .map(|v| v as u64),
            observed_payment_txid: row.get("observed_payment_txid")?,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
            error: row.get("error")?,
        })
    }

    fn put_sync(&self, record: &SwapRecord) -> StorageResult<()> {
        let conn = self.conn()?;

        let authorization = record
            .authorization
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO swaps (
                payment_hash, kind, offerer, claimer, token,
                amount, security_deposit, claimer_bounty, sequence, expiry,
                required_confirmations, nonce, pay_in, pay_out, txo_hash,
                state, commit_txid, claim_txid, authorization,
                observed_payment_height, observed_payment_txid,
                created_at, updated_at, error
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19,
                ?20, ?21,
                ?22, ?23, ?24
            )
            "#,
            params![
                hex::encode(record.payment_hash),
                record.kind.to_string(),
                record.offerer,
                record.claimer,
                record.token,
                record.amount as i64,
                record.security_deposit as i64,
                record.claimer_bounty as i64,
                record.sequence as i64,
                record.expiry as i64,
                record.required_confirmations as i64,
                record.nonce as i64,
                record.pay_in as i64,
                record.pay_out as i64,
                record.txo_hash.map(hex::encode),
                record.state.to_string(),
                record.commit_txid,
                record.claim_txid,
                authorization,
                record.observed_payment_height.map(|v| v as i64),
                record.observed_payment_txid,
                record.created_at as i64,
                record.updated_at as i64,
                record.error,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_sync(&self, payment_hash: &PaymentHash) -> StorageResult<Option<SwapRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM swaps WHERE payment_hash = ?1",
            params![hex::encode(payment_hash)],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn select_sync(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> StorageResult<Vec<SwapRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT * FROM swaps {}", where_clause);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(args, Self::row_to_record)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

fn decode_hash(hex_str: &str, column: &str) -> rusqlite::Result<[u8; 32]> {
    hex::decode(hex_str)
        .ok()
        .and_then(|raw| raw.try_into().ok())
        .ok_or_else(|| invalid_column(column, format!("bad hex: {}", hex_str)))
}

fn invalid_column(column: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("{}: {}", column, message).into(),
    )
}

#[async_trait]
impl SwapStore for SqliteStore {
    async fn put(&self, record: &SwapRecord) -> StorageResult<()> {
        self.put_sync(record)
    }

    async fn get(&self, payment_hash: &PaymentHash) -> StorageResult<Option<SwapRecord>> {
        self.get_sync(payment_hash)
    }

    async fn delete(&self, payment_hash: &PaymentHash) -> StorageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM swaps WHERE payment_hash = ?1",
                params![hex::encode(payment_hash)],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn get_by_state(&self, state: SwapState) -> StorageResult<Vec<SwapRecord>> {
        self.select_sync("WHERE state = ?1", &[&state.to_string()])
    }

    async fn get_active(&self) -> StorageResult<Vec<SwapRecord>> {
        self.select_sync(
            "WHERE state NOT IN ('claimed', 'refunded', 'expired', 'failed')",
            &[],
        )
    }

    async fn get_all(&self) -> StorageResult<Vec<SwapRecord>> {
        self.select_sync("", &[])
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn put(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()> {
        let position = serde_json::to_string(&checkpoint.position)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO checkpoints (listener_id, position, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                checkpoint.listener_id,
                position,
                checkpoint.updated_at as i64
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, listener_id: &str) -> StorageResult<Option<SyncCheckpoint>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT listener_id, position, updated_at FROM checkpoints WHERE listener_id = ?1",
            params![listener_id],
            |row| {
                let position_json: String = row.get("position")?;
                let position: LogPosition = serde_json::from_str(&position_json)
                    .map_err(|e| invalid_column("position", e.to_string()))?;
                Ok(SyncCheckpoint {
                    listener_id: row.get("listener_id")?,
                    position,
                    updated_at: row.get::<_, i64>("updated_at")? as u64,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn delete(&self, listener_id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE listener_id = ?1",
                params![listener_id],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthBody, AuthContext};
    use crate::types::{SwapKind, SwapParams};
    use solana_sdk::signer::keypair::Keypair;

    fn record(hash: u8) -> SwapRecord {
        SwapRecord::new(SwapParams {
            payment_hash: [hash; 32],
            kind: SwapKind::ChainNonced,
            offerer: "offerer".into(),
            claimer: "claimer".into(),
            token: "token".into(),
            amount: 100_000,
            security_deposit: 5_000,
            claimer_bounty: 1_000,
            expiry: 2_000_000_000,
            required_confirmations: 3,
            nonce: 77,
            pay_in: true,
            pay_out: false,
            txo_hash: Some([0x42; 32]),
        })
    }

    #[tokio::test]
    async fn test_record_round_trip_with_authorization() {
        let store = SqliteStore::in_memory().unwrap();

        let mut rec = record(1);
        rec.authorization = Some(SignedAuthorization::sign_ed25519(
            &Keypair::new(),
            AuthContext::Initialize,
            &AuthBody {
                amount: rec.amount,
                expiry: rec.expiry,
                sequence: rec.sequence,
                payment_hash: rec.payment_hash,
            },
            1_950_000_000,
            None,
        ));
        rec.mark_committed("commit-tx".into());
        rec.mark_payment_observed("btc-tx".into(), 103);

        SwapStore::put(&store, &rec).await.unwrap();
        let loaded = SwapStore::get(&store, &rec.payment_hash).await.unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = SqliteStore::in_memory().unwrap();
        let mut rec = record(2);

        SwapStore::put(&store, &rec).await.unwrap();
        rec.mark_committed("commit-tx".into());
        SwapStore::put(&store, &rec).await.unwrap();

        let loaded = SwapStore::get(&store, &rec.payment_hash).await.unwrap().unwrap();
        assert_eq!(loaded.state, SwapState::Committed);
        assert_eq!(SwapStore::get_all(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_active_filters_terminal_states() {
        let store = SqliteStore::in_memory().unwrap();

        let open = record(1);
        let mut claimed = record(2);
        claimed.mark_committed("tx".into());
        claimed.mark_claimed(None);
        let mut failed = record(3);
        failed.mark_failed("boom".into());

        SwapStore::put(&store, &open).await.unwrap();
        SwapStore::put(&store, &claimed).await.unwrap();
        SwapStore::put(&store, &failed).await.unwrap();

        let active = SwapStore::get_active(&store).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].payment_hash, open.payment_hash);

        let by_state = SwapStore::get_by_state(&store, SwapState::Claimed).await.unwrap();
        assert_eq!(by_state.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let store = SqliteStore::in_memory().unwrap();

        let cp = SyncCheckpoint::new("swap-events", LogPosition::Signature("5Nf3abc".into()));
        CheckpointStore::put(&store, &cp).await.unwrap();
        assert_eq!(CheckpointStore::get(&store, "swap-events").await.unwrap(), Some(cp));

        let cp2 = SyncCheckpoint::new("swap-events", LogPosition::Height(99));
        CheckpointStore::put(&store, &cp2).await.unwrap();
        let loaded = CheckpointStore::get(&store, "swap-events").await.unwrap().unwrap();
        assert_eq!(loaded.position, LogPosition::Height(99));

        assert!(CheckpointStore::delete(&store, "swap-events").await.unwrap());
        assert!(!CheckpointStore::delete(&store, "swap-events").await.unwrap());
    }
}
