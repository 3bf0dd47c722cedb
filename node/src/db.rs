use alloy::primitives::{Address, B256};
use anyhow::Error;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::str::FromStr;

/// Updater watermark, every block hash submitted to the oracle and the log
/// of state changing policy commands, so the in-process engine can be
/// rebuilt after a restart.
#[derive(Clone)]
pub struct DataBase {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: u64,
    /// Unix time the command ran at.
    pub executed_at: u64,
    /// JSON encoded command.
    pub command: String,
}

impl DataBase {
    pub async fn new(db_filename: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .filename(db_filename)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS block_hashes (
                block_number    INTEGER PRIMARY KEY,
                block_hash      TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commands (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                executed_at     INTEGER NOT NULL,
                command         TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_nonces (
                caller          TEXT PRIMARY KEY,
                nonce           INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        // Create status table (only one row allowed)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS status (
                id               INTEGER PRIMARY KEY CHECK (id = 0),
                last_done        INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO status (id, last_done)
            VALUES (0, 0)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Last block whose hash was submitted, zero before the first batch.
    pub async fn get_last_done(&self) -> Result<u64, Error> {
        let (last_done,): (i64,) = sqlx::query_as(
            r#"
            SELECT last_done FROM status WHERE id = 0
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(last_done.try_into()?)
    }

    pub async fn update_status(&self, last_done: u64) -> Result<(), Error> {
        let last_done: i64 = last_done.try_into()?;
        sqlx::query(
            r#"
            UPDATE status SET
                last_done = ?
            WHERE id = 0
            "#,
        )
        .bind(last_done)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores the batch and advances the watermark in one transaction.
    pub async fn record_batch(
        &self,
        entries: &[(u64, B256)],
        last_done: u64,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for (block_number, block_hash) in entries {
            let block_number: i64 = (*block_number).try_into()?;
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO block_hashes (block_number, block_hash)
                VALUES (?, ?)
                "#,
            )
            .bind(block_number)
            .bind(block_hash.to_string())
            .execute(&mut *tx)
            .await?;
        }
        let last_done: i64 = last_done.try_into()?;
        sqlx::query(
            r#"
            UPDATE status SET
                last_done = ?
            WHERE id = 0
            "#,
        )
        .bind(last_done)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Stores hashes written outside the updater, leaving the watermark alone.
    pub async fn store_block_hashes(&self, entries: &[(u64, B256)]) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for (block_number, block_hash) in entries {
            let block_number: i64 = (*block_number).try_into()?;
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO block_hashes (block_number, block_hash)
                VALUES (?, ?)
                "#,
            )
            .bind(block_number)
            .bind(block_hash.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_block_hashes(&self) -> Result<Vec<(u64, B256)>, Error> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT block_number, block_hash FROM block_hashes ORDER BY block_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(block_number, block_hash)| -> Result<(u64, B256), Error> {
                let block_hash = B256::from_str(&block_hash).map_err(|e| {
                    anyhow::anyhow!("Invalid hash stored for block {}: {}", block_number, e)
                })?;
                Ok((block_number.try_into()?, block_hash))
            })
            .collect()
    }

    pub async fn append_command(&self, executed_at: u64, command: &str) -> Result<u64, Error> {
        let executed_at: i64 = executed_at.try_into()?;
        let id = sqlx::query(
            r#"
            INSERT INTO commands (executed_at, command)
            VALUES (?, ?)
            "#,
        )
        .bind(executed_at)
        .bind(command)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id.try_into()?)
    }

    /// The command log in execution order.
    pub async fn get_commands(&self) -> Result<Vec<CommandRecord>, Error> {
        let rows = sqlx::query_as::<_, (i64, i64, String)>(
            r#"
            SELECT id, executed_at, command FROM commands ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, executed_at, command)| -> Result<CommandRecord, Error> {
                Ok(CommandRecord {
                    id: id.try_into()?,
                    executed_at: executed_at.try_into()?,
                    command,
                })
            })
            .collect()
    }

    /// Records `nonce` as the latest one used by `caller`. Returns false when
    /// it does not exceed the one already recorded.
    pub async fn consume_request_nonce(&self, caller: Address, nonce: u64) -> Result<bool, Error> {
        let nonce: i64 = nonce.try_into()?;
        let result = sqlx::query(
            r#"
            INSERT INTO request_nonces (caller, nonce)
            VALUES (?, ?)
            ON CONFLICT (caller) DO UPDATE SET
                nonce = excluded.nonce
            WHERE excluded.nonce > request_nonces.nonce
            "#,
        )
        .bind(caller.to_string())
        .bind(nonce)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_db(name: &str) -> DataBase {
        let path = std::env::temp_dir().join(format!(
            "encumbrance-{}-{}.sqlite",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        DataBase::new(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_status_starts_at_zero() {
        let db = fresh_db("status").await;
        assert_eq!(db.get_last_done().await.unwrap(), 0);
        db.update_status(41).await.unwrap();
        assert_eq!(db.get_last_done().await.unwrap(), 41);
    }

    #[tokio::test]
    async fn test_request_nonces_only_grow() {
        let db = fresh_db("nonces").await;
        let alice = Address::repeat_byte(0x0a);
        let bob = Address::repeat_byte(0x0b);

        assert!(db.consume_request_nonce(alice, 5).await.unwrap());
        assert!(!db.consume_request_nonce(alice, 5).await.unwrap());
        assert!(!db.consume_request_nonce(alice, 4).await.unwrap());
        assert!(db.consume_request_nonce(bob, 1).await.unwrap());
        assert!(db.consume_request_nonce(alice, 6).await.unwrap());
    }

    #[tokio::test]
    async fn test_command_log_keeps_order() {
        let db = fresh_db("commands").await;
        assert!(db.get_commands().await.unwrap().is_empty());
        let first = db.append_command(100, "\"finalizeAuction\"").await.unwrap();
        let second = db.append_command(90, "{}").await.unwrap();
        assert!(second > first);

        let log = db.get_commands().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].executed_at, 100);
        assert_eq!(log[0].command, "\"finalizeAuction\"");
        assert_eq!(log[1].id, second);
    }

    #[tokio::test]
    async fn test_batches_survive_reopen() {
        let path = std::env::temp_dir().join(format!(
            "encumbrance-reopen-{}.sqlite",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let filename = path.to_str().unwrap();
        {
            let db = DataBase::new(filename).await.unwrap();
            db.record_batch(&[(7, B256::repeat_byte(0x07)), (8, B256::repeat_byte(0x08))], 8)
                .await
                .unwrap();
            db.record_batch(&[(8, B256::repeat_byte(0x08))], 9)
                .await
                .unwrap();
        }
        let db = DataBase::new(filename).await.unwrap();
        assert_eq!(db.get_last_done().await.unwrap(), 9);
        assert_eq!(
            db.get_block_hashes().await.unwrap(),
            vec![(7, B256::repeat_byte(0x07)), (8, B256::repeat_byte(0x08))]
        );
    }
}
