use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppResult;

use super::{Message, MessageStore, NewMessage, Snapshot, Subscription, Timestamp};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    room_id TEXT NOT NULL,
    text TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_room_timestamp ON messages (room_id, timestamp);
"#;

/// Messages in a SQLite table, with change notifications fanned out over a
/// broadcast channel to every open subscription.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
    tx: broadcast::Sender<String>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> AppResult<SqliteStore> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is its own database.
        let db_pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(16)
                .connect_with(options)
                .await?
        };

        Self::with_pool(db_pool).await
    }

    pub async fn with_pool(db_pool: SqlitePool) -> AppResult<SqliteStore> {
        sqlx::raw_sql(SCHEMA).execute(&db_pool).await?;

        Ok(SqliteStore {
            db_pool,
            tx: broadcast::channel(256).0,
        })
    }

    async fn snapshot(db_pool: &SqlitePool, room: &str) -> AppResult<Snapshot> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT text,sender_id,timestamp FROM messages WHERE room_id=? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(room)
        .fetch_all(db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(text, sender_id, timestamp)| Message {
                text,
                sender_id,
                timestamp: Timestamp(timestamp),
            })
            .collect())
    }
}

impl MessageStore for SqliteStore {
    async fn append(&self, room: &str, NewMessage { text, sender_id }: NewMessage) -> AppResult<()> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO messages (id,room_id,text,sender_id,timestamp) values (?,?,?,?,?)")
            .bind(id.to_string())
            .bind(room)
            .bind(&text)
            .bind(&sender_id)
            .bind(Timestamp::now().0)
            .execute(&self.db_pool)
            .await?;

        let _ = self.tx.send(room.to_owned());
        Ok(())
    }

    async fn subscribe(&self, room: &str) -> AppResult<Subscription> {
        // Subscribe before the first query so no append slips in between.
        let mut rx = self.tx.subscribe();
        let db_pool = self.db_pool.clone();
        let room_id = room.to_owned();

        Ok(Subscription::spawn(room, move |tx| async move {
            loop {
                match Self::snapshot(&db_pool, &room_id).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(room = %room_id, "snapshot query failed: {:#}", err.0),
                }

                loop {
                    match rx.recv().await {
                        Ok(changed) if changed == room_id => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(room = %room_id, skipped, "change feed lagged, requerying");
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        }))
    }
}
