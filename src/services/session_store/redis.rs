//! Redis-backed session store.
//!
//! Layout per session:
//! - `{prefix}:session:{id}` — hash of the scalar fields
//! - `{prefix}:blocks:{id}`  — list of staged block ids, arrival order
//! - `{prefix}:created`      — sorted set of ids scored by creation epoch,
//!   used by the retention sweep
//!
//! The read-modify-write mutations (`append_block_id`, `mark_completed`)
//! run as Lua scripts, which Redis executes atomically. That closes the
//! lost-update race between concurrent chunk uploads of one session without
//! any client-side locking.

use super::{SessionStore, StoreError, StoreResult};
use crate::models::session::UploadSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

const APPEND_BLOCK_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local ids = redis.call('LRANGE', KEYS[2], 0, -1)
for _, b in ipairs(ids) do
  if b == ARGV[1] then
    return 1
  end
end
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

const MARK_COMPLETED_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'completed', '1')
return 1
"#;

pub struct RedisSessionStore {
    conn: Mutex<MultiplexedConnection>,
    prefix: String,
    append_script: Script,
    complete_script: Script,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            conn: Mutex::new(conn),
            prefix: "upload".to_string(),
            append_script: Script::new(APPEND_BLOCK_SCRIPT),
            complete_script: Script::new(MARK_COMPLETED_SCRIPT),
        })
    }

    fn session_key(&self, upload_id: Uuid) -> String {
        format!("{}:session:{}", self.prefix, upload_id)
    }

    fn blocks_key(&self, upload_id: Uuid) -> String {
        format!("{}:blocks:{}", self.prefix, upload_id)
    }

    fn created_index_key(&self) -> String {
        format!("{}:created", self.prefix)
    }

    fn decode(
        upload_id: Uuid,
        fields: HashMap<String, String>,
        block_ids: Vec<String>,
    ) -> StoreResult<UploadSession> {
        // Rebuild the session record through serde so field handling stays
        // in one place.
        let value = serde_json::json!({
            "upload_id": upload_id,
            "filename": fields.get("filename").cloned().unwrap_or_default(),
            "total_size": fields
                .get("total_size")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
            "chunk_size": fields
                .get("chunk_size")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
            "staged_block_ids": block_ids,
            "completed": fields.get("completed").map(|v| v == "1").unwrap_or(false),
            "created_at": fields.get("created_at").cloned().unwrap_or_default(),
        });
        serde_json::from_value(value).map_err(|err| StoreError::Corrupt(upload_id, err))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &UploadSession) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let fields = [
            ("filename", session.filename.clone()),
            ("total_size", session.total_size.to_string()),
            ("chunk_size", session.chunk_size.to_string()),
            (
                "completed",
                (if session.completed { "1" } else { "0" }).to_string(),
            ),
            ("created_at", session.created_at.to_rfc3339()),
        ];
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(self.session_key(session.upload_id), &fields)
            .zadd(
                self.created_index_key(),
                session.upload_id.to_string(),
                session.created_at.timestamp(),
            );
        if !session.staged_block_ids.is_empty() {
            pipe.rpush(
                self.blocks_key(session.upload_id),
                &session.staged_block_ids,
            );
        }
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> StoreResult<Option<UploadSession>> {
        let mut conn = self.conn.lock().await;
        let (fields, block_ids): (HashMap<String, String>, Vec<String>) = redis::pipe()
            .atomic()
            .hgetall(self.session_key(upload_id))
            .lrange(self.blocks_key(upload_id), 0, -1)
            .query_async(&mut *conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::decode(upload_id, fields, block_ids).map(Some)
    }

    async fn delete(&self, upload_id: Uuid) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let _: () = redis::pipe()
            .atomic()
            .del(self.session_key(upload_id))
            .del(self.blocks_key(upload_id))
            .zrem(self.created_index_key(), upload_id.to_string())
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn append_block_id(
        &self,
        upload_id: Uuid,
        block_id: &str,
    ) -> StoreResult<Option<UploadSession>> {
        {
            let mut conn = self.conn.lock().await;
            let found: i64 = self
                .append_script
                .key(self.session_key(upload_id))
                .key(self.blocks_key(upload_id))
                .arg(block_id)
                .invoke_async(&mut *conn)
                .await?;
            if found == 0 {
                return Ok(None);
            }
        }
        // The session may have been deleted between the script and this
        // read; callers treat that the same as an absent session.
        self.get(upload_id).await
    }

    async fn mark_completed(&self, upload_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn.lock().await;
        let found: i64 = self
            .complete_script
            .key(self.session_key(upload_id))
            .invoke_async(&mut *conn)
            .await?;
        Ok(found == 1)
    }

    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let expired: Vec<String> = {
            let mut conn = self.conn.lock().await;
            conn.zrangebyscore(self.created_index_key(), "-inf", cutoff.timestamp())
                .await?
        };
        let mut removed = 0;
        for raw in expired {
            if let Ok(id) = raw.parse::<Uuid>() {
                self.delete(id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
