use std::sync::Mutex;

use chrono::Utc;
use loom_core::{ConversationId, ConversationStatus, LoomError, Message, MessageId, Result, Role, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::instrument;

use crate::db;
use crate::types::{Conversation, ConversationFilters, ConversationPatch, NewConversation, Paging, SortKey};

/// Owns conversations and messages. All operations serialize through a
/// single `Mutex<Connection>`, one connection owned per manager instance.
pub struct ConversationStore {
    conn: Mutex<Connection>,
    max_message_chars: usize,
    max_sequence_retries: u32,
}

impl ConversationStore {
    pub fn new(conn: Connection, max_message_chars: usize, max_sequence_retries: u32) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_message_chars,
            max_sequence_retries: max_sequence_retries.max(3),
        })
    }

    #[instrument(skip(self, data), fields(user = %user.as_str()))]
    pub fn create_conversation(&self, user: &UserId, data: NewConversation) -> Result<Conversation> {
        if data.title.trim().is_empty() {
            return Err(LoomError::Validation("title must not be empty".into()));
        }
        if let Some(t) = data.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(LoomError::Validation("temperature must be in [0.0, 2.0]".into()));
            }
        }
        if let Some(m) = data.max_tokens {
            if m < 1 || m > 32_000 {
                return Err(LoomError::Validation("max_tokens must be in [1, 32000]".into()));
            }
        }

        let id = ConversationId::new();
        let now = Utc::now();
        let metadata = data.metadata.unwrap_or_else(|| Value::Object(Default::default()));
        let workflow_config = data.workflow_config.as_ref().map(|v| v.to_string());

        let conn = self.conn.lock().expect("conversation store poisoned");
        conn.execute(
            "INSERT INTO conversations
                (id, user_id, title, status, system_prompt, profile_id, temperature,
                 max_tokens, workflow_config, metadata, message_count, total_tokens,
                 total_cost, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, 0, ?10, ?10)",
            params![
                id.as_str(),
                user.as_str(),
                data.title,
                data.system_prompt,
                data.profile_id,
                data.temperature,
                data.max_tokens,
                workflow_config,
                metadata.to_string(),
                now.to_rfc3339(),
            ],
        )?;

        drop(conn);

        Ok(Conversation {
            id,
            user_id: user.clone(),
            title: data.title,
            status: ConversationStatus::Active,
            system_prompt: data.system_prompt,
            profile_id: data.profile_id,
            temperature: data.temperature,
            max_tokens: data.max_tokens,
            workflow_config: data.workflow_config,
            metadata,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    #[instrument(skip(self), fields(user = %user.as_str()))]
    pub fn get_conversation(
        &self,
        id: &ConversationId,
        user: &UserId,
        include_messages: bool,
    ) -> Result<(Conversation, Vec<Message>)> {
        let conn = self.conn.lock().expect("conversation store poisoned");
        let conversation = fetch_conversation(&conn, id)?
            .ok_or_else(|| LoomError::NotFound(format!("conversation {id} not found")))?;

        if conversation.user_id.as_str() != user.as_str() {
            return Err(LoomError::Authorization("conversation owned by another user".into()));
        }

        let messages = if include_messages {
            fetch_messages(&conn, id)?
        } else {
            Vec::new()
        };

        Ok((conversation, messages))
    }

    #[instrument(skip(self, filters), fields(user = %user.as_str()))]
    pub fn list_conversations(
        &self,
        user: &UserId,
        filters: &ConversationFilters,
        paging: Paging,
        sort: &str,
    ) -> Result<(Vec<Conversation>, u64)> {
        let paging = paging.clamped();
        let sort_key = SortKey::from_str_or_default(sort);

        let conn = self.conn.lock().expect("conversation store poisoned");

        let mut where_clauses = vec!["user_id = ?1".to_string()];
        let mut bind_status: Option<String> = None;
        if let Some(status) = filters.status {
            bind_status = Some(status.to_string());
            where_clauses.push(format!("status = ?{}", 2));
        }
        let where_sql = where_clauses.join(" AND ");

        let total: u64 = if let Some(status) = &bind_status {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM conversations WHERE {where_sql}"),
                params![user.as_str(), status],
                |row| row.get::<_, i64>(0),
            )? as u64
        } else {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM conversations WHERE {where_sql}"),
                params![user.as_str()],
                |row| row.get::<_, i64>(0),
            )? as u64
        };

        let sql = format!(
            "SELECT id, user_id, title, status, system_prompt, profile_id, temperature,
                    max_tokens, workflow_config, metadata, message_count, total_tokens,
                    total_cost, created_at, updated_at
             FROM conversations WHERE {where_sql}
             ORDER BY {} DESC LIMIT ?{} OFFSET ?{}",
            sort_key.column(),
            if bind_status.is_some() { 3 } else { 2 },
            if bind_status.is_some() { 4 } else { 3 },
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(status) = &bind_status {
            stmt.query_map(
                params![user.as_str(), status, paging.limit, paging.offset],
                row_to_conversation,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(
                params![user.as_str(), paging.limit, paging.offset],
                row_to_conversation,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        // Filters beyond status (provider/model/tags/retrieval_enabled)
        // live in workflow_config/metadata rather than dedicated columns;
        // applied in-memory on the already-paged page, matching the
        // narrow scope of the in-core filter set.
        let filtered = rows
            .into_iter()
            .filter(|c| filters.provider.as_deref().map_or(true, |p| metadata_str_eq(&c.metadata, "provider", p)))
            .filter(|c| filters.model.as_deref().map_or(true, |m| metadata_str_eq(&c.metadata, "model", m)))
            .collect();

        Ok((filtered, total))
    }

    #[instrument(skip(self, patch), fields(user = %user.as_str()))]
    pub fn update_conversation(
        &self,
        id: &ConversationId,
        user: &UserId,
        patch: ConversationPatch,
    ) -> Result<Conversation> {
        let conn = self.conn.lock().expect("conversation store poisoned");
        let existing = fetch_conversation(&conn, id)?
            .ok_or_else(|| LoomError::NotFound(format!("conversation {id} not found")))?;
        if existing.user_id.as_str() != user.as_str() {
            return Err(LoomError::Authorization("conversation owned by another user".into()));
        }
        if let Some(t) = patch.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(LoomError::Validation("temperature must be in [0.0, 2.0]".into()));
            }
        }
        if let Some(m) = patch.max_tokens {
            if m < 1 || m > 32_000 {
                return Err(LoomError::Validation("max_tokens must be in [1, 32000]".into()));
            }
        }

        let mut merged_metadata = match patch.metadata {
            Some(incoming) => merge_json(&existing.metadata, &incoming),
            None => existing.metadata.clone(),
        };
        // `description` has no dedicated column; it rides along in metadata
        // like any other free-form patchable field.
        if let Some(description) = patch.description {
            merged_metadata = merge_json(
                &merged_metadata,
                &serde_json::json!({ "description": description }),
            );
        }

        let title = patch.title.unwrap_or(existing.title.clone());
        let status = patch.status.unwrap_or(existing.status);
        let temperature = patch.temperature.or(existing.temperature);
        let max_tokens = patch.max_tokens.or(existing.max_tokens);
        let workflow_config = patch
            .workflow_config
            .or_else(|| existing.workflow_config.clone());
        let now = Utc::now();

        conn.execute(
            "UPDATE conversations SET title = ?1, status = ?2, temperature = ?3,
                max_tokens = ?4, workflow_config = ?5, metadata = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                title,
                status.to_string(),
                temperature,
                max_tokens,
                workflow_config.as_ref().map(|v| v.to_string()),
                merged_metadata.to_string(),
                now.to_rfc3339(),
                id.as_str(),
            ],
        )?;

        fetch_conversation(&conn, id)?
            .ok_or_else(|| LoomError::Internal("conversation vanished after update".into()))
    }

    #[instrument(skip(self), fields(user = %user.as_str()))]
    pub fn delete_conversation(&self, id: &ConversationId, user: &UserId) -> Result<()> {
        let conn = self.conn.lock().expect("conversation store poisoned");
        let existing = fetch_conversation(&conn, id)?
            .ok_or_else(|| LoomError::NotFound(format!("conversation {id} not found")))?;
        if existing.user_id.as_str() != user.as_str() {
            return Err(LoomError::Authorization("conversation owned by another user".into()));
        }
        conn.execute(
            "UPDATE conversations SET status = 'deleted', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.as_str()],
        )?;
        Ok(())
    }

    /// Appends a message, atomically allocating the next sequence number.
    /// Retries on a unique-constraint race up to `max_sequence_retries`.
    #[instrument(skip(self, content, usage))]
    pub fn add_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
        usage: Option<loom_core::Usage>,
        error: bool,
    ) -> Result<Message> {
        if content.is_empty() {
            return Err(LoomError::Validation("message must not be empty".into()));
        }
        if content.chars().count() > self.max_message_chars {
            return Err(LoomError::Validation(format!(
                "message exceeds {} characters",
                self.max_message_chars
            )));
        }

        let conn = self.conn.lock().expect("conversation store poisoned");
        let mut attempt = 0;
        loop {
            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE conversation_id = ?1",
                params![conversation_id.as_str()],
                |row| row.get(0),
            )?;

            let id = MessageId::new();
            let now = Utc::now();
            let insert = conn.execute(
                "INSERT INTO messages
                    (id, conversation_id, sequence_number, role, content, provider, model,
                     prompt_tokens, completion_tokens, cost_usd, response_time_ms,
                     rating, rating_count, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, ?7, ?8, ?9, NULL, 0, ?10, ?11)",
                params![
                    id.as_str(),
                    conversation_id.as_str(),
                    next_seq,
                    role.to_string(),
                    content,
                    usage.map(|u| u.prompt_tokens),
                    usage.map(|u| u.completion_tokens),
                    usage.map(|u| u.cost_usd),
                    usage.map(|u| u.response_time_ms as i64),
                    error,
                    now.to_rfc3339(),
                ],
            );

            match insert {
                Ok(_) => {
                    conn.execute(
                        "UPDATE conversations SET message_count = message_count + 1,
                            total_tokens = total_tokens + ?1, total_cost = total_cost + ?2,
                            updated_at = ?3
                         WHERE id = ?4",
                        params![
                            usage.map(|u| u.total_tokens() as i64).unwrap_or(0),
                            usage.map(|u| u.cost_usd).unwrap_or(0.0),
                            now.to_rfc3339(),
                            conversation_id.as_str(),
                        ],
                    )?;

                    return Ok(Message {
                        id,
                        conversation_id: conversation_id.clone(),
                        role,
                        content: content.to_string(),
                        sequence_number: next_seq,
                        provider: None,
                        model: None,
                        usage,
                        rating: None,
                        rating_count: 0,
                        error,
                        created_at: now,
                    });
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation
                        && attempt < self.max_sequence_retries =>
                {
                    attempt += 1;
                    continue;
                }
                Err(rusqlite::Error::SqliteFailure(e, msg))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(LoomError::Conflict(format!(
                        "sequence number allocation exhausted retries: {:?}",
                        msg
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self), fields(user = %user.as_str()))]
    pub fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        user: &UserId,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("conversation store poisoned");
        let existing = fetch_conversation(&conn, conversation_id)?
            .ok_or_else(|| LoomError::NotFound(format!("conversation {conversation_id} not found")))?;
        if existing.user_id.as_str() != user.as_str() {
            return Err(LoomError::Authorization("conversation owned by another user".into()));
        }

        let affected = conn.execute(
            "DELETE FROM messages WHERE id = ?1 AND conversation_id = ?2",
            params![message_id.as_str(), conversation_id.as_str()],
        )?;
        if affected == 0 {
            return Err(LoomError::NotFound(format!("message {message_id} not found")));
        }
        conn.execute(
            "UPDATE conversations SET message_count = message_count - 1 WHERE id = ?1",
            params![conversation_id.as_str()],
        )?;
        Ok(())
    }

    #[instrument(skip(self, message_ids), fields(user = %user.as_str()))]
    pub fn bulk_delete_messages(
        &self,
        conversation_id: &ConversationId,
        user: &UserId,
        message_ids: &[MessageId],
    ) -> Result<u64> {
        let conn = self.conn.lock().expect("conversation store poisoned");
        let existing = fetch_conversation(&conn, conversation_id)?
            .ok_or_else(|| LoomError::NotFound(format!("conversation {conversation_id} not found")))?;
        if existing.user_id.as_str() != user.as_str() {
            return Err(LoomError::Authorization("conversation owned by another user".into()));
        }

        let mut deleted: u64 = 0;
        for message_id in message_ids {
            let affected = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND conversation_id = ?2",
                params![message_id.as_str(), conversation_id.as_str()],
            )?;
            deleted += affected as u64;
        }
        if deleted > 0 {
            conn.execute(
                "UPDATE conversations SET message_count = message_count - ?1 WHERE id = ?2",
                params![deleted as i64, conversation_id.as_str()],
            )?;
        }
        Ok(deleted)
    }

    /// Running-mean rating update in a single statement to avoid a
    /// read-modify-write race.
    #[instrument(skip(self))]
    pub fn update_message_rating(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        rating: f64,
    ) -> Result<()> {
        if !(0.0..=5.0).contains(&rating) {
            return Err(LoomError::Validation("rating must be in [0, 5]".into()));
        }
        let conn = self.conn.lock().expect("conversation store poisoned");
        let affected = conn.execute(
            "UPDATE messages SET
                rating = (COALESCE(rating, 0) * rating_count + ?1) / (rating_count + 1),
                rating_count = rating_count + 1
             WHERE id = ?2 AND conversation_id = ?3",
            params![rating, message_id.as_str(), conversation_id.as_str()],
        )?;
        if affected == 0 {
            return Err(LoomError::NotFound(format!("message {message_id} not found")));
        }
        Ok(())
    }
}

fn metadata_str_eq(metadata: &Value, key: &str, expected: &str) -> bool {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn merge_json(base: &Value, incoming: &Value) -> Value {
    match (base, incoming) {
        (Value::Object(b), Value::Object(i)) => {
            let mut merged = b.clone();
            for (k, v) in i {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn fetch_conversation(conn: &Connection, id: &ConversationId) -> Result<Option<Conversation>> {
    conn.query_row(
        "SELECT id, user_id, title, status, system_prompt, profile_id, temperature,
                max_tokens, workflow_config, metadata, message_count, total_tokens,
                total_cost, created_at, updated_at
         FROM conversations WHERE id = ?1",
        params![id.as_str()],
        row_to_conversation,
    )
    .optional()
    .map_err(LoomError::from)
}

fn fetch_messages(conn: &Connection, id: &ConversationId) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sequence_number, role, content, provider, model,
                prompt_tokens, completion_tokens, cost_usd, response_time_ms,
                rating, rating_count, error, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY sequence_number ASC",
    )?;
    let rows = stmt
        .query_map(params![id.as_str()], row_to_message)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(3)?;
    let workflow_config: Option<String> = row.get(8)?;
    let metadata: String = row.get(9)?;
    Ok(Conversation {
        id: row.get::<_, String>(0)?.into(),
        user_id: row.get::<_, String>(1)?.into(),
        title: row.get(2)?,
        status: status_str.parse().unwrap_or(ConversationStatus::Active),
        system_prompt: row.get(4)?,
        profile_id: row.get(5)?,
        temperature: row.get(6)?,
        max_tokens: row.get(7)?,
        workflow_config: workflow_config.and_then(|s| serde_json::from_str(&s).ok()),
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Object(Default::default())),
        message_count: row.get(10)?,
        total_tokens: row.get(11)?,
        total_cost: row.get(12)?,
        created_at: parse_timestamp(row.get::<_, String>(13)?),
        updated_at: parse_timestamp(row.get::<_, String>(14)?),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let error_flag: i64 = row.get(13)?;
    Ok(Message {
        id: row.get::<_, String>(0)?.into(),
        conversation_id: row.get::<_, String>(1)?.into(),
        sequence_number: row.get(2)?,
        role: parse_role(&role_str),
        content: row.get(4)?,
        provider: row.get(5)?,
        model: row.get(6)?,
        usage: build_usage(row)?,
        rating: row.get(11)?,
        rating_count: row.get(12)?,
        error: error_flag != 0,
        created_at: parse_timestamp(row.get::<_, String>(14)?),
    })
}

fn build_usage(row: &rusqlite::Row) -> rusqlite::Result<Option<loom_core::Usage>> {
    let prompt_tokens: Option<u32> = row.get(7)?;
    let completion_tokens: Option<u32> = row.get(8)?;
    let cost_usd: Option<f64> = row.get(9)?;
    let response_time_ms: Option<i64> = row.get(10)?;
    if prompt_tokens.is_none() && completion_tokens.is_none() && cost_usd.is_none() {
        return Ok(None);
    }
    Ok(Some(loom_core::Usage {
        prompt_tokens: prompt_tokens.unwrap_or(0),
        completion_tokens: completion_tokens.unwrap_or(0),
        cost_usd: cost_usd.unwrap_or(0.0),
        response_time_ms: response_time_ms.unwrap_or(0) as u64,
    }))
}

fn parse_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn parse_timestamp(s: String) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| Utc::now())
}
