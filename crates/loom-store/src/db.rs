use rusqlite::{Connection, Result};

/// Initialise conversation/message tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            system_prompt   TEXT,
            profile_id      TEXT,
            temperature     REAL,
            max_tokens      INTEGER,
            workflow_config TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            message_count   INTEGER NOT NULL DEFAULT 0,
            total_tokens    INTEGER NOT NULL DEFAULT 0,
            total_cost      REAL NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, updated_at DESC);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            sequence_number  INTEGER NOT NULL,
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            provider         TEXT,
            model            TEXT,
            prompt_tokens    INTEGER,
            completion_tokens INTEGER,
            cost_usd         REAL,
            response_time_ms INTEGER,
            rating           REAL,
            rating_count     INTEGER NOT NULL DEFAULT 0,
            error            INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            UNIQUE(conversation_id, sequence_number)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sequence_number ASC);",
    )
}
