use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, deals, discussions, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                email           TEXT NOT NULL UNIQUE,
                name            TEXT NOT NULL,
                password        TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user',
                backbone_login  TEXT UNIQUE,
                backbone_secret TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE deals (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id    INTEGER NOT NULL REFERENCES users(id),
                title       TEXT,
                status      TEXT NOT NULL DEFAULT 'draft',
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE discussions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                deal_id     INTEGER NOT NULL REFERENCES deals(id),
                buyer_id    INTEGER NOT NULL REFERENCES users(id),
                seller_id   INTEGER NOT NULL REFERENCES users(id),
                room_id     TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(deal_id, buyer_id)
            );

            CREATE INDEX idx_discussions_buyer ON discussions(buyer_id);
            CREATE INDEX idx_discussions_seller ON discussions(seller_id);
            CREATE INDEX idx_discussions_room ON discussions(room_id);

            CREATE TABLE discussion_read_status (
                discussion_id   INTEGER NOT NULL REFERENCES discussions(id),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                has_unread      INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (discussion_id, user_id)
            );

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                discussion_id   INTEGER NOT NULL REFERENCES discussions(id),
                sender_id       INTEGER NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_messages_discussion ON messages(discussion_id, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
