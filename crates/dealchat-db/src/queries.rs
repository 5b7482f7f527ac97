use crate::Database;
use crate::models::{DealRow, UserRow, parse_role, parse_timestamp};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

use dealchat_types::models::{Participant, Role};

const USER_COLUMNS: &str =
    "id, email, name, password, role, backbone_login, backbone_secret, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, email: &str, name: &str, password_hash: &str, role: Role) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, name, password, role) VALUES (?1, ?2, ?3, ?4)",
                (email, name, password_hash, role.as_str()),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, [email], user_from_row).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Stores a backbone identity unless the user already has one.
    /// Returns false when an identity was already present.
    pub fn set_backbone_identity(&self, user_id: i64, login: &str, secret: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET backbone_login = ?2, backbone_secret = ?3
                 WHERE id = ?1 AND backbone_login IS NULL",
                (user_id, login, secret),
            )?;
            Ok(changed == 1)
        })
    }

    // -- Deals --

    pub fn create_deal(&self, owner_id: i64, title: Option<&str>, status: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO deals (owner_id, title, status) VALUES (?1, ?2, ?3)",
                (owner_id, title, status),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_deal(&self, id: i64) -> Result<Option<DealRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, title, status, created_at FROM deals WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(DealRow {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            title: row.get(2)?,
                            status: row.get(3)?,
                            created_at: parse_timestamp(&row.get::<_, String>(4)?),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

pub(crate) fn query_participant(conn: &Connection, user_id: i64) -> Result<Option<Participant>> {
    let row = conn
        .query_row(
            "SELECT id, name, backbone_login FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(Participant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    backbone_login: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password: row.get(3)?,
        role: parse_role(&row.get::<_, String>(4)?),
        backbone_login: row.get(5)?,
        backbone_secret: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
    })
}
