use crate::Database;
use crate::models::{DiscussionInsert, MessageInsert, UnreadMark, parse_timestamp};
use crate::queries::query_participant;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};

use dealchat_types::models::{
    Discussion, DiscussionDetail, DiscussionSummary, Message, ReadStatus,
};

const DISCUSSION_COLUMNS: &str = "d.id, d.deal_id, d.buyer_id, d.seller_id, d.room_id, d.created_at";

impl Database {
    // -- Discussions --

    /// Discussions the user takes part in, newest first, each with the user's own status row.
    pub fn list_discussions_for_user(&self, user_id: i64) -> Result<Vec<DiscussionSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, s.has_unread
                 FROM discussions d
                 LEFT JOIN discussion_read_status s
                    ON s.discussion_id = d.id AND s.user_id = ?1
                 WHERE d.buyer_id = ?1 OR d.seller_id = ?1
                 ORDER BY d.created_at DESC, d.id DESC",
                DISCUSSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    let discussion = discussion_from_row(row)?;
                    let status = row.get::<_, Option<bool>>(6)?.map(|has_unread| ReadStatus {
                        discussion_id: discussion.id,
                        user_id,
                        has_unread,
                    });
                    Ok(DiscussionSummary { discussion, status })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_discussion(&self, id: i64) -> Result<Option<Discussion>> {
        self.with_conn(|conn| query_discussion(conn, id))
    }

    /// Discussion with both participants' profiles and every status row.
    pub fn get_discussion_detail(&self, id: i64) -> Result<Option<DiscussionDetail>> {
        self.with_conn(|conn| {
            let Some(discussion) = query_discussion(conn, id)? else {
                return Ok(None);
            };
            let buyer = query_participant(conn, discussion.buyer_id)?
                .ok_or_else(|| anyhow!("Buyer {} of discussion {} missing", discussion.buyer_id, id))?;
            let seller = query_participant(conn, discussion.seller_id)?
                .ok_or_else(|| anyhow!("Seller {} of discussion {} missing", discussion.seller_id, id))?;
            let statuses = query_statuses(conn, id)?;
            Ok(Some(DiscussionDetail { discussion, buyer, seller, statuses }))
        })
    }

    pub fn find_discussion_by_deal_and_buyer(&self, deal_id: i64, buyer_id: i64) -> Result<Option<Discussion>> {
        self.with_conn(|conn| query_discussion_by_pair(conn, deal_id, buyer_id))
    }

    /// Inserts the discussion and one "no unread" status row per participant in
    /// a single transaction. A second insert for the same (deal, buyer) pair
    /// writes nothing and returns the existing discussion.
    pub fn insert_discussion(
        &self,
        deal_id: i64,
        buyer_id: i64,
        seller_id: i64,
        room_id: &str,
    ) -> Result<DiscussionInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO discussions (deal_id, buyer_id, seller_id, room_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(deal_id, buyer_id) DO NOTHING",
                (deal_id, buyer_id, seller_id, room_id),
            )?;

            if inserted == 0 {
                let existing = query_discussion_by_pair(&tx, deal_id, buyer_id)?
                    .ok_or_else(|| anyhow!("Discussion for deal {} / buyer {} vanished", deal_id, buyer_id))?;
                return Ok(DiscussionInsert::Existing(existing));
            }

            let id = tx.last_insert_rowid();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO discussion_read_status (discussion_id, user_id, has_unread)
                     VALUES (?1, ?2, 0)",
                )?;
                stmt.execute((id, buyer_id))?;
                stmt.execute((id, seller_id))?;
            }

            let discussion = query_discussion(&tx, id)?
                .ok_or_else(|| anyhow!("Discussion {} missing after insert", id))?;
            tx.commit()?;
            Ok(DiscussionInsert::Created(discussion))
        })
    }

    // -- Read status --

    /// Sets one participant's unread flag. Returns false when no status row exists.
    pub fn set_unread(&self, discussion_id: i64, user_id: i64, has_unread: bool) -> Result<bool> {
        self.with_conn(|conn| update_status(conn, discussion_id, user_id, has_unread))
    }

    pub fn unread_count(&self, user_id: i64) -> Result<u32> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM discussion_read_status WHERE user_id = ?1 AND has_unread = 1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn read_statuses(&self, discussion_id: i64) -> Result<Vec<ReadStatus>> {
        self.with_conn(|conn| query_statuses(conn, discussion_id))
    }

    /// Flags the discussion bound to `room_id` unread for the participant that
    /// did not send the backbone message. The sender must be one of the two
    /// participants; anyone else in the room is ignored.
    pub fn mark_unread_from_room(&self, room_id: &str, sender_login: &str) -> Result<UnreadMark> {
        if room_id.is_empty() {
            return Ok(UnreadMark::UnknownRoom);
        }
        self.with_conn(|conn| {
            let Some(discussion) = query_discussion_by_room(conn, room_id)? else {
                return Ok(UnreadMark::UnknownRoom);
            };

            let sender_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE backbone_login = ?1",
                    [sender_login],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(sender_id) = sender_id else {
                return Ok(UnreadMark::UnknownSender);
            };

            let Some(recipient_id) = discussion.counterpart_of(sender_id) else {
                return Ok(UnreadMark::NotParticipant);
            };

            update_status(conn, discussion.id, recipient_id, true)?;
            Ok(UnreadMark::Marked { discussion_id: discussion.id, recipient_id })
        })
    }

    // -- Messages --

    /// Persists a message from a participant and flags the discussion unread
    /// for the other participant, atomically.
    pub fn insert_message(&self, discussion_id: i64, sender_id: i64, content: &str) -> Result<MessageInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(discussion) = query_discussion(&tx, discussion_id)? else {
                return Ok(MessageInsert::UnknownDiscussion);
            };
            let Some(recipient_id) = discussion.counterpart_of(sender_id) else {
                return Ok(MessageInsert::NotParticipant);
            };

            tx.execute(
                "INSERT INTO messages (discussion_id, sender_id, content) VALUES (?1, ?2, ?3)",
                (discussion_id, sender_id, content),
            )?;
            let id = tx.last_insert_rowid();
            let message = tx.query_row(
                "SELECT id, discussion_id, sender_id, content, created_at FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )?;

            update_status(&tx, discussion_id, recipient_id, true)?;
            tx.commit()?;

            Ok(MessageInsert::Created { message, recipient_id })
        })
    }

    /// Newest-first messages of a discussion with ids strictly below `before`
    /// (or from the newest when `before` is `None`), at most `take` rows.
    pub fn messages_before(&self, discussion_id: i64, before: Option<i64>, take: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, discussion_id, sender_id, content, created_at
                 FROM messages
                 WHERE discussion_id = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map((discussion_id, before, take), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_discussion(conn: &Connection, id: i64) -> Result<Option<Discussion>> {
    let sql = format!("SELECT {} FROM discussions d WHERE d.id = ?1", DISCUSSION_COLUMNS);
    Ok(conn.query_row(&sql, [id], discussion_from_row).optional()?)
}

fn query_discussion_by_pair(conn: &Connection, deal_id: i64, buyer_id: i64) -> Result<Option<Discussion>> {
    let sql = format!(
        "SELECT {} FROM discussions d WHERE d.deal_id = ?1 AND d.buyer_id = ?2",
        DISCUSSION_COLUMNS
    );
    Ok(conn.query_row(&sql, (deal_id, buyer_id), discussion_from_row).optional()?)
}

fn query_discussion_by_room(conn: &Connection, room_id: &str) -> Result<Option<Discussion>> {
    let sql = format!(
        "SELECT {} FROM discussions d WHERE d.room_id = ?1 ORDER BY d.id LIMIT 1",
        DISCUSSION_COLUMNS
    );
    Ok(conn.query_row(&sql, [room_id], discussion_from_row).optional()?)
}

fn query_statuses(conn: &Connection, discussion_id: i64) -> Result<Vec<ReadStatus>> {
    let mut stmt = conn.prepare(
        "SELECT discussion_id, user_id, has_unread FROM discussion_read_status
         WHERE discussion_id = ?1 ORDER BY user_id",
    )?;
    let rows = stmt
        .query_map([discussion_id], |row| {
            Ok(ReadStatus {
                discussion_id: row.get(0)?,
                user_id: row.get(1)?,
                has_unread: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn update_status(conn: &Connection, discussion_id: i64, user_id: i64, has_unread: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE discussion_read_status SET has_unread = ?3 WHERE discussion_id = ?1 AND user_id = ?2",
        (discussion_id, user_id, has_unread),
    )?;
    Ok(changed == 1)
}

fn discussion_from_row(row: &Row<'_>) -> rusqlite::Result<Discussion> {
    Ok(Discussion {
        id: row.get(0)?,
        deal_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        room_id: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        discussion_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
    })
}
