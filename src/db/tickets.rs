//! Ticket repository.
//!
//! Tickets are keyed by their channel; `(guild_id, ticket_number)` is unique
//! and a violation surfaces as [`DbError::Conflict`].

use super::DbError;
use sqlx::SqlitePool;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketStatus {
    Open,
    Closed,
    /// Terminal.
    Archived,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }

    fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "archived" => Ok(Self::Archived),
            other => Err(DbError::Corrupt(format!("unknown ticket status {other}"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted support ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub channel_id: String,
    pub guild_id: String,
    pub owner_id: String,
    pub ticket_number: i64,
    pub status: TicketStatus,
    pub welcome_message_id: Option<String>,
    pub status_message_id: Option<String>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
    pub closed_by: Option<String>,
}

/// Fields supplied when a ticket is first stored.
#[derive(Debug, Clone)]
pub struct NewTicket<'a> {
    pub channel_id: &'a str,
    pub guild_id: &'a str,
    pub owner_id: &'a str,
    pub ticket_number: i64,
    pub welcome_message_id: Option<&'a str>,
    pub created_at: i64,
}

type TicketRow = (
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    Option<String>,
);

impl TryFrom<TicketRow> for Ticket {
    type Error = DbError;

    fn try_from(row: TicketRow) -> Result<Self, DbError> {
        Ok(Self {
            channel_id: row.0,
            guild_id: row.1,
            owner_id: row.2,
            ticket_number: row.3,
            status: TicketStatus::parse(&row.4)?,
            welcome_message_id: row.5,
            status_message_id: row.6,
            created_at: row.7,
            closed_at: row.8,
            closed_by: row.9,
        })
    }
}

const TICKET_COLUMNS: &str = "channel_id, guild_id, owner_id, ticket_number, status, \
     welcome_message_id, status_message_id, created_at, closed_at, closed_by";

/// Repository for ticket operations.
pub struct TicketRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TicketRepository<'a> {
    /// Create a new ticket repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new open ticket with its owner as first participant.
    ///
    /// Fails with [`DbError::Conflict`] if the number is taken in the guild
    /// or the owner already holds a ticket that is not archived. Both rows are written in one transaction so a lost numbering race
    /// leaves nothing behind.
    pub async fn insert(&self, new: &NewTicket<'_>) -> Result<Ticket, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tickets (channel_id, guild_id, owner_id, ticket_number, status, welcome_message_id, created_at)
            VALUES (?, ?, ?, ?, 'open', ?, ?)
            "#,
        )
        .bind(new.channel_id)
        .bind(new.guild_id)
        .bind(new.owner_id)
        .bind(new.ticket_number)
        .bind(new.welcome_message_id)
        .bind(new.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO ticket_participants (channel_id, user_id) VALUES (?, ?)")
            .bind(new.channel_id)
            .bind(new.owner_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Ticket {
            channel_id: new.channel_id.to_string(),
            guild_id: new.guild_id.to_string(),
            owner_id: new.owner_id.to_string(),
            ticket_number: new.ticket_number,
            status: TicketStatus::Open,
            welcome_message_id: new.welcome_message_id.map(String::from),
            status_message_id: None,
            created_at: new.created_at,
            closed_at: None,
            closed_by: None,
        })
    }

    pub async fn find(&self, channel_id: &str) -> Result<Option<Ticket>, DbError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE channel_id = ?"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    /// The requester's ticket that is not archived yet, if any.
    pub async fn find_open_for_owner(&self, guild_id: &str, owner_id: &str) -> Result<Option<Ticket>, DbError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE guild_id = ? AND owner_id = ? AND status != 'archived' \
             ORDER BY ticket_number DESC LIMIT 1"
        ))
        .bind(guild_id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    /// Every ticket still open or closed, across guilds.
    pub async fn find_non_archived(&self) -> Result<Vec<Ticket>, DbError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE status != 'archived' ORDER BY guild_id, ticket_number"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    /// Archived tickets waiting for their record to be purged.
    pub async fn find_archived(&self) -> Result<Vec<Ticket>, DbError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE status = 'archived'"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    /// Highest number in use in the guild, 0 if none.
    pub async fn max_number(&self, guild_id: &str) -> Result<i64, DbError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(ticket_number) FROM tickets WHERE guild_id = ?")
            .bind(guild_id)
            .fetch_one(self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    /// Move `open` to `closed`, stamping who and when. Returns false if the
    /// ticket was not open anymore.
    pub async fn mark_closed(&self, channel_id: &str, closed_by: &str, closed_at: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET status = 'closed', closed_at = ?, closed_by = ?
            WHERE channel_id = ? AND status = 'open'
            "#,
        )
        .bind(closed_at)
        .bind(closed_by)
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move `closed` back to `open`. Returns false if it was not closed.
    pub async fn mark_reopened(&self, channel_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET status = 'open', closed_at = NULL, closed_by = NULL
            WHERE channel_id = ? AND status = 'closed'
            "#,
        )
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move any non-archived ticket to `archived`. Returns false if it
    /// already was.
    pub async fn mark_archived(&self, channel_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'archived' WHERE channel_id = ? AND status != 'archived'",
        )
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_status_message(&self, channel_id: &str, message_id: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE tickets SET status_message_id = ? WHERE channel_id = ?")
            .bind(message_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Record that a user wrote in the ticket. Repeats are ignored.
    pub async fn add_participant(&self, channel_id: &str, user_id: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO ticket_participants (channel_id, user_id) VALUES (?, ?)")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn participants(&self, channel_id: &str) -> Result<Vec<String>, DbError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM ticket_participants WHERE channel_id = ? ORDER BY user_id")
                .bind(channel_id)
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    /// Delete a ticket record and its participants.
    pub async fn delete(&self, channel_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM tickets WHERE channel_id = ?")
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_ticket<'a>(channel_id: &'a str, owner: &'a str, number: i64) -> NewTicket<'a> {
        NewTicket {
            channel_id,
            guild_id: "g1",
            owner_id: owner,
            ticket_number: number,
            welcome_message_id: Some("m1"),
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn number_is_unique_per_guild() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.tickets();
        repo.insert(&new_ticket("c1", "u1", 1)).await.unwrap();

        let err = repo.insert(&new_ticket("c2", "u2", 1)).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        // The failed insert left no participant behind.
        assert!(repo.participants("c2").await.unwrap().is_empty());

        let mut other_guild = new_ticket("c3", "u3", 1);
        other_guild.guild_id = "g2";
        repo.insert(&other_guild).await.unwrap();
        assert_eq!(repo.max_number("g1").await.unwrap(), 1);
        assert_eq!(repo.max_number("nowhere").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn owner_holds_one_live_ticket_per_guild() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.tickets();
        repo.insert(&new_ticket("c1", "u1", 1)).await.unwrap();

        let err = repo.insert(&new_ticket("c2", "u1", 2)).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let mut other_guild = new_ticket("c3", "u1", 1);
        other_guild.guild_id = "g2";
        repo.insert(&other_guild).await.unwrap();

        assert!(repo.mark_archived("c1").await.unwrap());
        repo.insert(&new_ticket("c2", "u1", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn status_moves_forward_only_through_guards() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.tickets();
        repo.insert(&new_ticket("c1", "u1", 1)).await.unwrap();

        assert!(!repo.mark_reopened("c1").await.unwrap());
        assert!(repo.mark_closed("c1", "admin", 10).await.unwrap());
        assert!(!repo.mark_closed("c1", "admin", 11).await.unwrap());

        let t = repo.find("c1").await.unwrap().unwrap();
        assert_eq!(t.status, TicketStatus::Closed);
        assert_eq!(t.closed_at, Some(10));
        assert_eq!(t.closed_by.as_deref(), Some("admin"));

        assert!(repo.mark_archived("c1").await.unwrap());
        assert!(!repo.mark_archived("c1").await.unwrap());
        assert!(!repo.mark_reopened("c1").await.unwrap());
        assert!(repo.find_open_for_owner("g1", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn participants_are_a_set_and_cascade() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.tickets();
        repo.insert(&new_ticket("c1", "u1", 1)).await.unwrap();
        repo.add_participant("c1", "u2").await.unwrap();
        repo.add_participant("c1", "u2").await.unwrap();
        assert_eq!(repo.participants("c1").await.unwrap(), vec!["u1", "u2"]);

        assert!(repo.delete("c1").await.unwrap());
        assert!(repo.participants("c1").await.unwrap().is_empty());
    }
}
