//! Guild repository: ticket counter and active-ticket index.

use super::DbError;
use sqlx::SqlitePool;

/// Repository for per-guild bookkeeping.
pub struct GuildRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GuildRepository<'a> {
    /// Create a new guild repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Increment the guild's counter and return the new value.
    ///
    /// A single upsert statement, so two concurrent callers never read the
    /// same value.
    pub async fn next_ticket_number(&self, guild_id: &str) -> Result<i64, DbError> {
        let next: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO guilds (guild_id, ticket_counter) VALUES (?, 1)
            ON CONFLICT(guild_id) DO UPDATE SET ticket_counter = ticket_counter + 1
            RETURNING ticket_counter
            "#,
        )
        .bind(guild_id)
        .fetch_one(self.pool)
        .await?;
        Ok(next)
    }

    /// Move the counter up to at least `value`. Never moves it down.
    pub async fn raise_counter(&self, guild_id: &str, value: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO guilds (guild_id, ticket_counter) VALUES (?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET ticket_counter = MAX(ticket_counter, excluded.ticket_counter)
            "#,
        )
        .bind(guild_id)
        .bind(value)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn ticket_counter(&self, guild_id: &str) -> Result<i64, DbError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT ticket_counter FROM guilds WHERE guild_id = ?")
            .bind(guild_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(value.unwrap_or(0))
    }

    pub async fn add_active_ticket(&self, guild_id: &str, channel_id: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO guild_active_tickets (guild_id, channel_id) VALUES (?, ?)")
            .bind(guild_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_active_ticket(&self, guild_id: &str, channel_id: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM guild_active_tickets WHERE guild_id = ? AND channel_id = ?")
            .bind(guild_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn active_tickets(&self, guild_id: &str) -> Result<Vec<String>, DbError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT channel_id FROM guild_active_tickets WHERE guild_id = ? ORDER BY channel_id")
                .bind(guild_id)
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn counter_increments_and_only_rises() {
        let db = Database::new(":memory:").await.unwrap();
        let guilds = db.guilds();
        assert_eq!(guilds.next_ticket_number("g1").await.unwrap(), 1);
        assert_eq!(guilds.next_ticket_number("g1").await.unwrap(), 2);
        assert_eq!(guilds.next_ticket_number("g2").await.unwrap(), 1);

        guilds.raise_counter("g1", 7).await.unwrap();
        guilds.raise_counter("g1", 3).await.unwrap();
        assert_eq!(guilds.ticket_counter("g1").await.unwrap(), 7);
        assert_eq!(guilds.next_ticket_number("g1").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn active_index_add_remove() {
        let db = Database::new(":memory:").await.unwrap();
        let guilds = db.guilds();
        guilds.add_active_ticket("g1", "c1").await.unwrap();
        guilds.add_active_ticket("g1", "c1").await.unwrap();
        guilds.add_active_ticket("g1", "c2").await.unwrap();
        assert_eq!(guilds.active_tickets("g1").await.unwrap(), vec!["c1", "c2"]);
        guilds.remove_active_ticket("g1", "c1").await.unwrap();
        assert_eq!(guilds.active_tickets("g1").await.unwrap(), vec!["c2"]);
    }
}
