//! Voice room repository.
//!
//! One row per live temporary voice room created by the daemon.

use super::DbError;
use sqlx::SqlitePool;

/// Which lobby template a room was spawned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// Nested right below the first lobby, carries the companion notice.
    First = 1,
    /// Plain room under the second lobby's category.
    Second = 2,
}

impl RoomKind {
    fn from_i64(value: i64) -> Result<Self, DbError> {
        match value {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            other => Err(DbError::Corrupt(format!("unknown room kind {other}"))),
        }
    }
}

/// A persisted temporary voice room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRoom {
    pub channel_id: String,
    pub guild_id: String,
    pub owner_id: String,
    pub kind: RoomKind,
    pub created_at: i64,
    /// Unix seconds at which the owner was last seen leaving. Only set while
    /// the owner is away and somebody else is still inside.
    pub owner_left_at: Option<i64>,
    /// Activity the room is currently named after.
    pub activity_label: Option<String>,
}

type VoiceRoomRow = (String, String, String, i64, i64, Option<i64>, Option<String>);

impl TryFrom<VoiceRoomRow> for VoiceRoom {
    type Error = DbError;

    fn try_from(row: VoiceRoomRow) -> Result<Self, DbError> {
        let (channel_id, guild_id, owner_id, kind, created_at, owner_left_at, activity_label) = row;
        Ok(Self {
            channel_id,
            guild_id,
            owner_id,
            kind: RoomKind::from_i64(kind)?,
            created_at,
            owner_left_at,
            activity_label,
        })
    }
}

/// Repository for voice room operations.
pub struct VoiceRoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VoiceRoomRepository<'a> {
    /// Create a new voice room repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a freshly created room. Fails with `Conflict` if the channel is
    /// already tracked.
    pub async fn insert(&self, room: &VoiceRoom) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO voice_rooms (channel_id, guild_id, owner_id, kind, created_at, owner_left_at, activity_label)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&room.channel_id)
        .bind(&room.guild_id)
        .bind(&room.owner_id)
        .bind(room.kind as i64)
        .bind(room.created_at)
        .bind(room.owner_left_at)
        .bind(&room.activity_label)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, channel_id: &str) -> Result<Option<VoiceRoom>, DbError> {
        let row = sqlx::query_as::<_, VoiceRoomRow>(
            r#"
            SELECT channel_id, guild_id, owner_id, kind, created_at, owner_left_at, activity_label
            FROM voice_rooms
            WHERE channel_id = ?
            "#,
        )
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(VoiceRoom::try_from).transpose()
    }

    pub async fn find_all(&self) -> Result<Vec<VoiceRoom>, DbError> {
        let rows = sqlx::query_as::<_, VoiceRoomRow>(
            r#"
            SELECT channel_id, guild_id, owner_id, kind, created_at, owner_left_at, activity_label
            FROM voice_rooms
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(VoiceRoom::try_from).collect()
    }

    /// Rooms currently owned by a member, used for presence-driven renames.
    pub async fn find_by_owner(&self, guild_id: &str, owner_id: &str) -> Result<Vec<VoiceRoom>, DbError> {
        let rows = sqlx::query_as::<_, VoiceRoomRow>(
            r#"
            SELECT channel_id, guild_id, owner_id, kind, created_at, owner_left_at, activity_label
            FROM voice_rooms
            WHERE guild_id = ? AND owner_id = ?
            "#,
        )
        .bind(guild_id)
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(VoiceRoom::try_from).collect()
    }

    /// Update the label the room is named after, guarded on the owner it was
    /// derived from. Returns false if the room is gone or changed hands.
    pub async fn set_activity_label(
        &self,
        channel_id: &str,
        owner_id: &str,
        label: Option<&str>,
    ) -> Result<bool, DbError> {
        let result =
            sqlx::query("UPDATE voice_rooms SET activity_label = ? WHERE channel_id = ? AND owner_id = ?")
                .bind(label)
                .bind(channel_id)
                .bind(owner_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the owner absence timestamp.
    pub async fn set_owner_left_at(&self, channel_id: &str, left_at: Option<i64>) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE voice_rooms SET owner_left_at = ? WHERE channel_id = ?")
            .bind(left_at)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hand the room to a new owner, guarded on the previous owner so a
    /// concurrent takeover cannot be overwritten. Clears the absence clock.
    pub async fn transfer_owner(
        &self,
        channel_id: &str,
        previous_owner: &str,
        new_owner: &str,
        label: Option<&str>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE voice_rooms
            SET owner_id = ?, owner_left_at = NULL, activity_label = ?
            WHERE channel_id = ? AND owner_id = ?
            "#,
        )
        .bind(new_owner)
        .bind(label)
        .bind(channel_id)
        .bind(previous_owner)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a room record. Returns false if it was already gone.
    pub async fn delete(&self, channel_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM voice_rooms WHERE channel_id = ?")
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

    fn room(channel_id: &str, owner: &str) -> VoiceRoom {
        VoiceRoom {
            channel_id: channel_id.to_string(),
            guild_id: "g1".to_string(),
            owner_id: owner.to_string(),
            kind: RoomKind::First,
            created_at: 1_700_000_000,
            owner_left_at: None,
            activity_label: None,
        }
    }

    #[tokio::test]
    async fn insert_find_delete() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.voice_rooms();
        repo.insert(&room("c1", "u1")).await.unwrap();

        assert_eq!(repo.find("c1").await.unwrap(), Some(room("c1", "u1")));
        assert_eq!(repo.find_by_owner("g1", "u1").await.unwrap().len(), 1);
        assert!(repo.delete("c1").await.unwrap());
        assert!(!repo.delete("c1").await.unwrap());
        assert!(repo.find("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_channel_is_conflict() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.voice_rooms();
        repo.insert(&room("c1", "u1")).await.unwrap();
        let err = repo.insert(&room("c1", "u2")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn transfer_is_guarded_on_previous_owner() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.voice_rooms();
        repo.insert(&room("c1", "u1")).await.unwrap();
        repo.set_owner_left_at("c1", Some(42)).await.unwrap();

        assert!(!repo.transfer_owner("c1", "someone-else", "u2", None).await.unwrap());
        assert!(repo.transfer_owner("c1", "u1", "u2", Some("Chess")).await.unwrap());

        let stored = repo.find("c1").await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "u2");
        assert_eq!(stored.owner_left_at, None);
        assert_eq!(stored.activity_label.as_deref(), Some("Chess"));
    }

    #[tokio::test]
    async fn label_update_is_guarded_on_owner() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.voice_rooms();
        repo.insert(&room("c1", "u2")).await.unwrap();

        assert!(!repo.set_activity_label("c1", "u1", Some("Chess")).await.unwrap());
        assert!(repo.set_activity_label("c1", "u2", Some("Go")).await.unwrap());
        assert_eq!(repo.find("c1").await.unwrap().unwrap().activity_label.as_deref(), Some("Go"));
    }
}
