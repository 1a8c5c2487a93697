//! PostgreSQL implementation of [`ExpeditionStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::ExpeditionStore;
use super::models::{ExpeditionMemberRow, NewExpedition};
use crate::domain::{CharacterId, ExpeditionId, Leader, LockoutTimer, Member};
use crate::error::ExpeditionError;

const LOAD_EXPEDITIONS_SELECT: &str = "SELECT e.id, e.uuid, e.instance_id, e.zone_id, e.expedition_name, \
     e.leader_id, e.leader_name, e.min_players, e.max_players, e.add_replay_on_join, e.is_locked, \
     m.character_id, m.character_name, m.is_current_member \
     FROM expeditions e \
     INNER JOIN expedition_members m ON m.expedition_id = e.id";

/// Upsert action for a member row. Rejoining moves a former member to the
/// end of the join order; a current member keeps its place.
const MEMBER_REJOIN: &str = "is_current_member = TRUE, joined_seq = CASE WHEN expedition_members.is_current_member \
     THEN expedition_members.joined_seq ELSE EXCLUDED.joined_seq END";

type MemberRowTuple = (
    i64,
    String,
    i64,
    i64,
    String,
    i64,
    String,
    i64,
    i64,
    bool,
    bool,
    i64,
    String,
    bool,
);

/// PostgreSQL-backed expedition storage using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresExpeditionStore {
    pool: PgPool,
}

impl PostgresExpeditionStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(e: sqlx::Error) -> ExpeditionError {
    ExpeditionError::Storage(e.to_string())
}

fn column_u32(value: i64, column: &str) -> Result<u32, ExpeditionError> {
    u32::try_from(value)
        .map_err(|_| ExpeditionError::Storage(format!("{column} out of range: {value}")))
}

fn raw_character_ids(ids: &[CharacterId]) -> Vec<i64> {
    ids.iter().map(|id| i64::from(id.get())).collect()
}

fn member_row(row: MemberRowTuple) -> Result<ExpeditionMemberRow, ExpeditionError> {
    let (
        expedition_id,
        uuid,
        instance_id,
        zone_id,
        expedition_name,
        leader_id,
        leader_name,
        min_players,
        max_players,
        add_replay_on_join,
        is_locked,
        character_id,
        character_name,
        is_current_member,
    ) = row;

    Ok(ExpeditionMemberRow {
        expedition_id: ExpeditionId::new(column_u32(expedition_id, "id")?),
        uuid,
        instance_id: column_u32(instance_id, "instance_id")?,
        zone_id: column_u32(zone_id, "zone_id")?,
        expedition_name,
        leader_id: CharacterId::new(column_u32(leader_id, "leader_id")?),
        leader_name,
        min_players: column_u32(min_players, "min_players")?,
        max_players: column_u32(max_players, "max_players")?,
        add_replay_on_join,
        is_locked,
        character_id: CharacterId::new(column_u32(character_id, "character_id")?),
        character_name,
        is_current_member,
    })
}

#[async_trait]
impl ExpeditionStore for PostgresExpeditionStore {
    async fn insert_expedition(&self, expedition: &NewExpedition) -> Result<ExpeditionId, ExpeditionError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO expeditions \
             (uuid, instance_id, zone_id, expedition_name, leader_id, leader_name, min_players, max_players) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
        )
        .bind(&expedition.uuid)
        .bind(i64::from(expedition.instance_id))
        .bind(i64::from(expedition.zone_id))
        .bind(&expedition.name)
        .bind(i64::from(expedition.leader.id.get()))
        .bind(&expedition.leader.name)
        .bind(i64::from(expedition.min_players))
        .bind(i64::from(expedition.max_players))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(ExpeditionId::new(column_u32(id, "id")?))
    }

    async fn insert_members(&self, id: ExpeditionId, members: &[Member]) -> Result<u64, ExpeditionError> {
        let ids: Vec<i64> = members.iter().map(|m| i64::from(m.id.get())).collect();
        let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();

        let query = format!(
            "INSERT INTO expedition_members (expedition_id, character_id, character_name, is_current_member) \
             SELECT $1, m.character_id, m.character_name, TRUE \
             FROM UNNEST($2::BIGINT[], $3::TEXT[]) WITH ORDINALITY AS m(character_id, character_name, n) \
             ORDER BY m.n \
             ON CONFLICT (expedition_id, character_id) DO UPDATE SET {MEMBER_REJOIN}"
        );

        let result = sqlx::query(&query)
            .bind(i64::from(id.get()))
            .bind(ids)
            .bind(names)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn insert_member(&self, id: ExpeditionId, member: &Member) -> Result<u64, ExpeditionError> {
        let query = format!(
            "INSERT INTO expedition_members (expedition_id, character_id, character_name, is_current_member) \
             VALUES ($1, $2, $3, TRUE) \
             ON CONFLICT (expedition_id, character_id) DO UPDATE SET {MEMBER_REJOIN}"
        );
        let result = sqlx::query(&query)
            .bind(i64::from(id.get()))
            .bind(i64::from(member.id.get()))
            .bind(&member.name)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn update_member_removed(
        &self,
        id: ExpeditionId,
        character_id: CharacterId,
    ) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "UPDATE expedition_members SET is_current_member = FALSE \
             WHERE expedition_id = $1 AND character_id = $2",
        )
        .bind(i64::from(id.get()))
        .bind(i64::from(character_id.get()))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn update_all_members_removed(&self, id: ExpeditionId) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "UPDATE expedition_members SET is_current_member = FALSE WHERE expedition_id = $1",
        )
        .bind(i64::from(id.get()))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn insert_lockout(&self, id: ExpeditionId, lockout: &LockoutTimer) -> Result<u64, ExpeditionError> {
        self.insert_lockouts(id, std::slice::from_ref(lockout)).await
    }

    async fn insert_lockouts(&self, id: ExpeditionId, lockouts: &[LockoutTimer]) -> Result<u64, ExpeditionError> {
        let uuids: Vec<String> = lockouts.iter().map(|l| l.expedition_uuid().to_string()).collect();
        let events: Vec<String> = lockouts.iter().map(|l| l.event_name().to_string()).collect();
        let expires: Vec<DateTime<Utc>> = lockouts.iter().map(LockoutTimer::expire_at).collect();
        let durations: Vec<i64> = lockouts.iter().map(|l| i64::from(l.duration_secs())).collect();

        let result = sqlx::query(
            "INSERT INTO expedition_lockouts (expedition_id, expedition_uuid, event_name, expire_at, duration_secs) \
             SELECT $1, l.uuid, l.event_name, l.expire_at, l.duration_secs \
             FROM UNNEST($2::TEXT[], $3::TEXT[], $4::TIMESTAMPTZ[], $5::BIGINT[]) \
             AS l(uuid, event_name, expire_at, duration_secs) \
             ON CONFLICT (expedition_id, event_name) \
             DO UPDATE SET expedition_uuid = EXCLUDED.expedition_uuid, expire_at = EXCLUDED.expire_at, \
             duration_secs = EXCLUDED.duration_secs",
        )
        .bind(i64::from(id.get()))
        .bind(uuids)
        .bind(events)
        .bind(expires)
        .bind(durations)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_lockout(&self, id: ExpeditionId, event_name: &str) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "DELETE FROM expedition_lockouts WHERE expedition_id = $1 AND event_name = $2",
        )
        .bind(i64::from(id.get()))
        .bind(event_name)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn update_lock_state(&self, id: ExpeditionId, locked: bool) -> Result<u64, ExpeditionError> {
        let result = sqlx::query("UPDATE expeditions SET is_locked = $2 WHERE id = $1")
            .bind(i64::from(id.get()))
            .bind(locked)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn update_leader(&self, id: ExpeditionId, leader: &Leader) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "UPDATE expeditions SET leader_id = $2, leader_name = $3 WHERE id = $1",
        )
        .bind(i64::from(id.get()))
        .bind(i64::from(leader.id.get()))
        .bind(&leader.name)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn update_replay_on_join(&self, id: ExpeditionId, enabled: bool) -> Result<u64, ExpeditionError> {
        let result = sqlx::query("UPDATE expeditions SET add_replay_on_join = $2 WHERE id = $1")
            .bind(i64::from(id.get()))
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn load_expedition(&self, id: ExpeditionId) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError> {
        let query = format!("{LOAD_EXPEDITIONS_SELECT} WHERE e.id = $1 ORDER BY m.joined_seq");
        let rows = sqlx::query_as::<_, MemberRowTuple>(&query)
            .bind(i64::from(id.get()))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(member_row).collect()
    }

    async fn load_all_expeditions(&self) -> Result<Vec<ExpeditionMemberRow>, ExpeditionError> {
        let query = format!("{LOAD_EXPEDITIONS_SELECT} ORDER BY e.id, m.joined_seq");
        let rows = sqlx::query_as::<_, MemberRowTuple>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(member_row).collect()
    }

    async fn get_leader(&self, id: ExpeditionId) -> Result<Option<Leader>, ExpeditionError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT leader_id, leader_name FROM expeditions WHERE id = $1",
        )
        .bind(i64::from(id.get()))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|(leader_id, name)| {
            Ok(Leader::new(CharacterId::new(column_u32(leader_id, "leader_id")?), name))
        })
        .transpose()
    }

    async fn load_lockouts(
        &self,
        ids: &[ExpeditionId],
    ) -> Result<HashMap<ExpeditionId, Vec<LockoutTimer>>, ExpeditionError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| i64::from(id.get())).collect();
        let rows = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>, i64)>(
            "SELECT l.expedition_id, l.expedition_uuid, e.expedition_name, l.event_name, l.expire_at, l.duration_secs \
             FROM expedition_lockouts l \
             INNER JOIN expeditions e ON e.id = l.expedition_id \
             WHERE l.expedition_id = ANY($1)",
        )
        .bind(raw_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut lockouts: HashMap<ExpeditionId, Vec<LockoutTimer>> = HashMap::new();
        for (expedition_id, uuid, name, event, expire_at, duration) in rows {
            let id = ExpeditionId::new(column_u32(expedition_id, "expedition_id")?);
            let timer = LockoutTimer::new(uuid, name, event, expire_at, column_u32(duration, "duration_secs")?);
            lockouts.entry(id).or_default().push(timer);
        }
        Ok(lockouts)
    }

    async fn get_expedition_id_from_instance_id(
        &self,
        instance_id: u32,
    ) -> Result<Option<ExpeditionId>, ExpeditionError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM expeditions WHERE instance_id = $1")
            .bind(i64::from(instance_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        id.map(|id| column_u32(id, "id").map(ExpeditionId::new))
            .transpose()
    }

    async fn delete_pending_character_lockouts(&self, character_id: CharacterId) -> Result<u64, ExpeditionError> {
        self.delete_all_members_pending_lockouts(std::slice::from_ref(&character_id))
            .await
    }

    async fn delete_all_members_pending_lockouts(
        &self,
        character_ids: &[CharacterId],
    ) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "DELETE FROM character_expedition_lockouts \
             WHERE character_id = ANY($1) AND is_pending = TRUE",
        )
        .bind(raw_character_ids(character_ids))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn insert_character_lockouts(
        &self,
        character_id: CharacterId,
        lockouts: &[LockoutTimer],
        pending: bool,
    ) -> Result<u64, ExpeditionError> {
        let uuids: Vec<String> = lockouts.iter().map(|l| l.expedition_uuid().to_string()).collect();
        let names: Vec<String> = lockouts.iter().map(|l| l.expedition_name().to_string()).collect();
        let events: Vec<String> = lockouts.iter().map(|l| l.event_name().to_string()).collect();
        let expires: Vec<DateTime<Utc>> = lockouts.iter().map(LockoutTimer::expire_at).collect();
        let durations: Vec<i64> = lockouts.iter().map(|l| i64::from(l.duration_secs())).collect();

        // staged rows never overwrite a lockout the character already holds
        let on_conflict = if pending {
            "DO NOTHING"
        } else {
            "DO UPDATE SET expedition_uuid = EXCLUDED.expedition_uuid, expire_at = EXCLUDED.expire_at, \
             duration_secs = EXCLUDED.duration_secs, is_pending = FALSE"
        };
        let query = format!(
            "INSERT INTO character_expedition_lockouts \
             (character_id, expedition_uuid, expedition_name, event_name, expire_at, duration_secs, is_pending) \
             SELECT $1, l.uuid, l.name, l.event, l.expire_at, l.duration, $7 \
             FROM UNNEST($2::TEXT[], $3::TEXT[], $4::TEXT[], $5::TIMESTAMPTZ[], $6::BIGINT[]) \
             AS l(uuid, name, event, expire_at, duration) \
             ON CONFLICT (character_id, expedition_name, event_name) {on_conflict}"
        );

        let result = sqlx::query(&query)
            .bind(i64::from(character_id.get()))
            .bind(uuids)
            .bind(names)
            .bind(events)
            .bind(expires)
            .bind(durations)
            .bind(pending)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn insert_members_lockout(
        &self,
        character_ids: &[CharacterId],
        lockout: &LockoutTimer,
    ) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "INSERT INTO character_expedition_lockouts \
             (character_id, expedition_uuid, expedition_name, event_name, expire_at, duration_secs, is_pending) \
             SELECT c.character_id, $2, $3, $4, $5, $6, FALSE \
             FROM UNNEST($1::BIGINT[]) AS c(character_id) \
             ON CONFLICT (character_id, expedition_name, event_name) \
             DO UPDATE SET expedition_uuid = EXCLUDED.expedition_uuid, expire_at = EXCLUDED.expire_at, \
             duration_secs = EXCLUDED.duration_secs, is_pending = FALSE",
        )
        .bind(raw_character_ids(character_ids))
        .bind(lockout.expedition_uuid())
        .bind(lockout.expedition_name())
        .bind(lockout.event_name())
        .bind(lockout.expire_at())
        .bind(i64::from(lockout.duration_secs()))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_members_lockout(
        &self,
        character_ids: &[CharacterId],
        expedition_name: &str,
        event_name: &str,
    ) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "DELETE FROM character_expedition_lockouts \
             WHERE character_id = ANY($1) AND is_pending = FALSE \
             AND expedition_name = $2 AND event_name = $3",
        )
        .bind(raw_character_ids(character_ids))
        .bind(expedition_name)
        .bind(event_name)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_character_lockouts(
        &self,
        character_id: CharacterId,
        expedition_name: &str,
    ) -> Result<u64, ExpeditionError> {
        let result = sqlx::query(
            "DELETE FROM character_expedition_lockouts \
             WHERE character_id = $1 AND expedition_name = $2",
        )
        .bind(i64::from(character_id.get()))
        .bind(expedition_name)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}
