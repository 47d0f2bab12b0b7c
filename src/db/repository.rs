//! SQLite implementation of the remote sync gateway.
//!
//! Uses prepared statements and transactions for data integrity. Every write
//! publishes a `GatewayEvent` after it commits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::gateway::{GatewayEvent, RemoteSyncGateway};
use crate::models::{
    Assignment, BurstRecord, BurstType, CooperativeQuest, NewBurst, NewCooperativeQuest,
    PartnerStatus, PartnerStatusUpdate, QuestStep, SyncQuality, SynchroSession,
    SynchroSessionStatus, SynchroSessionUpdate,
};

/// Capacity of the push channel; slow subscribers see `Lagged` and refetch.
const EVENT_CAPACITY: usize = 256;

/// Database repository for all partner-interaction data.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    events: broadcast::Sender<GatewayEvent>,
    session_ttl: Duration,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pool,
            events,
            session_ttl: Duration::from_secs(120),
        }
    }

    /// Synchro sessions not updated within `ttl` no longer count as active.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn publish(&self, event: GatewayEvent) {
        // No subscribers is fine; nobody needs to refetch.
        let _ = self.events.send(event);
    }

    // ==================== STATUS OPERATIONS ====================

    async fn load_status(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<PartnerStatus>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, heartbeat_active, current_bpm, charge_level, is_online, connection_strength, updated_at FROM partner_status WHERE user_id = ?"
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(status_from_row))
    }

    // ==================== QUEST OPERATIONS ====================

    async fn load_steps(
        conn: &mut SqliteConnection,
        quest_id: &str,
    ) -> Result<Vec<QuestStep>, AppError> {
        let rows = sqlx::query(
            "SELECT id, title, description, assigned_to, requires_both, is_completed, completed_by, completed_at FROM quest_steps WHERE quest_id = ? ORDER BY position"
        )
        .bind(quest_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut step = step_from_row(row);
            step.completions = Self::load_completions(conn, &step.id).await?;
            steps.push(step);
        }
        Ok(steps)
    }

    async fn load_completions(
        conn: &mut SqliteConnection,
        step_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id FROM quest_step_completions WHERE step_id = ? ORDER BY completed_at",
        )
        .bind(step_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }

    async fn load_quest(
        conn: &mut SqliteConnection,
        quest_id: &str,
    ) -> Result<Option<CooperativeQuest>, AppError> {
        let row = sqlx::query(
            "SELECT id, title, description, user_id, partner_id, reward, created_at, deadline, is_active, progress FROM cooperative_quests WHERE id = ?"
        )
        .bind(quest_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let mut quest = quest_from_row(&row);
                quest.steps = Self::load_steps(conn, &quest.id).await?;
                Ok(Some(quest))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RemoteSyncGateway for Repository {
    async fn update_partner_status(
        &self,
        user_id: &str,
        update: &PartnerStatusUpdate,
    ) -> Result<PartnerStatus, AppError> {
        let mut tx = self.pool.begin().await?;
        let existing = Self::load_status(&mut tx, user_id).await?;

        let status = PartnerStatus {
            user_id: user_id.to_string(),
            heartbeat_active: update
                .heartbeat_active
                .or(existing.as_ref().map(|s| s.heartbeat_active))
                .unwrap_or(false),
            current_bpm: update
                .current_bpm
                .or(existing.as_ref().and_then(|s| s.current_bpm)),
            charge_level: update
                .charge_level
                .or(existing.as_ref().map(|s| s.charge_level))
                .unwrap_or(0.0)
                .clamp(0.0, 100.0),
            is_online: update
                .is_online
                .or(existing.as_ref().map(|s| s.is_online))
                .unwrap_or(false),
            connection_strength: update
                .connection_strength
                .or(existing.as_ref().map(|s| s.connection_strength))
                .unwrap_or(0)
                .min(100),
            updated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO partner_status (user_id, heartbeat_active, current_bpm, charge_level, is_online, connection_strength, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&status.user_id)
        .bind(status.heartbeat_active as i32)
        .bind(status.current_bpm)
        .bind(status.charge_level)
        .bind(status.is_online as i32)
        .bind(status.connection_strength as i64)
        .bind(timestamp(status.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.publish(GatewayEvent::PartnerStatusChanged {
            user_id: user_id.to_string(),
        });
        Ok(status)
    }

    async fn get_partner_status(
        &self,
        partner_id: &str,
    ) -> Result<Option<PartnerStatus>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::load_status(&mut conn, partner_id).await
    }

    async fn create_synchro_session(
        &self,
        initiator_id: &str,
        partner_id: &str,
    ) -> Result<SynchroSession, AppError> {
        let now = Utc::now();
        let session = SynchroSession {
            id: uuid::Uuid::new_v4().to_string(),
            initiator_id: initiator_id.to_string(),
            partner_id: partner_id.to_string(),
            status: SynchroSessionStatus::Preparing,
            created_at: now,
            updated_at: now,
            completed_at: None,
            duration_seconds: None,
            sync_quality: None,
        };

        sqlx::query(
            "INSERT INTO synchro_sessions (id, initiator_id, partner_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(&session.id)
        .bind(&session.initiator_id)
        .bind(&session.partner_id)
        .bind(session.status.as_str())
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        self.publish(GatewayEvent::SynchroSessionChanged {
            session_id: session.id.clone(),
            initiator_id: session.initiator_id.clone(),
            partner_id: session.partner_id.clone(),
        });
        Ok(session)
    }

    async fn update_synchro_session(
        &self,
        session_id: &str,
        update: &SynchroSessionUpdate,
    ) -> Result<SynchroSession, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE synchro_sessions SET
                status = COALESCE(?, status),
                completed_at = COALESCE(?, completed_at),
                duration_seconds = COALESCE(?, duration_seconds),
                sync_quality = COALESCE(?, sync_quality),
                updated_at = ?
            WHERE id = ?"#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.completed_at.map(timestamp))
        .bind(update.duration_seconds)
        .bind(update.sync_quality.map(|q| q.as_str()))
        .bind(timestamp(now))
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Synchro session {} not found",
                session_id
            )));
        }

        let row = sqlx::query(
            "SELECT id, initiator_id, partner_id, status, created_at, updated_at, completed_at, duration_seconds, sync_quality FROM synchro_sessions WHERE id = ?"
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        let session = session_from_row(&row);

        self.publish(GatewayEvent::SynchroSessionChanged {
            session_id: session.id.clone(),
            initiator_id: session.initiator_id.clone(),
            partner_id: session.partner_id.clone(),
        });
        Ok(session)
    }

    async fn get_active_synchro_session(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Option<SynchroSession>, AppError> {
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| AppError::Internal(format!("Invalid session TTL: {}", e)))?;
        let cutoff = timestamp(Utc::now() - ttl);

        let row = sqlx::query(
            r#"SELECT id, initiator_id, partner_id, status, created_at, updated_at,
                      completed_at, duration_seconds, sync_quality
               FROM synchro_sessions
               WHERE ((initiator_id = ? AND partner_id = ?) OR (initiator_id = ? AND partner_id = ?))
                 AND status IN ('preparing', 'counting', 'breathing')
                 AND updated_at >= ?
               ORDER BY created_at DESC, rowid DESC
               LIMIT 1"#,
        )
        .bind(user_id)
        .bind(partner_id)
        .bind(partner_id)
        .bind(user_id)
        .bind(&cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn create_serendipity_burst(
        &self,
        from_user: &str,
        to_user: &str,
        burst: &NewBurst,
    ) -> Result<BurstRecord, AppError> {
        let record = BurstRecord {
            id: uuid::Uuid::new_v4().to_string(),
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            burst_type: burst.burst_type,
            content: burst.content.clone(),
            emotion: burst.emotion.clone(),
            timestamp: Utc::now(),
            is_read: false,
        };

        sqlx::query(
            "INSERT INTO serendipity_bursts (id, from_user, to_user, burst_type, content, emotion, created_at, is_read) VALUES (?, ?, ?, ?, ?, ?, ?, 0)"
        )
        .bind(&record.id)
        .bind(&record.from_user)
        .bind(&record.to_user)
        .bind(record.burst_type.as_str())
        .bind(serde_json::to_string(&record.content)?)
        .bind(&record.emotion)
        .bind(timestamp(record.timestamp))
        .execute(&self.pool)
        .await?;

        self.publish(GatewayEvent::SerendipityBurstInserted {
            to_user: to_user.to_string(),
        });
        Ok(record)
    }

    async fn get_serendipity_bursts(
        &self,
        user_id: &str,
        partner_id: &str,
        limit: u32,
    ) -> Result<Vec<BurstRecord>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, from_user, to_user, burst_type, content, emotion, created_at, is_read
               FROM serendipity_bursts
               WHERE (from_user = ? AND to_user = ?) OR (from_user = ? AND to_user = ?)
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?"#,
        )
        .bind(user_id)
        .bind(partner_id)
        .bind(partner_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(burst_from_row).collect())
    }

    async fn mark_serendipity_burst_read(
        &self,
        burst_id: &str,
        reader_id: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let to_user: String = sqlx::query("SELECT to_user FROM serendipity_bursts WHERE id = ?")
            .bind(burst_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("to_user"))
            .ok_or_else(|| AppError::NotFound(format!("Burst {} not found", burst_id)))?;
        if to_user != reader_id {
            return Err(AppError::Forbidden(
                "Only the recipient can mark a burst read".to_string(),
            ));
        }

        sqlx::query("UPDATE serendipity_bursts SET is_read = 1 WHERE id = ? AND to_user = ?")
            .bind(burst_id)
            .bind(reader_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_cooperative_quest(
        &self,
        quest: &NewCooperativeQuest,
    ) -> Result<CooperativeQuest, AppError> {
        let quest_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        // Quest and steps land together or not at all.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO cooperative_quests (id, title, description, user_id, partner_id, reward, created_at, deadline, is_active, progress) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0)"
        )
        .bind(&quest_id)
        .bind(&quest.title)
        .bind(&quest.description)
        .bind(&quest.user_id)
        .bind(&quest.partner_id)
        .bind(&quest.reward)
        .bind(timestamp(now))
        .bind(quest.deadline.map(timestamp))
        .execute(&mut *tx)
        .await?;

        let mut steps = Vec::with_capacity(quest.steps.len());
        for (position, step) in quest.steps.iter().enumerate() {
            let step_id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO quest_steps (id, quest_id, position, title, description, assigned_to, requires_both, is_completed) VALUES (?, ?, ?, ?, ?, ?, ?, 0)"
            )
            .bind(&step_id)
            .bind(&quest_id)
            .bind(position as i64)
            .bind(&step.title)
            .bind(&step.description)
            .bind(step.assigned_to.as_str())
            .bind(step.requires_both as i32)
            .execute(&mut *tx)
            .await?;

            steps.push(QuestStep {
                id: step_id,
                title: step.title.clone(),
                description: step.description.clone(),
                assigned_to: step.assigned_to,
                requires_both: step.requires_both,
                is_completed: false,
                completed_by: None,
                completed_at: None,
                completions: Vec::new(),
            });
        }

        tx.commit().await?;

        self.publish(GatewayEvent::CooperativeQuestChanged {
            user_id: quest.user_id.clone(),
            partner_id: quest.partner_id.clone(),
        });

        Ok(CooperativeQuest {
            id: quest_id,
            title: quest.title.clone(),
            description: quest.description.clone(),
            user_id: quest.user_id.clone(),
            partner_id: quest.partner_id.clone(),
            reward: quest.reward.clone(),
            created_at: now,
            deadline: quest.deadline,
            is_active: true,
            progress: 0.0,
            is_overdue: false,
            steps,
        })
    }

    async fn get_cooperative_quests(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Vec<CooperativeQuest>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"SELECT id, title, description, user_id, partner_id, reward, created_at,
                      deadline, is_active, progress
               FROM cooperative_quests
               WHERE is_active = 1
                 AND ((user_id = ? AND partner_id = ?) OR (user_id = ? AND partner_id = ?))
               ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .bind(partner_id)
        .bind(partner_id)
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut quests = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut quest = quest_from_row(row);
            quest.steps = Self::load_steps(&mut conn, &quest.id).await?;
            quests.push(quest);
        }
        Ok(quests)
    }

    async fn delete_cooperative_quest(&self, quest_id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let owners = sqlx::query("SELECT user_id, partner_id FROM cooperative_quests WHERE id = ?")
            .bind(quest_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quest {} not found", quest_id)))?;

        sqlx::query(
            "DELETE FROM quest_step_completions WHERE step_id IN (SELECT id FROM quest_steps WHERE quest_id = ?)",
        )
        .bind(quest_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM quest_steps WHERE quest_id = ?")
            .bind(quest_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cooperative_quests WHERE id = ?")
            .bind(quest_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.publish(GatewayEvent::CooperativeQuestChanged {
            user_id: owners.get("user_id"),
            partner_id: owners.get("partner_id"),
        });
        Ok(())
    }

    async fn complete_quest_step(
        &self,
        step_id: &str,
        user_id: &str,
    ) -> Result<QuestStep, AppError> {
        let mut tx = self.pool.begin().await?;

        let quest_id: String = sqlx::query("SELECT quest_id FROM quest_steps WHERE id = ?")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("quest_id"))
            .ok_or_else(|| AppError::NotFound(format!("Quest step {} not found", step_id)))?;

        let quest = Self::load_quest(&mut tx, &quest_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quest {} not found", quest_id)))?;
        let step = quest
            .step(step_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Quest step {} not found", step_id)))?;

        let role = quest
            .role_of(user_id)
            .ok_or_else(|| AppError::Forbidden(format!("{} is not part of this quest", user_id)))?;
        if !step.is_assigned_to(role) {
            return Err(AppError::Forbidden(format!(
                "Step {} is not assigned to {}",
                step_id, user_id
            )));
        }
        if step.is_completed || step.completed_by_user(user_id) {
            return Err(AppError::Conflict(format!(
                "Step {} already completed by {}",
                step_id, user_id
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO quest_step_completions (step_id, user_id, completed_at) VALUES (?, ?, ?)",
        )
        .bind(step_id)
        .bind(user_id)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;

        let mut completions = step.completions.clone();
        completions.push(user_id.to_string());
        let done = if step.requires_both {
            completions.iter().any(|u| *u == quest.user_id)
                && completions.iter().any(|u| *u == quest.partner_id)
        } else {
            true
        };

        if done {
            sqlx::query(
                "UPDATE quest_steps SET is_completed = 1, completed_by = ?, completed_at = ? WHERE id = ?",
            )
            .bind(user_id)
            .bind(timestamp(now))
            .bind(step_id)
            .execute(&mut *tx)
            .await?;
        }

        let total = quest.steps.len();
        let completed = quest
            .steps
            .iter()
            .filter(|s| s.is_completed || (done && s.id == step_id))
            .count();
        let progress = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        sqlx::query("UPDATE cooperative_quests SET progress = ? WHERE id = ?")
            .bind(progress)
            .bind(&quest_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.publish(GatewayEvent::CooperativeQuestChanged {
            user_id: quest.user_id.clone(),
            partner_id: quest.partner_id.clone(),
        });

        Ok(QuestStep {
            is_completed: done,
            completed_by: done.then(|| user_id.to_string()),
            completed_at: done.then_some(now),
            completions,
            ..step
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

// ==================== HELPER FUNCTIONS ====================

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_timestamp)
}

fn status_from_row(row: &SqliteRow) -> PartnerStatus {
    let heartbeat_active: i32 = row.get("heartbeat_active");
    let is_online: i32 = row.get("is_online");
    let connection_strength: i64 = row.get("connection_strength");
    let updated_at: String = row.get("updated_at");

    PartnerStatus {
        user_id: row.get("user_id"),
        heartbeat_active: heartbeat_active != 0,
        current_bpm: row.get("current_bpm"),
        charge_level: row.get("charge_level"),
        is_online: is_online != 0,
        connection_strength: connection_strength.clamp(0, 100) as u8,
        updated_at: parse_timestamp(&updated_at),
    }
}

fn session_from_row(row: &SqliteRow) -> SynchroSession {
    let status: String = row.get("status");
    let sync_quality: Option<String> = row.get("sync_quality");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    SynchroSession {
        id: row.get("id"),
        initiator_id: row.get("initiator_id"),
        partner_id: row.get("partner_id"),
        status: SynchroSessionStatus::from_str(&status)
            .unwrap_or(SynchroSessionStatus::Cancelled),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        completed_at: parse_optional_timestamp(row.get("completed_at")),
        duration_seconds: row.get("duration_seconds"),
        sync_quality: sync_quality.as_deref().and_then(SyncQuality::from_str),
    }
}

fn burst_from_row(row: &SqliteRow) -> Option<BurstRecord> {
    let burst_type: String = row.get("burst_type");
    let content: String = row.get("content");
    let created_at: String = row.get("created_at");
    let is_read: i32 = row.get("is_read");

    let Some(burst_type) = BurstType::from_str(&burst_type) else {
        tracing::warn!("Skipping burst with unknown type {:?}", burst_type);
        return None;
    };

    Some(BurstRecord {
        id: row.get("id"),
        from_user: row.get("from_user"),
        to_user: row.get("to_user"),
        burst_type,
        content: serde_json::from_str(&content).unwrap_or(serde_json::Value::Null),
        emotion: row.get("emotion"),
        timestamp: parse_timestamp(&created_at),
        is_read: is_read != 0,
    })
}

fn quest_from_row(row: &SqliteRow) -> CooperativeQuest {
    let created_at: String = row.get("created_at");
    let is_active: i32 = row.get("is_active");

    CooperativeQuest {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        user_id: row.get("user_id"),
        partner_id: row.get("partner_id"),
        reward: row.get("reward"),
        created_at: parse_timestamp(&created_at),
        deadline: parse_optional_timestamp(row.get("deadline")),
        is_active: is_active != 0,
        progress: row.get("progress"),
        is_overdue: false,
        steps: Vec::new(),
    }
}

fn step_from_row(row: &SqliteRow) -> QuestStep {
    let assigned_to: String = row.get("assigned_to");
    let requires_both: i32 = row.get("requires_both");
    let is_completed: i32 = row.get("is_completed");

    QuestStep {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        assigned_to: Assignment::from_str(&assigned_to).unwrap_or(Assignment::Both),
        requires_both: requires_both != 0,
        is_completed: is_completed != 0,
        completed_by: row.get("completed_by"),
        completed_at: parse_optional_timestamp(row.get("completed_at")),
        completions: Vec::new(),
    }
}
