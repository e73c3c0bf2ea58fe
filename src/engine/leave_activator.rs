//! Monthly leave activator
//!
//! A polled background job that drives monthly leaves through
//! `pending -> in_progress -> completed`. Each cycle:
//! - activates scheduled passes whose start time has arrived
//! - grants a phone and a gate pass to every eligible student of a due leave
//! - closes the unused passes of leaves whose window has ended
//!
//! Runs are best effort. Nothing stops two processes from running a cycle at
//! the same time; the status guards on each UPDATE and the open-pass unique
//! index keep an overlapping run from granting twice.

use crate::db::{CloseReason, LeaveStatus, MonthlyLeave, PassAction, PassKind, PassStatus};
use crate::utils::format_instant;
use crate::DbPool;
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Outcome of one activator cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivatorRun {
    pub ran_at: String,
    pub scheduled_passes_activated: u64,
    pub leaves_activated: u64,
    pub leaves_completed: u64,
    pub passes_granted: u64,
    pub passes_closed: u64,
    pub failures: u64,
}

/// Summary of the most recent cycle, shared with the API
pub type LastRun = Arc<RwLock<Option<ActivatorRun>>>;

pub struct LeaveActivator {
    db: DbPool,
    offset: FixedOffset,
}

impl LeaveActivator {
    pub fn new(db: DbPool, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    /// Run a single activation cycle as of `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<ActivatorRun> {
        let now_str = format_instant(now);
        let mut run = ActivatorRun {
            ran_at: now_str.clone(),
            ..Default::default()
        };

        run.scheduled_passes_activated = self.activate_scheduled_passes(&now_str).await?;

        let pending: Vec<MonthlyLeave> = sqlx::query_as(
            "SELECT * FROM monthly_leaves WHERE status = 'pending' ORDER BY start_date, start_time",
        )
        .fetch_all(&self.db)
        .await?;

        for leave in pending {
            let Some(starts_at) = leave.starts_at(&self.offset) else {
                tracing::warn!(leave = %leave.id, "Monthly leave has an unreadable start, skipping");
                run.failures += 1;
                continue;
            };
            if starts_at > now {
                continue;
            }

            match self.activate_leave(&leave, now).await {
                Ok(granted) => {
                    run.leaves_activated += 1;
                    run.passes_granted += granted;
                }
                Err(e) => {
                    run.failures += 1;
                    tracing::warn!(leave = %leave.id, error = %e, "Failed to activate monthly leave");
                }
            }
        }

        let in_progress: Vec<MonthlyLeave> = sqlx::query_as(
            "SELECT * FROM monthly_leaves WHERE status = 'in_progress' ORDER BY end_date, end_time",
        )
        .fetch_all(&self.db)
        .await?;

        for leave in in_progress {
            let Some(ends_at) = leave.ends_at(&self.offset) else {
                tracing::warn!(leave = %leave.id, "Monthly leave has an unreadable end, skipping");
                run.failures += 1;
                continue;
            };
            if ends_at > now {
                continue;
            }

            match self.complete_leave(&leave, &now_str).await {
                Ok(closed) => {
                    run.leaves_completed += 1;
                    run.passes_closed += closed;
                }
                Err(e) => {
                    run.failures += 1;
                    tracing::warn!(leave = %leave.id, error = %e, "Failed to complete monthly leave");
                }
            }
        }

        if run.leaves_activated + run.leaves_completed + run.scheduled_passes_activated > 0 {
            tracing::info!(
                scheduled = run.scheduled_passes_activated,
                activated = run.leaves_activated,
                completed = run.leaves_completed,
                granted = run.passes_granted,
                closed = run.passes_closed,
                "Leave activator cycle completed"
            );
        } else {
            tracing::debug!("Leave activator cycle found nothing due");
        }

        Ok(run)
    }

    /// Pending passes issued by staff for a later start
    async fn activate_scheduled_passes(&self, now: &str) -> Result<u64> {
        let to = PassStatus::Pending.apply(PassAction::Activate)?;
        let result = sqlx::query(
            r#"
            UPDATE pass_grants
            SET status = ?, issued_at = ?, updated_at = ?
            WHERE status = ?
              AND leave_id IS NULL
              AND scheduled_for IS NOT NULL
              AND scheduled_for <= ?
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(now)
        .bind(PassStatus::Pending)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Grant passes for a due leave and mark it in progress.
    ///
    /// Returns the number of passes inserted.
    async fn activate_leave(&self, leave: &MonthlyLeave, now: DateTime<Utc>) -> Result<u64> {
        let now_str = format_instant(now);
        let ends_at = leave.ends_at(&self.offset);

        // A window that is already over grants nothing
        if ends_at.map_or(true, |end| end <= now) {
            tracing::warn!(leave = %leave.id, title = %leave.title, "Monthly leave ended before it was activated");
            sqlx::query(
                r#"
                UPDATE monthly_leaves
                SET status = 'completed', activated_at = ?, completed_at = ?, updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
            )
            .bind(&now_str)
            .bind(&now_str)
            .bind(&now_str)
            .bind(&leave.id)
            .execute(&self.db)
            .await?;
            return Ok(0);
        }
        let expected_return = ends_at.map(format_instant);

        let mut tx = self.db.begin().await?;

        let eligible: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT s.id FROM students s
            WHERE NOT EXISTS (
                SELECT 1 FROM leave_exclusions e WHERE e.leave_id = ? AND e.student_id = s.id
            )
            AND NOT EXISTS (
                SELECT 1 FROM pass_grants p WHERE p.student_id = s.id AND p.status != 'completed'
            )
            ORDER BY s.admission_number
            "#,
        )
        .bind(&leave.id)
        .fetch_all(&mut *tx)
        .await?;

        let purpose = format!("Monthly leave: {}", leave.title);
        let mut granted = 0u64;

        for (student_id,) in &eligible {
            for kind in PassKind::ALL {
                sqlx::query(
                    r#"
                    INSERT INTO pass_grants (
                        id, student_id, kind, purpose, status, issued_by, leave_id,
                        expected_return_at, issued_at, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, 'active', ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(student_id)
                .bind(kind)
                .bind(&purpose)
                .bind(&leave.created_by)
                .bind(&leave.id)
                .bind(&expected_return)
                .bind(&now_str)
                .bind(&now_str)
                .bind(&now_str)
                .execute(&mut *tx)
                .await?;
                granted += 1;
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE monthly_leaves
            SET status = ?, passes_granted = ?, activated_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(LeaveStatus::InProgress)
        .bind(granted as i64)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&leave.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Another run got there first
            tx.rollback().await?;
            tracing::debug!(leave = %leave.id, "Monthly leave already activated elsewhere");
            return Ok(0);
        }

        tx.commit().await?;

        tracing::info!(
            leave = %leave.id,
            title = %leave.title,
            students = eligible.len(),
            passes = granted,
            "Monthly leave activated"
        );

        Ok(granted)
    }

    /// Close the unused passes granted by a leave and mark it completed.
    ///
    /// Passes are matched by `leave_id`. Passes that are `out` stay open until
    /// the student or phone is actually back.
    async fn complete_leave(&self, leave: &MonthlyLeave, now: &str) -> Result<u64> {
        let action = PassAction::EndLeave;
        let from = PassStatus::accepting(action);
        let to = PassStatus::Active.apply(action)?;
        let sql = format!(
            "UPDATE pass_grants SET status = ?, close_reason = ?, updated_at = ? \
             WHERE leave_id = ? AND status IN ({})",
            vec!["?"; from.len()].join(", ")
        );

        let mut tx = self.db.begin().await?;

        let mut close = sqlx::query(&sql)
            .bind(to)
            .bind(CloseReason::for_action(action))
            .bind(now)
            .bind(&leave.id);
        for status in from {
            close = close.bind(status);
        }
        let closed = close.execute(&mut *tx).await?.rows_affected();

        let result = sqlx::query(
            r#"
            UPDATE monthly_leaves
            SET status = 'completed', completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&leave.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        tx.commit().await?;

        tracing::info!(leave = %leave.id, title = %leave.title, closed, "Monthly leave completed");

        Ok(closed)
    }
}

/// Spawn the background leave activator task
pub fn spawn_leave_activator(db: DbPool, config: crate::config::LeaveConfig, last_run: LastRun) {
    if !config.enabled {
        tracing::info!("Monthly leave activator is disabled");
        return;
    }

    let interval_secs = config.poll_interval_seconds.max(1);
    tracing::info!(
        interval_secs = interval_secs,
        utc_offset_minutes = config.utc_offset_minutes,
        "Starting monthly leave activator"
    );

    let activator = LeaveActivator::new(db, config.offset());

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            match activator.run_cycle(Utc::now()).await {
                Ok(run) => *last_run.write() = Some(run),
                Err(e) => tracing::error!(error = %e, "Leave activator cycle failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PassGrant;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    async fn setup() -> DbPool {
        crate::db::connect("sqlite::memory:").await.unwrap()
    }

    async fn add_student(db: &DbPool, id: &str) {
        sqlx::query(
            "INSERT INTO students (id, admission_number, name, created_at, updated_at) VALUES (?, ?, ?, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .bind(id)
        .bind(format!("ADM-{}", id))
        .bind(format!("Student {}", id))
        .execute(db)
        .await
        .unwrap();
    }

    async fn add_leave(db: &DbPool, id: &str, start: (&str, &str), end: (&str, &str)) {
        sqlx::query(
            r#"
            INSERT INTO monthly_leaves (id, title, start_date, start_time, end_date, end_time, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
            "#,
        )
        .bind(id)
        .bind(format!("Leave {}", id))
        .bind(start.0)
        .bind(start.1)
        .bind(end.0)
        .bind(end.1)
        .execute(db)
        .await
        .unwrap();
    }

    async fn exclude(db: &DbPool, leave_id: &str, student_id: &str) {
        sqlx::query(
            "INSERT INTO leave_exclusions (id, leave_id, student_id, created_at) VALUES (?, ?, ?, '2026-01-01T00:00:00Z')",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(leave_id)
        .bind(student_id)
        .execute(db)
        .await
        .unwrap();
    }

    async fn add_pass(db: &DbPool, id: &str, student_id: &str, kind: &str, status: &str) {
        sqlx::query(
            r#"
            INSERT INTO pass_grants (id, student_id, kind, purpose, status, issued_at, created_at, updated_at)
            VALUES (?, ?, ?, 'Hospital visit', ?, '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')
            "#,
        )
        .bind(id)
        .bind(student_id)
        .bind(kind)
        .bind(status)
        .execute(db)
        .await
        .unwrap();
    }

    async fn passes_for(db: &DbPool, student_id: &str) -> Vec<PassGrant> {
        sqlx::query_as("SELECT * FROM pass_grants WHERE student_id = ? ORDER BY kind")
            .bind(student_id)
            .fetch_all(db)
            .await
            .unwrap()
    }

    async fn leave_status(db: &DbPool, id: &str) -> MonthlyLeave {
        sqlx::query_as("SELECT * FROM monthly_leaves WHERE id = ?")
            .bind(id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_due_does_nothing() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_leave(&db, "l1", ("2026-03-09", "08:00"), ("2026-03-11", "18:00")).await;

        let activator = LeaveActivator::new(db.clone(), utc());
        let run = activator.run_cycle(at(9, 7)).await.unwrap();

        assert_eq!(run.leaves_activated, 0);
        assert!(passes_for(&db, "s1").await.is_empty());
        assert_eq!(leave_status(&db, "l1").await.status, LeaveStatus::Pending);
    }

    #[tokio::test]
    async fn test_activation_grants_pairs_and_skips_excluded_and_holders() {
        let db = setup().await;
        for id in ["s1", "s2", "s3"] {
            add_student(&db, id).await;
        }
        add_leave(&db, "l1", ("2026-03-09", "08:00"), ("2026-03-11", "18:00")).await;
        exclude(&db, "l1", "s2").await;
        add_pass(&db, "manual", "s3", "gate", "active").await;

        let activator = LeaveActivator::new(db.clone(), utc());
        let run = activator.run_cycle(at(9, 8)).await.unwrap();

        assert_eq!(run.leaves_activated, 1);
        assert_eq!(run.passes_granted, 2);

        let s1 = passes_for(&db, "s1").await;
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].kind, PassKind::Gate);
        assert_eq!(s1[1].kind, PassKind::Phone);
        assert!(s1.iter().all(|p| p.status == PassStatus::Active));
        assert!(s1.iter().all(|p| p.leave_id.as_deref() == Some("l1")));
        assert_eq!(s1[0].expected_return_at.as_deref(), Some("2026-03-11T18:00:00Z"));

        assert!(passes_for(&db, "s2").await.is_empty());
        assert_eq!(passes_for(&db, "s3").await.len(), 1);

        let leave = leave_status(&db, "l1").await;
        assert_eq!(leave.status, LeaveStatus::InProgress);
        assert_eq!(leave.passes_granted, 2);
    }

    #[tokio::test]
    async fn test_repeated_cycles_do_not_double_grant() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_leave(&db, "l1", ("2026-03-09", "08:00"), ("2026-03-11", "18:00")).await;

        let activator = LeaveActivator::new(db.clone(), utc());
        activator.run_cycle(at(9, 8)).await.unwrap();
        let second = activator.run_cycle(at(9, 9)).await.unwrap();

        assert_eq!(second.leaves_activated, 0);
        assert_eq!(second.passes_granted, 0);
        assert_eq!(passes_for(&db, "s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_leaves_do_not_double_grant() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_leave(&db, "a", ("2026-03-09", "08:00"), ("2026-03-11", "18:00")).await;
        add_leave(&db, "b", ("2026-03-10", "08:00"), ("2026-03-12", "18:00")).await;

        let activator = LeaveActivator::new(db.clone(), utc());
        activator.run_cycle(at(9, 8)).await.unwrap();
        let run = activator.run_cycle(at(10, 8)).await.unwrap();

        assert_eq!(run.leaves_activated, 1);
        assert_eq!(run.passes_granted, 0);
        assert_eq!(passes_for(&db, "s1").await.len(), 2);
        assert_eq!(leave_status(&db, "b").await.passes_granted, 0);
    }

    #[tokio::test]
    async fn test_completion_is_keyed_by_leave() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_student(&db, "s2").await;
        add_leave(&db, "l1", ("2026-03-09", "08:00"), ("2026-03-11", "18:00")).await;
        exclude(&db, "l1", "s2").await;

        let activator = LeaveActivator::new(db.clone(), utc());
        activator.run_cycle(at(9, 8)).await.unwrap();

        // A staff-issued pass during the leave window is not the leave's to close
        add_pass(&db, "manual", "s2", "phone", "active").await;
        // s1 actually walked out with the gate pass
        sqlx::query("UPDATE pass_grants SET status = 'out' WHERE student_id = 's1' AND kind = 'gate'")
            .execute(&db)
            .await
            .unwrap();

        let run = activator.run_cycle(at(11, 18)).await.unwrap();
        assert_eq!(run.leaves_completed, 1);
        assert_eq!(run.passes_closed, 1);

        let s1 = passes_for(&db, "s1").await;
        let gate = s1.iter().find(|p| p.kind == PassKind::Gate).unwrap();
        let phone = s1.iter().find(|p| p.kind == PassKind::Phone).unwrap();
        assert_eq!(gate.status, PassStatus::Out);
        assert_eq!(phone.status, PassStatus::Completed);
        assert_eq!(phone.close_reason, Some(CloseReason::LeaveEnded));

        let manual = passes_for(&db, "s2").await;
        assert_eq!(manual[0].status, PassStatus::Active);

        let leave = leave_status(&db, "l1").await;
        assert_eq!(leave.status, LeaveStatus::Completed);
        assert!(leave.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_leave_entirely_in_the_past_grants_nothing() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_leave(&db, "l1", ("2026-03-01", "08:00"), ("2026-03-02", "18:00")).await;

        let activator = LeaveActivator::new(db.clone(), utc());
        activator.run_cycle(at(9, 8)).await.unwrap();

        assert!(passes_for(&db, "s1").await.is_empty());
        assert_eq!(leave_status(&db, "l1").await.status, LeaveStatus::Completed);
    }

    #[tokio::test]
    async fn test_scheduled_passes_activate() {
        let db = setup().await;
        add_student(&db, "s1").await;
        add_pass(&db, "p1", "s1", "phone", "pending").await;
        sqlx::query("UPDATE pass_grants SET scheduled_for = '2026-03-09T10:00:00Z' WHERE id = 'p1'")
            .execute(&db)
            .await
            .unwrap();

        let activator = LeaveActivator::new(db.clone(), utc());
        assert_eq!(activator.run_cycle(at(9, 9)).await.unwrap().scheduled_passes_activated, 0);
        assert_eq!(activator.run_cycle(at(9, 10)).await.unwrap().scheduled_passes_activated, 1);

        let passes = passes_for(&db, "s1").await;
        assert_eq!(passes[0].status, PassStatus::Active);
        assert_eq!(passes[0].issued_at, "2026-03-09T10:00:00Z");
    }
}
