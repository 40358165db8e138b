//! Schedule store and cron calculator.
//!
//! Provides:
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - Timezone-aware next-occurrence calculation via `croner` + `chrono-tz`
//! - `ScheduleService`: CRUD, due lookup and advancement over a
//!   `ScheduleRepository`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cronflow_types::error::RepositoryError;
use cronflow_types::schedule::{NewSchedule, ScheduleStatus, ScheduleUpdate, WorkflowSchedule};
use uuid::Uuid;

use crate::repository::schedule::ScheduleRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("unknown timezone: '{0}'")]
    InvalidTimezone(String),

    /// The expression never fires again.
    #[error("no upcoming occurrence for '{0}'")]
    NoUpcomingRun(String),

    #[error("schedule {0} not found")]
    NotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"          -> "0 0 * * * *"
/// - "every day"           -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
/// - "hourly"              -> "0 0 * * * *"
/// - "daily"               -> "0 0 0 * * *"
///
/// 5-field expressions get a leading `0` seconds field; 6-field
/// expressions pass through.
pub fn normalize_schedule(input: &str) -> Result<String, ScheduleError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {}", parts.join(" ")));
    }
    if parts.len() == 6 {
        return Ok(parts.join(" "));
    }

    let lower = trimmed.to_lowercase();

    if lower == "every minute" || lower == "minutely" {
        return Ok("0 * * * * *".to_string());
    }
    if lower == "every hour" || lower == "hourly" {
        return Ok("0 0 * * * *".to_string());
    }
    if lower == "every day" || lower == "daily" {
        return Ok("0 0 0 * * *".to_string());
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let (hour, minute) = parse_clock(at_part)
                .ok_or_else(|| ScheduleError::InvalidSchedule(input.to_string()))?;
            return Ok(format!("0 {minute} {hour} * * *"));
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if let [count, unit] = words.as_slice() {
            let n: u32 = count
                .parse()
                .map_err(|_| ScheduleError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(ScheduleError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(ScheduleError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(ScheduleError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

/// "HH:MM" with hour < 24 and minute < 60.
fn parse_clock(s: &str) -> Option<(u32, u32)> {
    let (hour, minute) = s.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

// ---------------------------------------------------------------------------
// Cron calculator
// ---------------------------------------------------------------------------

/// First occurrence of `cron` strictly after `after`, evaluated as wall-clock
/// time in `timezone`.
pub fn calculate_next_run_time(
    cron: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz = parse_timezone(timezone)?;
    let cron_expr = normalize_schedule(cron)?;
    let parsed = cron_expr
        .parse::<croner::Cron>()
        .map_err(|e| ScheduleError::InvalidSchedule(format!("'{cron}': {e}")))?;

    let local_after = after.with_timezone(&tz);
    parsed
        .iter_after(local_after)
        .find(|t| *t > local_after)
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NoUpcomingRun(cron.to_string()))
}

// ---------------------------------------------------------------------------
// ScheduleService
// ---------------------------------------------------------------------------

/// Schedule lifecycle over a schedule repository. Workflow existence is
/// checked against the workflow repository on create.
pub struct ScheduleService<S: ScheduleRepository, W: WorkflowRepository> {
    schedules: Arc<S>,
    workflows: Arc<W>,
}

impl<S: ScheduleRepository, W: WorkflowRepository> ScheduleService<S, W> {
    pub fn new(schedules: Arc<S>, workflows: Arc<W>) -> Self {
        Self {
            schedules,
            workflows,
        }
    }

    pub fn repository(&self) -> &Arc<S> {
        &self.schedules
    }

    /// Validate and store a new ACTIVE schedule whose first run is the next
    /// occurrence after `now`.
    pub async fn create_schedule(
        &self,
        request: NewSchedule,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSchedule, ScheduleError> {
        if self
            .workflows
            .get_workflow(&request.workflow_id)
            .await?
            .is_none()
        {
            return Err(ScheduleError::WorkflowNotFound(request.workflow_id));
        }

        let cron_expression = normalize_schedule(&request.cron_expression)?;
        let next_run_at = calculate_next_run_time(&cron_expression, &request.timezone, now)?;

        let schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            workflow_id: request.workflow_id,
            cron_expression,
            timezone: request.timezone,
            status: ScheduleStatus::Active,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            initial_context: request.initial_context,
            created_at: now,
            updated_at: now,
        };
        self.schedules.create_schedule(&schedule).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            workflow_id = %schedule.workflow_id,
            cron = schedule.cron_expression.as_str(),
            next_run_at = %next_run_at,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Apply a partial update. Changing the cron expression, the timezone,
    /// or reactivating recomputes `next_run_at` from `now`.
    pub async fn update_schedule(
        &self,
        id: Uuid,
        update: ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSchedule, ScheduleError> {
        let mut schedule = self.require(id).await?;
        let mut reschedule = false;

        if let Some(cron) = update.cron_expression {
            schedule.cron_expression = normalize_schedule(&cron)?;
            reschedule = true;
        }
        if let Some(timezone) = update.timezone {
            parse_timezone(&timezone)?;
            schedule.timezone = timezone;
            reschedule = true;
        }
        if let Some(status) = update.status {
            reschedule |= status == ScheduleStatus::Active && schedule.status != status;
            schedule.status = status;
        }
        if let Some(initial_context) = update.initial_context {
            schedule.initial_context = initial_context;
        }

        if reschedule {
            schedule.next_run_at = Some(calculate_next_run_time(
                &schedule.cron_expression,
                &schedule.timezone,
                now,
            )?);
        }
        schedule.updated_at = now;
        self.schedules.update_schedule(&schedule).await?;

        tracing::info!(schedule_id = %id, status = %schedule.status, "schedule updated");
        Ok(schedule)
    }

    pub async fn deactivate_schedule(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSchedule, ScheduleError> {
        let mut schedule = self.require(id).await?;
        schedule.status = ScheduleStatus::Inactive;
        schedule.updated_at = now;
        self.schedules.update_schedule(&schedule).await?;
        tracing::info!(schedule_id = %id, "schedule deactivated");
        Ok(schedule)
    }

    pub async fn get_schedule(&self, id: Uuid) -> Result<Option<WorkflowSchedule>, ScheduleError> {
        Ok(self.schedules.get_schedule(&id).await?)
    }

    pub async fn list_schedules(&self) -> Result<Vec<WorkflowSchedule>, ScheduleError> {
        Ok(self.schedules.list_schedules().await?)
    }

    pub async fn get_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowSchedule>, ScheduleError> {
        Ok(self.schedules.due_schedules(now).await?)
    }

    /// Record a dispatched occurrence: `last_run_at = planned`, and the next
    /// run is the first occurrence after both `planned` and `now`.
    ///
    /// Cron and timezone are re-read so an edit made while the occurrence
    /// ran is honored, and only the run columns are written back.
    pub async fn advance_after_run(
        &self,
        schedule_id: Uuid,
        planned: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSchedule, ScheduleError> {
        let mut current = self.require(schedule_id).await?;
        let next_run_at = calculate_next_run_time(
            &current.cron_expression,
            &current.timezone,
            planned.max(now),
        )?;
        self.schedules
            .record_run(&schedule_id, Some(planned), next_run_at, now)
            .await?;

        current.last_run_at = Some(planned);
        current.next_run_at = Some(next_run_at);
        current.updated_at = now;
        Ok(current)
    }

    /// Move `next_run_at` past the current pending occurrence and past
    /// `now`, without recording a run.
    pub async fn force_advance_schedule(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WorkflowSchedule, ScheduleError> {
        let mut schedule = self.require(id).await?;
        let from = schedule.next_run_at.map_or(now, |next| next.max(now));
        let next_run_at =
            calculate_next_run_time(&schedule.cron_expression, &schedule.timezone, from)?;

        tracing::warn!(
            schedule_id = %id,
            previous = ?schedule.next_run_at,
            next_run_at = %next_run_at,
            "schedule force-advanced"
        );
        self.schedules.record_run(&id, None, next_run_at, now).await?;
        schedule.next_run_at = Some(next_run_at);
        schedule.updated_at = now;
        Ok(schedule)
    }

    async fn require(&self, id: Uuid) -> Result<WorkflowSchedule, ScheduleError> {
        self.schedules
            .get_schedule(&id)
            .await?
            .ok_or(ScheduleError::NotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::testing::InMemoryStore;
    use crate::workflow::definition::parse_workflow_yaml;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // -------------------------------------------------------------------
    // normalize_schedule
    // -------------------------------------------------------------------

    #[test]
    fn test_normalize_standard_5field_cron() {
        let result = normalize_schedule("*/5 * * * *").unwrap();
        assert_eq!(result, "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_6field_cron_passthrough() {
        let result = normalize_schedule("30 */5 * * * *").unwrap();
        assert_eq!(result, "30 */5 * * * *");
    }

    #[test]
    fn test_normalize_every_5_minutes() {
        assert_eq!(normalize_schedule("every 5 minutes").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_every_10_seconds() {
        assert_eq!(normalize_schedule("every 10 seconds").unwrap(), "*/10 * * * * *");
    }

    #[test]
    fn test_normalize_every_2_hours() {
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 0 */2 * * *");
    }

    #[test]
    fn test_normalize_keywords() {
        assert_eq!(normalize_schedule("every minute").unwrap(), "0 * * * * *");
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("daily").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn test_normalize_every_day_at_time() {
        assert_eq!(normalize_schedule("every day at 09:30").unwrap(), "0 30 9 * * *");
        assert_eq!(normalize_schedule("every day at 00:00").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn test_normalize_every_day_at_out_of_range() {
        assert!(normalize_schedule("every day at 24:00").is_err());
        assert!(normalize_schedule("every day at 9").is_err());
    }

    #[test]
    fn test_normalize_invalid_format() {
        assert!(normalize_schedule("run whenever").is_err());
    }

    #[test]
    fn test_normalize_zero_interval_rejected() {
        assert!(normalize_schedule("every 0 minutes").is_err());
    }

    #[test]
    fn test_normalize_case_insensitive() {
        assert_eq!(normalize_schedule("Every 5 Minutes").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_singular_unit() {
        assert_eq!(normalize_schedule("every 1 minute").unwrap(), "0 */1 * * * *");
    }

    // -------------------------------------------------------------------
    // calculate_next_run_time
    // -------------------------------------------------------------------

    #[test]
    fn test_next_run_every_five_minutes() {
        let next = calculate_next_run_time("every 5 minutes", "UTC", at(2026, 3, 1, 9, 2, 30)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 9, 5, 0));
    }

    #[test]
    fn test_next_run_is_strictly_after() {
        let next = calculate_next_run_time("*/5 * * * *", "UTC", at(2026, 3, 1, 9, 5, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 9, 10, 0));
    }

    #[test]
    fn test_next_run_in_timezone() {
        // 09:00 in Kolkata (UTC+05:30) is 03:30 UTC.
        let next = calculate_next_run_time("0 9 * * *", "Asia/Kolkata", at(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 3, 30, 0));
    }

    #[test]
    fn test_next_run_across_dst_change() {
        // New York switches to EDT on 2026-03-08; 09:00 EDT is 13:00 UTC.
        let next = calculate_next_run_time(
            "every day at 09:00",
            "America/New_York",
            at(2026, 3, 7, 15, 0, 0),
        )
        .unwrap();
        assert_eq!(next, at(2026, 3, 8, 13, 0, 0));
    }

    #[test]
    fn test_next_run_unknown_timezone() {
        let err = calculate_next_run_time("hourly", "Mars/Olympus", Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTimezone(_)));
    }

    #[test]
    fn test_next_run_invalid_cron() {
        let err = calculate_next_run_time("99 * * * *", "UTC", Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidSchedule(_)));
    }

    // -------------------------------------------------------------------
    // ScheduleService
    // -------------------------------------------------------------------

    const WORKFLOW_YAML: &str = r#"
name: nightly
nodes:
  - id: start
    config: { type: TRIGGER }
"#;

    async fn service() -> (ScheduleService<InMemoryStore, InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::default());
        let def = parse_workflow_yaml(WORKFLOW_YAML).unwrap();
        store.save_workflow(&def).await.unwrap();
        (ScheduleService::new(store.clone(), store), def.id)
    }

    fn request(workflow_id: Uuid, cron: &str) -> NewSchedule {
        NewSchedule {
            workflow_id,
            cron_expression: cron.to_string(),
            timezone: "UTC".to_string(),
            initial_context: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_schedule_sets_first_run() {
        let (svc, workflow_id) = service().await;
        let now = at(2026, 3, 1, 9, 2, 0);

        let schedule = svc
            .create_schedule(request(workflow_id, "every 5 minutes"), now)
            .await
            .unwrap();
        assert_eq!(schedule.cron_expression, "0 */5 * * * *");
        assert_eq!(schedule.next_run_at, Some(at(2026, 3, 1, 9, 5, 0)));
        assert_eq!(schedule.status, ScheduleStatus::Active);
        assert!(svc.get_schedule(schedule.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_schedule_for_unknown_workflow() {
        let (svc, _) = service().await;
        let err = svc
            .create_schedule(request(Uuid::now_v7(), "hourly"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_schedule_rejects_bad_cron() {
        let (svc, workflow_id) = service().await;
        let err = svc
            .create_schedule(request(workflow_id, "sometimes"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidSchedule(_)));
        assert!(svc.list_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_schedules_excludes_inactive_and_future() {
        let (svc, workflow_id) = service().await;
        let now = at(2026, 3, 1, 9, 0, 0);
        let due = svc
            .create_schedule(request(workflow_id, "every minute"), now)
            .await
            .unwrap();
        let inactive = svc
            .create_schedule(request(workflow_id, "every minute"), now)
            .await
            .unwrap();
        svc.create_schedule(request(workflow_id, "daily"), now)
            .await
            .unwrap();
        svc.deactivate_schedule(inactive.id, now).await.unwrap();

        let found = svc
            .get_due_schedules(now + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_update_schedule_recomputes_next_run() {
        let (svc, workflow_id) = service().await;
        let now = at(2026, 3, 1, 9, 0, 0);
        let schedule = svc
            .create_schedule(request(workflow_id, "daily"), now)
            .await
            .unwrap();

        let update = ScheduleUpdate {
            cron_expression: Some("every 15 minutes".to_string()),
            ..Default::default()
        };
        let updated = svc.update_schedule(schedule.id, update, now).await.unwrap();
        assert_eq!(updated.next_run_at, Some(at(2026, 3, 1, 9, 15, 0)));
    }

    #[tokio::test]
    async fn test_update_missing_schedule() {
        let (svc, _) = service().await;
        let err = svc
            .update_schedule(Uuid::now_v7(), ScheduleUpdate::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_advance_after_run_records_last_run() {
        let (svc, workflow_id) = service().await;
        let now = at(2026, 3, 1, 9, 0, 0);
        let schedule = svc
            .create_schedule(request(workflow_id, "every 5 minutes"), now)
            .await
            .unwrap();
        let planned = schedule.next_run_at.unwrap();

        let advanced = svc
            .advance_after_run(schedule.id, planned, planned + Duration::seconds(3))
            .await
            .unwrap();
        assert_eq!(advanced.last_run_at, Some(planned));
        assert_eq!(advanced.next_run_at, Some(at(2026, 3, 1, 9, 10, 0)));
    }

    #[tokio::test]
    async fn test_force_advance_skips_stuck_occurrence() {
        let (svc, workflow_id) = service().await;
        let created = at(2026, 3, 1, 8, 0, 0);
        let schedule = svc
            .create_schedule(request(workflow_id, "hourly"), created)
            .await
            .unwrap();
        assert_eq!(schedule.next_run_at, Some(at(2026, 3, 1, 9, 0, 0)));

        let now = at(2026, 3, 1, 10, 30, 0);
        let advanced = svc.force_advance_schedule(schedule.id, now).await.unwrap();
        assert_eq!(advanced.next_run_at, Some(at(2026, 3, 1, 11, 0, 0)));
        assert!(advanced.last_run_at.is_none());
    }
}
