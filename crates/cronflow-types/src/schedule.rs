//! Cron schedules and their materialized runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a schedule participates in dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Active => write!(f, "ACTIVE"),
            ScheduleStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ScheduleStatus::Active),
            "INACTIVE" => Ok(ScheduleStatus::Inactive),
            other => Err(format!("invalid schedule status: '{other}'")),
        }
    }
}

/// A cron-configured schedule for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Normalized 6-field cron expression (seconds first).
    pub cron_expression: String,
    /// IANA timezone name the cron expression is evaluated in.
    pub timezone: String,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Seed merged into every dispatched execution's context.
    #[serde(default)]
    pub initial_context: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub workflow_id: Uuid,
    /// Cron expression (5 or 6 fields) or a human form such as "every 5 minutes".
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub initial_context: serde_json::Map<String, serde_json::Value>,
}

/// Partial update for a schedule. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ScheduleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_context: Option<serde_json::Map<String, serde_json::Value>>,
}

pub fn default_timezone() -> String {
    "UTC".to_string()
}

/// Dispatch state of a schedule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleRunStatus {
    Created,
    Dispatched,
}

impl fmt::Display for ScheduleRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleRunStatus::Created => write!(f, "CREATED"),
            ScheduleRunStatus::Dispatched => write!(f, "DISPATCHED"),
        }
    }
}

impl FromStr for ScheduleRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ScheduleRunStatus::Created),
            "DISPATCHED" => Ok(ScheduleRunStatus::Dispatched),
            other => Err(format!("invalid schedule run status: '{other}'")),
        }
    }
}

/// One planned firing of a schedule. Unique per (schedule_id, planned_run_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowScheduleRun {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
    pub planned_run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    pub status: ScheduleRunStatus,
    pub dedupe_key: String,
}

impl WorkflowScheduleRun {
    /// A fresh CREATED run for the given occurrence.
    pub fn planned(schedule: &WorkflowSchedule, planned_run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            schedule_id: schedule.id,
            workflow_id: schedule.workflow_id,
            planned_run_at,
            fired_at: None,
            status: ScheduleRunStatus::Created,
            dedupe_key: dedupe_key(schedule.id, planned_run_at),
        }
    }
}

/// `{scheduleId}_{plannedRunAtMillis}`.
pub fn dedupe_key(schedule_id: Uuid, planned_run_at: DateTime<Utc>) -> String {
    format!("{schedule_id}_{}", planned_run_at.timestamp_millis())
}
