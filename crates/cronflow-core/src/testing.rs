//! In-memory repositories and recording collaborators for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cronflow_types::error::RepositoryError;
use cronflow_types::execution::{
    ExecutionStatus, LogFilter, LogQuery, Page, WorkflowExecution, WorkflowExecutionLog,
};
use cronflow_types::notification::NotificationMessage;
use cronflow_types::schedule::{ScheduleRunStatus, ScheduleStatus, WorkflowSchedule, WorkflowScheduleRun};
use cronflow_types::workflow::{WorkflowDefinition, WorkflowStatus, WorkflowTrigger};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;
use crate::repository::schedule::ScheduleRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::collaborators::{
    CollaboratorError, CollaboratorFuture, Collaborators, DataResolver, HttpCaller, HttpRequest,
    HttpResponse, Notifier,
};

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

/// All three repositories over DashMaps. Uniqueness checks use the entry API
/// so concurrent claims behave like a unique index.
#[derive(Default)]
pub struct InMemoryStore {
    workflows: DashMap<Uuid, WorkflowDefinition>,
    triggers: DashMap<Uuid, WorkflowTrigger>,
    schedules: DashMap<Uuid, WorkflowSchedule>,
    runs: DashMap<(Uuid, i64), WorkflowScheduleRun>,
    executions: DashMap<String, WorkflowExecution>,
    logs: Mutex<Vec<WorkflowExecutionLog>>,
    reject_execution_inserts: AtomicBool,
}

impl InMemoryStore {
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn logs(&self) -> Vec<WorkflowExecutionLog> {
        self.logs.lock().unwrap().clone()
    }

    /// Make `insert_execution` fail as if the database were unreachable.
    pub fn reject_execution_inserts(&self, reject: bool) {
        self.reject_execution_inserts.store(reject, Ordering::SeqCst);
    }
}

impl WorkflowRepository for InMemoryStore {
    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        match self.workflows.entry(def.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                def.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(def.clone());
                Ok(())
            }
        }
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        Ok(self.workflows.iter().map(|w| w.clone()).collect())
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        self.triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get_trigger(&self, id: &Uuid) -> Result<Option<WorkflowTrigger>, RepositoryError> {
        Ok(self.triggers.get(id).map(|t| t.clone()))
    }

    async fn list_triggers(&self) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        Ok(self.triggers.iter().map(|t| t.clone()).collect())
    }

    async fn triggers_for_event(
        &self,
        event_name: &str,
    ) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        Ok(self
            .triggers
            .iter()
            .filter(|t| t.event_name == event_name && t.status == WorkflowStatus::Active)
            .map(|t| t.clone())
            .collect())
    }
}

impl ScheduleRepository for InMemoryStore {
    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        match self.schedules.get_mut(&schedule.id) {
            Some(mut existing) => {
                *existing = schedule.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn record_run(
        &self,
        id: &Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut existing = self.schedules.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if last_run_at.is_some() {
            existing.last_run_at = last_run_at;
        }
        existing.next_run_at = Some(next_run_at);
        existing.updated_at = updated_at;
        Ok(())
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        Ok(self.schedules.get(id).map(|s| s.clone()))
    }

    async fn list_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        Ok(self.schedules.iter().map(|s| s.clone()).collect())
    }

    async fn due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let mut due: Vec<WorkflowSchedule> = self
            .schedules
            .iter()
            .filter(|s| s.status == ScheduleStatus::Active && s.next_run_at.is_some_and(|n| n <= now))
            .map(|s| s.clone())
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn find_or_create_run(
        &self,
        run: &WorkflowScheduleRun,
    ) -> Result<(WorkflowScheduleRun, bool), RepositoryError> {
        let key = (run.schedule_id, run.planned_run_at.timestamp_millis());
        match self.runs.entry(key) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok((run.clone(), true))
            }
        }
    }

    async fn mark_run_dispatched(
        &self,
        run_id: &Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut found = false;
        for mut run in self.runs.iter_mut() {
            if run.id == *run_id {
                run.status = ScheduleRunStatus::Dispatched;
                run.fired_at = Some(fired_at);
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn list_runs(&self, schedule_id: &Uuid) -> Result<Vec<WorkflowScheduleRun>, RepositoryError> {
        let mut runs: Vec<WorkflowScheduleRun> = self
            .runs
            .iter()
            .filter(|r| r.schedule_id == *schedule_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| b.planned_run_at.cmp(&a.planned_run_at));
        Ok(runs)
    }
}

impl ExecutionRepository for InMemoryStore {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        if self.reject_execution_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        match self.executions.entry(execution.idempotency_key.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "idempotency key '{}' already exists",
                execution.idempotency_key
            ))),
            Entry::Vacant(slot) => {
                slot.insert(execution.clone());
                Ok(())
            }
        }
    }

    async fn get_execution_by_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(key).map(|e| e.clone()))
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self
            .executions
            .iter()
            .find(|e| e.id == *id)
            .map(|e| e.clone()))
    }

    async fn finish_execution(
        &self,
        key: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
        result: Option<&Value>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.executions.get_mut(key) {
            Some(mut execution) if execution.status == ExecutionStatus::Processing => {
                execution.status = status;
                execution.error_message = error_message.map(str::to_string);
                execution.result = result.cloned();
                execution.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut stale: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Processing && e.started_at < cutoff)
            .map(|e| e.clone())
            .collect();
        stale.sort_by_key(|e| e.started_at);
        Ok(stale)
    }

    async fn count_by_status(&self) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let mut counts: BTreeMap<ExecutionStatus, u64> = BTreeMap::new();
        for e in self.executions.iter() {
            *counts.entry(e.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn delete_execution_by_key(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.executions.remove(key).is_some())
    }

    async fn append_log(&self, log: &WorkflowExecutionLog) -> Result<(), RepositoryError> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn query_logs(
        &self,
        query: &LogQuery,
    ) -> Result<Page<WorkflowExecutionLog>, RepositoryError> {
        let logs = self.logs.lock().unwrap();
        let matching: Vec<&WorkflowExecutionLog> = logs
            .iter()
            .filter(|l| match &query.filter {
                LogFilter::Execution(id) => l.execution_id == *id,
                LogFilter::Node(id) => l.node_id == *id,
                LogFilter::NodeTemplate(id) => l.node_template_id.as_deref() == Some(id.as_str()),
                LogFilter::TimeRange { from, to } => l.timestamp >= *from && l.timestamp <= *to,
            })
            .collect();
        let items = matching
            .iter()
            .skip(query.offset() as usize)
            .take(query.size as usize)
            .map(|l| (*l).clone())
            .collect();
        Ok(Page {
            items,
            page: query.page,
            size: query.size,
            total: matching.len() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationMessage>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: NotificationMessage) -> CollaboratorFuture<'_, ()> {
        self.sent.lock().unwrap().push(message);
        Box::pin(async { Ok(()) })
    }
}

/// Replies with a fixed response and records requests.
pub struct StubHttpCaller {
    response: Result<HttpResponse, CollaboratorError>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubHttpCaller {
    pub fn replying(status_code: u16, body: Value) -> Self {
        Self {
            response: Ok(HttpResponse { status_code, body }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            response: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpCaller for StubHttpCaller {
    fn request(&self, request: HttpRequest) -> CollaboratorFuture<'_, HttpResponse> {
        self.requests.lock().unwrap().push(request);
        let response = self.response.clone();
        Box::pin(async move { response })
    }
}

/// Answers queries from a fixed map and records the resolved params.
#[derive(Default)]
pub struct StubResolver {
    results: BTreeMap<String, Value>,
    calls: Mutex<Vec<(String, BTreeMap<String, Value>)>>,
}

impl StubResolver {
    pub fn with(mut self, key: &str, result: Value) -> Self {
        self.results.insert(key.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<(String, BTreeMap<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataResolver for StubResolver {
    fn resolve<'a>(
        &'a self,
        prebuilt_key: &'a str,
        params: BTreeMap<String, Value>,
        _context: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        self.calls
            .lock()
            .unwrap()
            .push((prebuilt_key.to_string(), params));
        let result = self
            .results
            .get(prebuilt_key)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownQuery(prebuilt_key.to_string()));
        Box::pin(async move { result })
    }
}

/// Test collaborators plus handles to inspect them.
pub struct TestCollaborators {
    pub http: Arc<StubHttpCaller>,
    pub notifier: Arc<RecordingNotifier>,
    pub resolver: Arc<StubResolver>,
}

impl TestCollaborators {
    pub fn new(http: StubHttpCaller, resolver: StubResolver) -> Self {
        Self {
            http: Arc::new(http),
            notifier: Arc::new(RecordingNotifier::default()),
            resolver: Arc::new(resolver),
        }
    }

    pub fn bundle(&self) -> Collaborators {
        Collaborators {
            http: self.http.clone(),
            notifier: self.notifier.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl Default for TestCollaborators {
    fn default() -> Self {
        Self::new(
            StubHttpCaller::replying(200, Value::Null),
            StubResolver::default(),
        )
    }
}
