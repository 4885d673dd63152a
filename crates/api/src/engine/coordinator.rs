//! Per-request task state machine.
//!
//! Each `POST /generate` fans out into one sub-task per assigned GPU
//! slot. A single polling loop per parent task drives the worker
//! `progress` RPCs, merges the reports under the task's mutex (the one
//! mutation site, which is what enforces the monotonic-percentage and
//! exactly-once-terminal rules), and publishes frames to the progress
//! bus. Tasks are retained in memory for `GET /status/{id}`; nothing is
//! persisted across restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use remgo_core::args::{build_args, index, GenerateParams};
use remgo_core::scheduler::{Assignment, GpuScheduler};
use remgo_core::types::{DeviceId, Timestamp};
use remgo_worker::messages::ProgressReport;
use remgo_worker::WorkerSupervisor;

use crate::engine::progress::{publish, ProgressUpdate};
use crate::ws::WsManager;

/// Interval between progress polls for a running task.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Seeds are drawn from `[0, 2^31)`.
const MAX_SEED: i64 = 1 << 31;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Error,
    Canceled,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }
}

struct SubTask {
    device: DeviceId,
    image_count: u32,
    sub_id: String,
    percentage: u8,
    results: Vec<String>,
    finished: bool,
    error: Option<String>,
    /// Whether the worker accepted the `generate` call.
    accepted: bool,
    /// Guards the at-most-one `stop` RPC per open sub-task.
    stop_sent: bool,
    started_at: Instant,
}

struct Task {
    id: String,
    total_images: u32,
    created_at: Timestamp,
    status: TaskStatus,
    percentage: u8,
    status_text: String,
    preview: Option<String>,
    results: Vec<String>,
    assignments: Vec<Assignment>,
    sub_tasks: Vec<SubTask>,
    errors: Vec<String>,
    cancel_requested: bool,
    terminal_published: bool,
}

impl Task {
    fn new(id: String, total_images: u32) -> Self {
        Self {
            id,
            total_images,
            created_at: chrono::Utc::now(),
            status: TaskStatus::Pending,
            percentage: 0,
            status_text: "Pending".to_string(),
            preview: None,
            results: Vec::new(),
            assignments: Vec::new(),
            sub_tasks: Vec::new(),
            errors: Vec::new(),
            cancel_requested: false,
            terminal_published: false,
        }
    }

    fn update(&self) -> ProgressUpdate {
        ProgressUpdate::new(
            self.id.clone(),
            self.percentage,
            self.status_text.clone(),
            self.status.is_terminal(),
            self.preview.clone(),
            if self.status.is_terminal() {
                self.results.clone()
            } else {
                Vec::new()
            },
        )
    }
}

/// GPU share of one submission, as returned by `POST /generate`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GpuShare {
    pub device: DeviceId,
    pub images: u32,
}

impl From<Assignment> for GpuShare {
    fn from(a: Assignment) -> Self {
        Self {
            device: a.device,
            images: a.image_count,
        }
    }
}

/// Read-only view of a task for `GET /status/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub percentage: u8,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub preview: Option<String>,
    pub results: Vec<String>,
    pub total_images: u32,
    pub created_at: Timestamp,
    pub gpus: Vec<GpuShare>,
    pub sub_tasks: Vec<SubTaskSnapshot>,
    pub errors: Vec<String>,
}

/// Per-GPU progress inside a [`TaskSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SubTaskSnapshot {
    pub sub_id: String,
    pub device: DeviceId,
    pub image_count: u32,
    pub percentage: u8,
    pub finished: bool,
    pub error: Option<String>,
}

/// What `submit` tells the HTTP layer.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub task_id: String,
    pub started: bool,
    pub assignments: Vec<Assignment>,
    pub total_images: u32,
    pub error: Option<String>,
}

/// Owns every task state machine in the process.
pub struct TaskCoordinator {
    scheduler: Arc<GpuScheduler>,
    supervisor: Arc<WorkerSupervisor>,
    ws_manager: Arc<WsManager>,
    subtask_timeout: Duration,
    tasks: Mutex<HashMap<String, Arc<Mutex<Task>>>>,
    next_id: AtomicU64,
}

impl TaskCoordinator {
    pub fn new(
        scheduler: Arc<GpuScheduler>,
        supervisor: Arc<WorkerSupervisor>,
        ws_manager: Arc<WsManager>,
        subtask_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            supervisor,
            ws_manager,
            subtask_timeout,
            tasks: Mutex::new(HashMap::new()),
            // Seeding from the clock keeps ids monotonic across restarts
            // for log correlation; uniqueness only matters in-process.
            next_id: AtomicU64::new(chrono::Utc::now().timestamp_millis() as u64),
        })
    }

    /// Start a new generation task.
    ///
    /// Splits the request across GPUs, resolves the seed, dispatches one
    /// sub-task per assignment, and spawns the polling loop. When no GPU
    /// assignment is possible the task terminates immediately with an
    /// error and no worker is contacted.
    pub async fn submit(
        self: Arc<Self>,
        params: GenerateParams,
        raw_args: Option<Vec<Value>>,
    ) -> SubmitOutcome {
        let task_id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let total_images = params.image_number;

        let task = Arc::new(Mutex::new(Task::new(task_id.clone(), total_images)));
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), Arc::clone(&task));

        let assignments = self.scheduler.distribute(total_images);
        if assignments.is_empty() {
            let message = "No GPU available".to_string();
            let update = {
                let mut t = task.lock().unwrap();
                t.status = TaskStatus::Error;
                t.status_text = message.clone();
                t.errors.push(message.clone());
                t.terminal_published = true;
                t.update()
            };
            publish(&self.ws_manager, &update).await;
            tracing::warn!(task_id = %task_id, "Rejected generation: no GPU assignment");
            return SubmitOutcome {
                task_id,
                started: false,
                assignments,
                total_images,
                error: Some(message),
            };
        }

        let base_seed = resolve_seed(&params);

        for a in &assignments {
            self.scheduler.mark_busy(a.device, true);
        }

        let initial = {
            let mut t = task.lock().unwrap();
            t.status = TaskStatus::Running;
            t.percentage = 5;
            t.status_text = format!("Distributing to {} GPU(s)", assignments.len());
            t.assignments = assignments.clone();
            t.sub_tasks = assignments
                .iter()
                .enumerate()
                .map(|(i, a)| SubTask {
                    device: a.device,
                    image_count: a.image_count,
                    sub_id: format!("{task_id}_{i}"),
                    percentage: 0,
                    results: Vec::new(),
                    finished: false,
                    error: None,
                    accepted: false,
                    stop_sent: false,
                    started_at: Instant::now(),
                })
                .collect();
            t.update()
        };
        publish(&self.ws_manager, &initial).await;
        tracing::info!(
            task_id = %task_id,
            gpus = assignments.len(),
            total_images,
            seed = base_seed,
            "Task started",
        );

        // Dispatch one generate per assignment, seeds advancing by the
        // preceding image counts so they never collide across GPUs.
        let sub_params = subtask_requests(&params, &assignments, base_seed);
        let mut dispatch_failed = false;
        for (i, (assignment, sub)) in assignments.iter().zip(sub_params.iter()).enumerate() {
            let sub_id = format!("{task_id}_{i}");
            let args = match &raw_args {
                Some(raw) => patch_raw_args(raw, sub),
                None => build_args(sub),
            };
            match self.supervisor.generate(assignment.device, &sub_id, args).await {
                Ok(()) => {
                    task.lock().unwrap().sub_tasks[i].accepted = true;
                }
                Err(e) => {
                    dispatch_failed = true;
                    tracing::error!(
                        task_id = %task_id,
                        device = assignment.device,
                        error = %e,
                        "Sub-task dispatch failed",
                    );
                    let mut t = task.lock().unwrap();
                    t.sub_tasks[i].finished = true;
                    t.sub_tasks[i].error = Some(format!("dispatch failed: {e}"));
                    t.errors.push(format!("GPU {}: dispatch failed: {e}", assignment.device));
                }
            }
        }

        // A failed dispatch cancels the siblings that were already
        // accepted, mirroring an explicit cancel.
        if dispatch_failed {
            self.stop_open_sub_tasks(&task).await;
        }

        tokio::spawn(Arc::clone(&self).run_task(Arc::clone(&task)));

        SubmitOutcome {
            task_id,
            started: true,
            assignments,
            total_images,
            error: None,
        }
    }

    /// Snapshot one task for the status endpoint.
    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        let task = self.tasks.lock().unwrap().get(task_id).cloned()?;
        let t = task.lock().unwrap();
        Some(TaskSnapshot {
            task_id: t.id.clone(),
            status: t.status,
            percentage: t.percentage,
            status_text: t.status_text.clone(),
            preview: t.preview.clone(),
            results: t.results.clone(),
            total_images: t.total_images,
            created_at: t.created_at,
            gpus: t.assignments.iter().copied().map(GpuShare::from).collect(),
            sub_tasks: t
                .sub_tasks
                .iter()
                .map(|s| SubTaskSnapshot {
                    sub_id: s.sub_id.clone(),
                    device: s.device,
                    image_count: s.image_count,
                    percentage: s.percentage,
                    finished: s.finished,
                    error: s.error.clone(),
                })
                .collect(),
            errors: t.errors.clone(),
        })
    }

    /// Cancel every live task, best-effort.
    ///
    /// Returns the number of tasks that received the cancel and whether
    /// all `stop` RPCs went through. Idempotent: already-canceled tasks
    /// and sub-tasks that were already told to stop are skipped.
    pub async fn cancel_all(&self) -> (usize, bool) {
        let live: Vec<Arc<Mutex<Task>>> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| !t.lock().unwrap().status.is_terminal())
            .cloned()
            .collect();

        let mut requested = 0;
        let mut all_stopped = true;
        for task in live {
            {
                let mut t = task.lock().unwrap();
                if t.status.is_terminal() {
                    continue;
                }
                if !t.cancel_requested {
                    t.cancel_requested = true;
                    tracing::info!(task_id = %t.id, "Cancel requested");
                }
                requested += 1;
            }
            if !self.stop_open_sub_tasks(&task).await {
                all_stopped = false;
            }
        }

        (requested, all_stopped)
    }

    /// Issue `stop` to every worker that still owns an open sub-task of
    /// `task`, at most once per sub-task. Returns false if any RPC
    /// failed.
    async fn stop_open_sub_tasks(&self, task: &Arc<Mutex<Task>>) -> bool {
        let targets = collect_stop_targets(&mut task.lock().unwrap());

        let mut ok = true;
        for device in targets {
            match self.supervisor.stop(device).await {
                Ok(success) => {
                    tracing::info!(device, success, "Stop dispatched to worker");
                }
                Err(e) => {
                    ok = false;
                    tracing::warn!(device, error = %e, "Stop RPC failed");
                }
            }
        }
        ok
    }

    /// The per-task polling loop: poll each open sub-task, merge, and
    /// close out once everything is finished.
    async fn run_task(self: Arc<Self>, task: Arc<Mutex<Task>>) {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let open: Vec<(usize, DeviceId, String)> = {
                let t = task.lock().unwrap();
                t.sub_tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| !s.finished)
                    .map(|(i, s)| (i, s.device, s.sub_id.clone()))
                    .collect()
            };

            for (i, device, sub_id) in open {
                let timed_out = {
                    let t = task.lock().unwrap();
                    t.sub_tasks[i].started_at.elapsed() > self.subtask_timeout
                };
                if timed_out {
                    tracing::error!(task_id = %sub_id, device, "Sub-task exceeded wall-clock cap");
                    {
                        let mut t = task.lock().unwrap();
                        mark_sub_task_failed(&mut t, i, "timed out");
                    }
                    self.stop_open_sub_tasks(&task).await;
                    continue;
                }

                match self.supervisor.progress(device, &sub_id).await {
                    Ok(report) => {
                        let mut t = task.lock().unwrap();
                        apply_report(&mut t, i, report);
                    }
                    Err(e) if e.is_worker_gone() => {
                        tracing::error!(task_id = %sub_id, device, error = %e, "Worker lost mid-task");
                        let mut t = task.lock().unwrap();
                        mark_sub_task_failed(&mut t, i, "worker exited");
                    }
                    Err(e) => {
                        // Transient transport failure: retry on the next tick.
                        tracing::debug!(task_id = %sub_id, device, error = %e, "Progress poll failed");
                    }
                }
            }

            let (update, done) = {
                let mut t = task.lock().unwrap();
                let done = t.sub_tasks.iter().all(|s| s.finished);
                if done && !t.terminal_published {
                    finalize(&mut t);
                }
                (t.update(), done)
            };
            publish(&self.ws_manager, &update).await;

            if done {
                let (task_id, status, assignments) = {
                    let t = task.lock().unwrap();
                    (t.id.clone(), t.status, t.assignments.clone())
                };
                for a in &assignments {
                    self.scheduler.mark_busy(a.device, false);
                }
                tracing::info!(task_id = %task_id, status = ?status, "Task closed out");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// State-machine helpers (pure; the unit tests drive these)
// ---------------------------------------------------------------------------

/// Resolve the seed a submission will actually run with.
fn resolve_seed(params: &GenerateParams) -> i64 {
    if params.seed_random || params.image_seed < 0 {
        rand::thread_rng().gen_range(0..MAX_SEED)
    } else {
        params.image_seed
    }
}

/// Derive the per-sub-task requests for an assignment list.
///
/// Sub-task `i` runs `assignments[i].image_count` images starting at
/// `base_seed + sum(counts[..i])` with randomness disabled, so seeds
/// never collide across the GPUs of one submission.
fn subtask_requests(
    params: &GenerateParams,
    assignments: &[Assignment],
    base_seed: i64,
) -> Vec<GenerateParams> {
    let mut seed = base_seed;
    assignments
        .iter()
        .map(|a| {
            let mut p = params.clone();
            p.image_number = a.image_count;
            p.image_seed = seed;
            p.seed_random = false;
            seed += i64::from(a.image_count);
            p
        })
        .collect()
}

/// Re-target a caller-supplied raw args vector at one sub-task.
fn patch_raw_args(raw: &[Value], sub: &GenerateParams) -> Vec<Value> {
    let mut args = raw.to_vec();
    args[index::IMAGE_NUMBER] = json!(sub.image_number);
    args[index::SEED] = json!(sub.image_seed);
    args[index::SEED_RANDOM] = json!(false);
    args
}

/// Fold one worker progress report into the parent task.
fn apply_report(task: &mut Task, idx: usize, report: ProgressReport) {
    let pct = report.percentage.clamp(0, 100) as u8;

    {
        let sub = &mut task.sub_tasks[idx];
        sub.percentage = pct;
        sub.results = report.results;
        if let Some(message) = report.error.filter(|m| !m.is_empty()) {
            if sub.error.is_none() {
                task.errors
                    .push(format!("GPU {}: {message}", sub.device));
            }
            sub.error = Some(message);
        }
        if report.finished {
            sub.finished = true;
        }
    }

    // Parent percentage is the monotonic max over everything observed.
    let max_sub = task.sub_tasks.iter().map(|s| s.percentage).max().unwrap_or(0);
    task.percentage = task.percentage.max(max_sub);

    if !report.status_text.is_empty() {
        task.status_text = report.status_text;
    }
    if let Some(preview) = report.preview {
        task.preview = Some(preview);
    }
}

/// Mark one sub-task permanently failed.
fn mark_sub_task_failed(task: &mut Task, idx: usize, reason: &str) {
    let device = task.sub_tasks[idx].device;
    let sub = &mut task.sub_tasks[idx];
    if sub.finished {
        return;
    }
    sub.finished = true;
    if sub.error.is_none() {
        sub.error = Some(reason.to_string());
        task.errors.push(format!("GPU {device}: {reason}"));
    }
}

/// Devices that still owe us a running sub-task and have not been told
/// to stop yet. Marks them, so a second call returns nothing.
fn collect_stop_targets(task: &mut Task) -> Vec<DeviceId> {
    let mut devices = Vec::new();
    for sub in task.sub_tasks.iter_mut() {
        if !sub.finished && sub.accepted && !sub.stop_sent {
            sub.stop_sent = true;
            if !devices.contains(&sub.device) {
                devices.push(sub.device);
            }
        }
    }
    devices
}

/// Close out a task whose sub-tasks have all finished.
fn finalize(task: &mut Task) {
    task.results = task
        .sub_tasks
        .iter()
        .filter(|s| task.cancel_requested || s.error.is_none())
        .flat_map(|s| s.results.iter().cloned())
        .collect();

    if task.cancel_requested {
        task.status = TaskStatus::Canceled;
        task.status_text = "Canceled".to_string();
    } else {
        let produced = task.results.len();
        task.percentage = 100;
        task.status = if produced > 0 {
            TaskStatus::Finished
        } else {
            TaskStatus::Error
        };
        task.status_text = format!(
            "Finished ({produced}/{} images)",
            task.total_images
        );
    }

    task.preview = None;
    task.terminal_published = true;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(device: DeviceId, image_count: u32) -> Assignment {
        Assignment {
            device,
            image_count,
        }
    }

    fn task_with_subs(counts: &[(DeviceId, u32)]) -> Task {
        let mut task = Task::new("42".to_string(), counts.iter().map(|(_, n)| n).sum());
        task.status = TaskStatus::Running;
        task.assignments = counts.iter().map(|&(d, n)| assignment(d, n)).collect();
        task.sub_tasks = counts
            .iter()
            .enumerate()
            .map(|(i, &(device, image_count))| SubTask {
                device,
                image_count,
                sub_id: format!("42_{i}"),
                percentage: 0,
                results: Vec::new(),
                finished: false,
                error: None,
                accepted: true,
                stop_sent: false,
                started_at: Instant::now(),
            })
            .collect();
        task
    }

    fn report(percentage: i64) -> ProgressReport {
        ProgressReport {
            percentage,
            ..ProgressReport::default()
        }
    }

    // -- Seed fan-out --

    #[test]
    fn subtask_seeds_advance_by_prior_counts() {
        let params = GenerateParams::default();
        let assignments = vec![assignment(0, 6), assignment(1, 2), assignment(2, 3)];
        let subs = subtask_requests(&params, &assignments, 1000);

        assert_eq!(subs[0].image_seed, 1000);
        assert_eq!(subs[1].image_seed, 1006);
        assert_eq!(subs[2].image_seed, 1008);
        assert!(subs.iter().all(|s| !s.seed_random));
        assert_eq!(subs[0].image_number, 6);
        assert_eq!(subs[2].image_number, 3);
    }

    #[test]
    fn resolved_seed_is_in_range() {
        let params = GenerateParams::default(); // seed_random = true
        for _ in 0..64 {
            let seed = resolve_seed(&params);
            assert!((0..MAX_SEED).contains(&seed));
        }
    }

    #[test]
    fn explicit_seed_is_deterministic() {
        let mut params = GenerateParams::default();
        params.seed_random = false;
        params.image_seed = 777;
        assert_eq!(resolve_seed(&params), 777);
    }

    #[test]
    fn raw_args_are_retargeted_per_sub_task() {
        let base = build_args(&GenerateParams::default());
        let mut sub = GenerateParams::default();
        sub.image_number = 3;
        sub.image_seed = 55;
        sub.seed_random = false;

        let patched = patch_raw_args(&base, &sub);
        assert_eq!(patched[index::IMAGE_NUMBER], json!(3));
        assert_eq!(patched[index::SEED], json!(55));
        assert_eq!(patched[index::SEED_RANDOM], json!(false));
        assert_eq!(patched.len(), base.len());
    }

    // -- Progress merging --

    #[test]
    fn parent_percentage_is_monotonic_max() {
        let mut task = task_with_subs(&[(0, 2), (1, 2)]);

        apply_report(&mut task, 0, report(50));
        assert_eq!(task.percentage, 50);

        // A lower report never decreases the parent.
        apply_report(&mut task, 0, report(30));
        assert_eq!(task.percentage, 50);

        apply_report(&mut task, 1, report(80));
        assert_eq!(task.percentage, 80);
    }

    #[test]
    fn parent_adopts_latest_non_empty_status_text() {
        let mut task = task_with_subs(&[(0, 1), (1, 1)]);

        let mut r = report(10);
        r.status_text = "Loading model".to_string();
        apply_report(&mut task, 0, r);
        assert_eq!(task.status_text, "Loading model");

        apply_report(&mut task, 1, report(20)); // empty status text
        assert_eq!(task.status_text, "Loading model");
    }

    #[test]
    fn out_of_range_percentages_are_clamped() {
        let mut task = task_with_subs(&[(0, 1)]);
        apply_report(&mut task, 0, report(250));
        assert_eq!(task.percentage, 100);

        let mut task = task_with_subs(&[(0, 1)]);
        apply_report(&mut task, 0, report(-5));
        assert_eq!(task.percentage, 0);
    }

    #[test]
    fn sub_task_error_is_collected_once() {
        let mut task = task_with_subs(&[(0, 2)]);
        let mut r = report(0);
        r.error = Some("OOM".to_string());
        apply_report(&mut task, 0, r.clone());
        apply_report(&mut task, 0, r);
        assert_eq!(task.errors.len(), 1);
        assert!(task.errors[0].contains("OOM"));
    }

    // -- Completion --

    #[test]
    fn finalize_concatenates_in_assignment_order() {
        let mut task = task_with_subs(&[(0, 2), (1, 2)]);
        let mut r1 = report(100);
        r1.finished = true;
        r1.results = vec!["b1.png".into(), "b2.png".into()];
        apply_report(&mut task, 1, r1);

        let mut r0 = report(100);
        r0.finished = true;
        r0.results = vec!["a1.png".into(), "a2.png".into()];
        apply_report(&mut task, 0, r0);

        finalize(&mut task);
        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(task.percentage, 100);
        assert_eq!(task.results, vec!["a1.png", "a2.png", "b1.png", "b2.png"]);
        assert_eq!(task.status_text, "Finished (4/4 images)");
        assert!(task.preview.is_none());
    }

    #[test]
    fn finalize_partial_failure_keeps_surviving_results() {
        let mut task = task_with_subs(&[(0, 2), (1, 2)]);
        let mut failed = report(0);
        failed.finished = true;
        failed.error = Some("OOM".to_string());
        apply_report(&mut task, 0, failed);

        let mut ok = report(100);
        ok.finished = true;
        ok.results = vec!["b1.png".into(), "b2.png".into()];
        apply_report(&mut task, 1, ok);

        finalize(&mut task);
        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(task.status_text, "Finished (2/4 images)");
        assert_eq!(task.results, vec!["b1.png", "b2.png"]);
    }

    #[test]
    fn finalize_total_failure_is_error() {
        let mut task = task_with_subs(&[(0, 1)]);
        mark_sub_task_failed(&mut task, 0, "worker exited");
        finalize(&mut task);
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.status_text, "Finished (0/1 images)");
    }

    #[test]
    fn finalize_after_cancel_is_canceled() {
        let mut task = task_with_subs(&[(0, 2)]);
        apply_report(&mut task, 0, report(40));
        task.cancel_requested = true;

        let mut r = report(40);
        r.finished = true;
        r.results = vec!["partial.png".into()];
        apply_report(&mut task, 0, r);

        finalize(&mut task);
        assert_eq!(task.status, TaskStatus::Canceled);
        assert_eq!(task.status_text, "Canceled");
        assert!(task.percentage <= 100);
        assert!(task.preview.is_none());
        assert_eq!(task.results, vec!["partial.png"]);
    }

    // -- Cancel idempotence --

    #[test]
    fn stop_targets_are_collected_once() {
        let mut task = task_with_subs(&[(0, 2), (1, 2)]);
        assert_eq!(collect_stop_targets(&mut task), vec![0, 1]);
        // Second cancel finds nothing left to stop.
        assert!(collect_stop_targets(&mut task).is_empty());
    }

    #[test]
    fn stop_targets_skip_finished_and_unaccepted() {
        let mut task = task_with_subs(&[(0, 1), (1, 1), (2, 1)]);
        task.sub_tasks[0].finished = true;
        task.sub_tasks[1].accepted = false;
        assert_eq!(collect_stop_targets(&mut task), vec![2]);
    }

    #[test]
    fn stop_targets_dedupe_devices() {
        // Two open sub-tasks on the same device yield one stop target.
        let mut task = task_with_subs(&[(0, 1), (0, 1)]);
        assert_eq!(collect_stop_targets(&mut task), vec![0]);
    }

    // -- Terminal updates --

    #[test]
    fn non_terminal_updates_omit_results() {
        let mut task = task_with_subs(&[(0, 1)]);
        let mut r = report(50);
        r.results = vec!["early.png".into()];
        apply_report(&mut task, 0, r);

        let update = task.update();
        assert!(!update.finished);
        assert!(update.results.is_empty());
    }

    #[test]
    fn terminal_update_carries_results_and_finished() {
        let mut task = task_with_subs(&[(0, 1)]);
        let mut r = report(100);
        r.finished = true;
        r.results = vec!["a.png".into()];
        apply_report(&mut task, 0, r);
        finalize(&mut task);

        let update = task.update();
        assert!(update.finished);
        assert_eq!(update.percentage, 100);
        assert_eq!(update.results, vec!["a.png"]);
        assert!(update.preview.is_none());
    }
}
