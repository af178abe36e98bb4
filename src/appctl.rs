use std::sync::{Mutex, PoisonError, atomic::{AtomicBool, Ordering}};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use bus::{Bus, BusReader};
use serde::Serialize;
use uuid::Uuid;

use log::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed { path: PathBuf, count: usize },
    Failed { error: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: &'static str,
    pub texts: usize,
    pub created: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: Uuid,
    pub state: JobState,
}

/// Finished jobs kept for `GET /jobs/{id}` unless configured otherwise.
pub const DEFAULT_JOB_HISTORY: usize = 256;

/// Live jobs are always kept. Finished ones are kept up to `history`,
/// oldest finished evicted first.
#[derive(Default)]
struct JobBoard {
    records: HashMap<Uuid, JobRecord>,
    finished: VecDeque<Uuid>,
    history: usize,
}

impl JobBoard {
    fn finish(&mut self, id: Uuid) {
        self.finished.push_back(id);
        while self.finished.len() > self.history {
            if let Some(oldest) = self.finished.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }
}

/// Process wide control: the liveness flag every worker polls and the board
/// of overflow jobs with a broadcast of their state changes.
pub struct AppCtl {
    alive: AtomicBool,
    jobs: Mutex<JobBoard>,
    job_channel: Mutex<Bus<JobEvent>>,
}

impl AppCtl {
    pub fn new() -> Self {
        Self::with_job_history(DEFAULT_JOB_HISTORY)
    }

    pub fn with_job_history(history: usize) -> Self {
        Self {
            alive: AtomicBool::new(true),
            jobs: Mutex::new(JobBoard {
                history,
                ..Default::default()
            }),
            job_channel: Mutex::new(Bus::new(1000)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    pub fn record_job(&self, record: JobRecord) {
        let event = JobEvent {
            id: record.id,
            state: record.state.clone(),
        };
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .insert(record.id, record);
        self.broadcast_job(event);
    }

    pub fn forget_job(&self, id: &Uuid) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .remove(id);
    }

    pub fn update_job(&self, id: Uuid, state: JobState) {
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            match jobs.records.get_mut(&id) {
                Some(record) => {
                    let was_terminal = record.state.is_terminal();
                    record.state = state.clone();
                    if state.is_terminal() && !was_terminal {
                        jobs.finish(id);
                    }
                }
                None => {
                    warn!("Update for unknown job {}", id);
                    return;
                }
            }
        }
        self.broadcast_job(JobEvent { id, state });
    }

    pub fn job(&self, id: &Uuid) -> Option<JobRecord> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(id)
            .cloned()
    }

    /// Number of job records currently held.
    pub fn job_count(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn listen_jobs(&self) -> BusReader<JobEvent> {
        let mut job_channel = self.job_channel.lock().unwrap_or_else(PoisonError::into_inner);
        job_channel.add_rx()
    }

    fn broadcast_job(&self, event: JobEvent) {
        let mut job_channel = self.job_channel.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(event) = job_channel.try_broadcast(event) {
            warn!("Job listeners are lagging, dropped event for {}", event.id);
        }
    }
}

impl Default for AppCtl {
    fn default() -> Self {
        Self::new()
    }
}
