use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use uuid::Uuid;

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use log::*;

use crate::appctl::{AppCtl, JobRecord, JobState};
use crate::pipeline::{Pipeline, Task};
use crate::registry::ModelRegistry;
use crate::{Error, CHUNK_SIZE, RX_TIMEOUT};

#[derive(Debug, Clone)]
pub struct OverflowJob {
    pub id: Uuid,
    pub task: Task,
    pub texts: Vec<String>,
    pub destination: PathBuf,
}

/// `{kind}_full_batch_{timestamp}.json` with the colons of the timestamp
/// swapped for dashes.
pub fn full_batch_filename(kind: &str, at: DateTime<Local>) -> String {
    let timestamp = at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string().replace(':', "-");
    format!("{}_full_batch_{}.json", kind, timestamp)
}

/// Runs every text through `pipeline` in chunks of `CHUNK_SIZE` and writes the
/// concatenated predictions, in input order, as one json array. Returns the
/// path written and the number of predictions.
///
/// The array goes to a uniquely named `.part` file first and is linked into
/// place, so the destination only exists once the whole job has succeeded.
/// An existing file is never replaced: the output then lands in
/// `<stem>-1.json`, `<stem>-2.json` and so on.
pub fn process_full_batch(
    pipeline: &dyn Pipeline,
    texts: &[String],
    destination: &Path,
) -> Result<(PathBuf, usize), Error> {
    let mut results = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(CHUNK_SIZE) {
        let predictions = pipeline.predict(chunk)?;
        if predictions.len() != chunk.len() {
            return Err(Error::Inference(format!(
                "model returned {} predictions for {} texts",
                predictions.len(),
                chunk.len()
            )));
        }
        results.extend(predictions);
    }

    let stem = file_stem(destination);
    let partial = scopeguard::guard(
        destination.with_file_name(format!("{}.{}.part", stem, Uuid::new_v4())),
        |partial| match fs::remove_file(&partial) {
            Err(error) if error.kind() != ErrorKind::NotFound => {
                warn!("Unable to remove {}: {}", partial.display(), error)
            }
            _ => {}
        },
    );
    {
        let mut writer = BufWriter::new(File::create(&*partial)?);
        serde_json::to_writer(&mut writer, &results)?;
        writer.flush()?;
    }
    let path = publish(&partial, destination)?;
    Ok((path, results.len()))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hard links `partial` under the first free name starting at `destination`.
fn publish(partial: &Path, destination: &Path) -> Result<PathBuf, Error> {
    let stem = file_stem(destination);
    let extension = destination
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut candidate = destination.to_path_buf();
    let mut attempt = 0;
    loop {
        match fs::hard_link(partial, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                candidate = destination.with_file_name(format!("{}-{}{}", stem, attempt, extension));
                debug!("{} exists, trying {}", destination.display(), candidate.display());
            }
            Err(error) => return Err(error.into()),
        }
    }
}

/// Fixed set of threads draining a bounded queue of overflow jobs.
pub struct OverflowPool {
    sender: Sender<OverflowJob>,
    processed_dir: PathBuf,
    appctl: Arc<AppCtl>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OverflowPool {
    pub fn start(
        workers: usize,
        queue: usize,
        processed_dir: impl Into<PathBuf>,
        registry: Arc<ModelRegistry>,
        appctl: Arc<AppCtl>,
    ) -> Result<Self, Error> {
        let (sender, receiver) = bounded::<OverflowJob>(queue);
        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let jobs = receiver.clone();
            let registry = registry.clone();
            let worker_ctl = appctl.clone();
            let handle = std::thread::Builder::new()
                .name(format!("overflow-{}", n))
                .spawn(move || run_worker(jobs, &registry, &worker_ctl))?;
            handles.push(handle);
        }

        Ok(Self {
            sender,
            processed_dir: processed_dir.into(),
            appctl,
            workers: Mutex::new(handles),
        })
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Queues the whole of `texts` for background processing. Never blocks:
    /// a full queue drops the job and reports `QueueFull`.
    pub fn submit(&self, task: Task, texts: Vec<String>) -> Result<Uuid, Error> {
        if !self.appctl.is_alive() {
            return Err(Error::PoolClosed);
        }
        let job = OverflowJob {
            id: Uuid::new_v4(),
            task,
            destination: self
                .processed_dir
                .join(full_batch_filename(task.kind(), Local::now())),
            texts,
        };
        let id = job.id;

        self.appctl.record_job(JobRecord {
            id,
            kind: task.kind(),
            texts: job.texts.len(),
            created: crate::iso_timestamp(),
            state: JobState::Queued,
        });

        match self.sender.try_send(job) {
            Ok(()) => {
                info!("Scheduled full {} batch as job {}", task, id);
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.appctl.forget_job(&id);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.appctl.forget_job(&id);
                Err(Error::PoolClosed)
            }
        }
    }

    /// Waits for the workers to notice the stop flag and finish their job.
    pub fn shutdown(&self) {
        self.appctl.stop();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Overflow worker panicked");
            }
        }
        let abandoned = self.sender.len();
        if abandoned > 0 {
            warn!("{} queued overflow jobs abandoned at shutdown", abandoned);
        }
    }
}

fn run_worker(jobs: Receiver<OverflowJob>, registry: &ModelRegistry, appctl: &AppCtl) {
    while appctl.is_alive() {
        match jobs.recv_timeout(RX_TIMEOUT) {
            Ok(job) => run_job(&job, registry, appctl),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Overflow worker: Shutting down");
}

fn run_job(job: &OverflowJob, registry: &ModelRegistry, appctl: &AppCtl) {
    appctl.update_job(job.id, JobState::Running);
    info!(
        "Processing full batch of {} texts for {} analysis",
        job.texts.len(),
        job.task
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        registry
            .ensure_loaded(job.task)
            .and_then(|pipeline| process_full_batch(pipeline.as_ref(), &job.texts, &job.destination))
    }))
    .unwrap_or_else(|_| Err(Error::Inference("overflow job panicked".to_string())));

    match outcome {
        Ok((path, count)) => {
            info!("Full batch processing completed and saved to {}", path.display());
            appctl.update_job(job.id, JobState::Completed { path, count });
        }
        Err(error) => {
            error!("Error in background processing of job {}: {}", job.id, error);
            appctl.update_job(
                job.id,
                JobState::Failed {
                    error: error.to_string(),
                },
            );
        }
    }
}
