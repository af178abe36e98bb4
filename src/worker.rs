use crossbeam_channel::{bounded, unbounded, Sender};

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::*;

use crate::pipeline::{Pipeline, Prediction, Task};
use crate::Error;

/// A model that only ever lives on its own thread.
pub trait Predictor {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error>;
}

struct WorkRequest {
    texts: Vec<String>,
    reply: Sender<Result<Vec<Prediction>, Error>>,
}

/// Handle to a model running on a dedicated thread. The model is built on
/// that thread and never leaves it; requests and replies go over channels.
pub struct ModelWorker {
    task: Task,
    requests: Sender<WorkRequest>,
}

impl ModelWorker {
    /// Spawns the thread and waits until `build` has finished. Build errors
    /// are returned here and the thread exits.
    pub fn spawn<P, F>(task: Task, build: F) -> Result<Self, Error>
    where
        P: Predictor,
        F: FnOnce() -> Result<P, Error> + Send + 'static,
    {
        let (send_request, get_request) = unbounded::<WorkRequest>();
        let (send_ready, get_ready) = bounded::<Result<(), Error>>(1);

        std::thread::Builder::new()
            .name(format!("{}-model", task))
            .spawn(move || {
                let model = match build() {
                    Ok(model) => model,
                    Err(error) => {
                        let _ = send_ready.send(Err(error));
                        return;
                    }
                };
                if send_ready.send(Ok(())).is_err() {
                    return;
                }
                debug!("{} model: Ready", task);

                while let Ok(WorkRequest { texts, reply }) = get_request.recv() {
                    let outcome = catch_unwind(AssertUnwindSafe(|| model.predict(&texts)))
                        .unwrap_or_else(|_| {
                            Err(Error::Inference(format!("{} model panicked", task)))
                        });
                    if reply.send(outcome).is_err() {
                        debug!("{} model: Caller went away before the reply", task);
                    }
                }
                debug!("{} model: Shutting down", task);
            })?;

        match get_ready.recv() {
            Ok(Ok(())) => Ok(Self {
                task,
                requests: send_request,
            }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(Error::ModelLoad(
                task,
                "model thread exited during setup".to_string(),
            )),
        }
    }
}

impl Pipeline for ModelWorker {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
        let (reply, answer) = bounded(1);
        self.requests
            .send(WorkRequest {
                texts: texts.to_vec(),
                reply,
            })
            .map_err(|_| Error::WorkerGone(self.task))?;
        answer.recv().map_err(|_| Error::WorkerGone(self.task))?
    }
}
