use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::backup::BackupOrchestrator;
use crate::broadcast::{BroadcastProgress, ProgressBroadcaster};
use crate::context::EngineContext;
use crate::error::WorkerError;
use crate::restore::RestoreOrchestrator;
use crate::worker::task::{Task, TaskResult};

pub struct WorkerPool {
    task_sender: Sender<Task>,
    result_receiver: Receiver<TaskResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads (at least one) that run backup and
    /// restore tasks and publish their progress on `broadcaster`.
    pub fn new(
        ctx: EngineContext,
        broadcaster: ProgressBroadcaster,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (task_sender, task_receiver) = bounded::<Task>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<TaskResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_ctx = ctx.clone();
            let worker_broadcaster = broadcaster.clone();

            let handle = thread::Builder::new()
                .name(format!("docvault-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        result_tx,
                        shutdown_flag,
                        worker_ctx,
                        worker_broadcaster,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, task: Task) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.task_sender
            .send(task)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<TaskResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<TaskResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<Task>,
    result_sender: Sender<TaskResult>,
    shutdown: Arc<AtomicBool>,
    ctx: EngineContext,
    broadcaster: ProgressBroadcaster,
) {
    debug!("Worker {} started", worker_id);

    let backups = BackupOrchestrator::new(ctx.clone());
    let restores = RestoreOrchestrator::new(ctx);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(task) => {
                let task_id = task.id().to_string();
                let kind = task.kind();
                debug!("Worker {} running {} {}", worker_id, kind.as_str(), task_id);

                let progress = BroadcastProgress::new(broadcaster.start_task(&task_id, kind));

                let outcome = match &task {
                    Task::Backup { job_id, .. } => backups.run(job_id, &progress).map(|_| ()),
                    Task::Restore { log_id, .. } => restores.run(log_id, &progress).map(|_| ()),
                };
                // Releases the lease before anyone can observe the result.
                drop(task);

                let result = match outcome {
                    Ok(()) => TaskResult::success(&task_id, kind),
                    Err(e) => TaskResult::failure(&task_id, kind, e.to_string()),
                };

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
