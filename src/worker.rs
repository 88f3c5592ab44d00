//! Background processing and retention threads
//!
//! Both loops sleep on `recv_timeout` of their shutdown channel, so a stop
//! request wakes them immediately. A batch that is being analyzed when the
//! stop arrives is finished before the thread exits.

use crate::engine::AdvisoryEngine;
use log::{error, info};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handles of the running background threads
pub struct Workers {
    shutdown_senders: Vec<Sender<()>>,
    stopping: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn the processing loop and the retention loop
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned; threads started
    /// before the failure are stopped again.
    pub fn start(engine: Arc<AdvisoryEngine>) -> io::Result<Self> {
        let mut workers = Self {
            shutdown_senders: Vec::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        };

        let poll_interval = engine.config().processing.poll_interval();
        let retention_interval = engine.config().retention.interval();

        if let Err(e) = workers.spawn_processing(Arc::clone(&engine), poll_interval) {
            workers.stop();
            return Err(e);
        }
        if let Err(e) = workers.spawn_retention(engine, retention_interval) {
            workers.stop();
            return Err(e);
        }

        Ok(workers)
    }

    fn spawn_processing(&mut self, engine: Arc<AdvisoryEngine>, interval: Duration) -> io::Result<()> {
        let (tx, rx) = mpsc::channel::<()>();
        let stopping = Arc::clone(&self.stopping);

        let handle = thread::Builder::new()
            .name("advisor-worker".to_string())
            .spawn(move || {
                info!("Processing worker started (poll every {:?})", interval);
                let should_stop = || stopping.load(Ordering::Relaxed);

                loop {
                    engine.run_cycle(&should_stop);

                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }

                info!("Processing worker stopped");
            })?;

        self.shutdown_senders.push(tx);
        self.handles.push(handle);
        Ok(())
    }

    fn spawn_retention(&mut self, engine: Arc<AdvisoryEngine>, interval: Duration) -> io::Result<()> {
        let (tx, rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("advisor-retention".to_string())
            .spawn(move || {
                info!("Retention worker started (every {:?})", interval);

                loop {
                    // Failures are logged by the engine and retried next run
                    let _ = engine.run_retention();

                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }

                info!("Retention worker stopped");
            })?;

        self.shutdown_senders.push(tx);
        self.handles.push(handle);
        Ok(())
    }

    /// Signal every thread to stop and wait for them
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::Relaxed);

        for sender in self.shutdown_senders.drain(..) {
            // A thread that already exited has dropped its receiver
            let _ = sender.send(());
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                error!("Worker thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop();
    }
}
