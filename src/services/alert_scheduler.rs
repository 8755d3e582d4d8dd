//! Periodic alert evaluation loop.
//!
//! Runs `evaluate_all` every `interval_seconds` (default 600). `start`,
//! `stop` and `destroy` are all idempotent; the loop also honors the global
//! shutdown channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::services::alert_evaluator::AlertEvaluator;

pub struct AlertScheduler {
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AlertScheduler {
    pub fn new(evaluator: Arc<AlertEvaluator>, interval_seconds: u64) -> Self {
        Self {
            evaluator,
            interval: Duration::from_secs(interval_seconds.max(1)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the evaluation loop. A second call while running is a no-op.
    pub fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let evaluator = self.evaluator.clone();
        let running = self.running.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Alert scheduler started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        let fired = evaluator.evaluate_all().await;
                        if fired > 0 {
                            tracing::info!(fired, "Alert evaluation cycle completed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            running.store(false, Ordering::SeqCst);
            tracing::info!("Alert scheduler stopped");
        });

        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Signal the loop to stop after the current sleep. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop and abort the background task. Idempotent.
    pub fn destroy(&self) {
        self.stop();
        if let Ok(mut slot) = self.handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AlertScheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}
