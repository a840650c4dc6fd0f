//! Dedicated engine threads.
//!
//! Each engine runs on its own OS thread with a current-thread tokio runtime.
//! The thread reports readiness once its listener is bound, and runs until
//! the owning [`EngineThread`] asks it to shut down. Dropping the runtime at
//! the end of the thread cancels every connection task the engine spawned.

use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Resolves once the owning engine has been asked to shut down.
///
/// Also resolves if the [`EngineThread`] is dropped without an explicit
/// shutdown, so a serve loop never outlives its owner.
pub struct ShutdownSignal(oneshot::Receiver<()>);

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// One-shot readiness report from the engine thread back to its starter.
pub struct Ready(oneshot::Sender<Result<()>>);

impl Ready {
    /// Report that the engine is accepting connections.
    pub fn ok(self) {
        let _ = self.0.send(Ok(()));
    }

    /// Report that the engine failed to come up.
    pub fn fail(self, error: Error) {
        let _ = self.0.send(Err(error));
    }
}

/// Handle to a running engine thread
pub struct EngineThread {
    name: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl EngineThread {
    /// Spawn a named engine thread and wait until it reports readiness.
    ///
    /// `serve` runs inside the thread's runtime. It must call [`Ready::ok`]
    /// or [`Ready::fail`] exactly once, then keep serving until the
    /// [`ShutdownSignal`] resolves.
    pub async fn spawn<F, Fut>(name: impl Into<String>, serve: F) -> Result<Self>
    where
        F: FnOnce(Ready, ShutdownSignal) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let name = name.into();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Runtime(e.to_string())));
                        return;
                    }
                };
                runtime.block_on(serve(Ready(ready_tx), ShutdownSignal(shutdown_rx)));
            })?;

        let mut thread = Self {
            name,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                debug!("Engine thread {} is ready", thread.name);
                Ok(thread)
            }
            Ok(Err(e)) => {
                thread.stop_blocking();
                Err(e)
            }
            Err(_) => {
                thread.stop_blocking();
                Err(Error::Runtime(format!(
                    "engine thread {} exited before becoming ready",
                    thread.name
                )))
            }
        }
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the engine to stop and wait for its thread to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(signal) = self.shutdown.take() {
            let _ = signal.send(());
        }

        let Some(join) = self.join.take() else {
            return Ok(());
        };

        let name = self.name.clone();
        let joined = tokio::task::spawn_blocking(move || join.join())
            .await
            .map_err(|e| Error::Runtime(format!("failed to join {}: {}", name, e)))?;
        joined.map_err(|_| Error::Runtime(format!("engine thread {} panicked", self.name)))?;

        debug!("Engine thread {} joined", self.name);
        Ok(())
    }

    fn stop_blocking(&mut self) {
        if let Some(signal) = self.shutdown.take() {
            let _ = signal.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Engine thread {} panicked during shutdown", self.name);
            }
        }
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        if self.join.is_some() {
            debug!("Engine thread {} dropped while running, stopping it", self.name);
            self.stop_blocking();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let thread = EngineThread::spawn("test-engine", move |ready, shutdown| async move {
            ready.ok();
            shutdown.await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(thread.name(), "test-engine");
        assert!(!finished.load(Ordering::SeqCst));

        thread.shutdown().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_readiness_is_reported() {
        let result = EngineThread::spawn("failing-engine", |ready, _shutdown| async move {
            ready.fail(Error::Runtime("boom".to_string()));
        })
        .await;

        match result {
            Err(Error::Runtime(message)) => assert_eq!(message, "boom"),
            _ => panic!("Expected runtime error"),
        }
    }

    #[tokio::test]
    async fn test_thread_exiting_without_report() {
        let result = EngineThread::spawn("silent-engine", |ready, _shutdown| async move {
            drop(ready);
        })
        .await;

        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_drop_stops_thread() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let thread = EngineThread::spawn("dropped-engine", move |ready, shutdown| async move {
            ready.ok();
            shutdown.await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();

        drop(thread);
        assert!(finished.load(Ordering::SeqCst));
    }
}
