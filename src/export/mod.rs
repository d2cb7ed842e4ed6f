//! Chart and report export.
//!
//! Rendering is blocking work and runs on tokio's blocking pool. Each export
//! kind owns an [`ExportSlot`] that allows a single in-flight task; the slot
//! can be awaited or cancelled while the caller keeps serving commands.
//!
//! Cancellation is cooperative. The slot raises the request's [`CancelFlag`]
//! and stays busy until the exporter returns; exporters check the flag around
//! their blocking work and remove any partial output.

pub mod chart;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use crate::aggregate::ViewMode;
use crate::errors::ExportError;
use crate::history::Record;

pub use chart::{CHART_FILE_NAME, ChartExporter};
pub use pdf::{PDF_FILE_NAME, PdfExporter};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation signal between an [`ExportSlot`] and its running task.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelFlag::cancel`] has been called.
    pub async fn cancelled(&self) {
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Fails with [`ExportError::Cancelled`] when the flag is raised.
    pub fn check(&self, kind: &'static str) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(ExportError::Cancelled(kind).into());
        }
        Ok(())
    }

    /// Like [`CancelFlag::check`], but also deletes `output` if it was cancelled.
    pub fn check_written(&self, kind: &'static str, output: &Path) -> anyhow::Result<()> {
        if self.is_cancelled() {
            match std::fs::remove_file(output) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Err(ExportError::Cancelled(kind).into());
        }
        Ok(())
    }
}

/// Everything an exporter needs, detached from the live history.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub records: Vec<Record>,
    pub mode: ViewMode,
    pub output_dir: PathBuf,
    /// Replaced with the slot's own flag when the request is started.
    pub cancel: CancelFlag,
}

impl ExportRequest {
    pub fn new(records: &[Record], mode: ViewMode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            records: records.to_vec(),
            mode,
            output_dir: output_dir.into(),
            cancel: CancelFlag::new(),
        }
    }
}

/// A long-running rendering job producing one file.
#[async_trait]
pub trait Exporter: Send + Sync + 'static {
    /// Short name used in logs and errors ("chart", "pdf").
    fn kind(&self) -> &'static str;

    /// Renders the request and returns the path written.
    ///
    /// Must return early once `request.cancel` is raised, leaving no file
    /// behind.
    async fn export(&self, request: ExportRequest) -> anyhow::Result<PathBuf>;
}

/// Holds at most one in-flight task for a given exporter.
pub struct ExportSlot<E: Exporter> {
    exporter: Arc<E>,
    in_flight: Option<JoinHandle<anyhow::Result<PathBuf>>>,
    cancel: CancelFlag,
}

impl<E: Exporter> ExportSlot<E> {
    pub fn new(exporter: E) -> Self {
        Self {
            exporter: Arc::new(exporter),
            in_flight: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.exporter.kind()
    }

    /// `true` while a started task has not finished yet, cancelled or not.
    pub fn is_busy(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// `true` when a task has finished and its result is waiting to be taken.
    pub fn is_ready(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Starts an export in the background.
    ///
    /// Refused with [`ExportError::Busy`] while another task of this kind is
    /// running. A finished but uncollected result is dropped.
    pub fn start(&mut self, mut request: ExportRequest) -> Result<(), ExportError> {
        let kind = self.kind();
        if self.is_busy() {
            return Err(ExportError::Busy(kind));
        }
        if request.records.is_empty() {
            return Err(ExportError::NothingToExport);
        }

        self.cancel = CancelFlag::new();
        request.cancel = self.cancel.clone();
        let exporter = Arc::clone(&self.exporter);
        let span = tracing::info_span!("export", kind, records = request.records.len());
        info!(kind, mode = %request.mode, "Export started");
        self.in_flight = Some(tokio::spawn(
            async move { exporter.export(request).await }.instrument(span),
        ));
        Ok(())
    }

    /// Waits for the in-flight task, if any, and returns its outcome.
    pub async fn wait(&mut self) -> Option<Result<PathBuf, ExportError>> {
        let handle = self.in_flight.take()?;
        let kind = self.kind();

        let outcome = match handle.await {
            Ok(Ok(path)) => {
                info!(kind, path = %path.display(), "Export finished");
                Ok(path)
            }
            Ok(Err(_)) if self.cancel.is_cancelled() => Err(ExportError::Cancelled(kind)),
            Ok(Err(source)) => Err(ExportError::Failed { kind, source }),
            Err(e) if e.is_cancelled() => Err(ExportError::Cancelled(kind)),
            Err(e) => Err(ExportError::Failed {
                kind,
                source: anyhow::anyhow!("export task panicked: {e}"),
            }),
        };

        if let Err(e) = &outcome {
            error!(kind, error = %e, "Export did not complete");
        }
        Some(outcome)
    }

    /// Starts an export and waits for it.
    pub async fn run(&mut self, request: ExportRequest) -> Result<PathBuf, ExportError> {
        self.start(request)?;
        match self.wait().await {
            Some(outcome) => outcome,
            None => Err(ExportError::Cancelled(self.kind())),
        }
    }

    /// Asks the in-flight task to stop. Returns `false` if nothing was running.
    ///
    /// The slot stays busy until the task has actually returned.
    pub fn cancel(&mut self) -> bool {
        match &self.in_flight {
            Some(handle) if !handle.is_finished() && !self.cancel.is_cancelled() => {
                self.cancel.cancel();
                info!(kind = self.kind(), "Export cancellation requested");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{History, Origin};
    use tokio::sync::Notify;

    struct GatedExporter {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Exporter for GatedExporter {
        fn kind(&self) -> &'static str {
            "gated"
        }

        async fn export(&self, request: ExportRequest) -> anyhow::Result<PathBuf> {
            tokio::select! {
                _ = self.gate.notified() => Ok(request.output_dir.join("done")),
                _ = request.cancel.cancelled() => Err(ExportError::Cancelled(self.kind()).into()),
            }
        }
    }

    /// Writes its file from the blocking pool after a delay.
    struct SlowFileExporter;

    #[async_trait]
    impl Exporter for SlowFileExporter {
        fn kind(&self) -> &'static str {
            "slow"
        }

        async fn export(&self, request: ExportRequest) -> anyhow::Result<PathBuf> {
            let path = request.output_dir.join("slow.txt");
            let target = path.clone();
            let cancel = request.cancel.clone();
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(std::time::Duration::from_millis(200));
                std::fs::write(&target, b"late")?;
                cancel.check_written("slow", &target)
            })
            .await??;
            Ok(path)
        }
    }

    struct FailingExporter;

    #[async_trait]
    impl Exporter for FailingExporter {
        fn kind(&self) -> &'static str {
            "failing"
        }

        async fn export(&self, _request: ExportRequest) -> anyhow::Result<PathBuf> {
            anyhow::bail!("renderer exploded")
        }
    }

    fn request() -> ExportRequest {
        let history = History::new().append(Some("a"), Some("X"), 10.0, Origin::Manual);
        ExportRequest::new(history.records(), ViewMode::ByPlot, "out")
    }

    #[tokio::test]
    async fn test_second_start_is_busy() {
        let gate = Arc::new(Notify::new());
        let mut slot = ExportSlot::new(GatedExporter { gate: gate.clone() });

        slot.start(request()).unwrap();
        assert!(slot.is_busy());
        assert!(matches!(slot.start(request()), Err(ExportError::Busy("gated"))));

        gate.notify_one();
        let path = slot.wait().await.unwrap().unwrap();
        assert_eq!(path, PathBuf::from("out").join("done"));
        assert!(!slot.is_busy());

        // slot is free again
        slot.start(request()).unwrap();
        gate.notify_one();
        assert!(slot.wait().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let gate = Arc::new(Notify::new());
        let mut slot = ExportSlot::new(GatedExporter { gate });

        slot.start(request()).unwrap();
        assert!(slot.cancel());
        assert!(!slot.cancel(), "already cancelling");

        let outcome = slot.wait().await.unwrap();
        assert!(matches!(outcome, Err(ExportError::Cancelled("gated"))));
        assert!(!slot.cancel());
    }

    #[tokio::test]
    async fn test_cancel_leaves_no_file_and_stays_busy() {
        let dir = std::env::temp_dir().join("harvest_yield_test_cancel_slow");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("slow.txt");
        let _ = std::fs::remove_file(&path);

        let history = History::new().append(Some("a"), Some("X"), 10.0, Origin::Manual);
        let mut slot = ExportSlot::new(SlowFileExporter);
        slot.start(ExportRequest::new(history.records(), ViewMode::ByPlot, &dir))
            .unwrap();
        assert!(slot.cancel());

        // blocking work is still running, so a second export must wait
        assert!(slot.is_busy());
        assert!(matches!(
            slot.start(ExportRequest::new(history.records(), ViewMode::ByPlot, &dir)),
            Err(ExportError::Busy("slow"))
        ));

        let outcome = slot.wait().await.unwrap();
        assert!(matches!(outcome, Err(ExportError::Cancelled("slow"))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let mut slot = ExportSlot::new(FailingExporter);
        let outcome = slot.run(request()).await;

        match outcome {
            Err(ExportError::Failed { kind, source }) => {
                assert_eq!(kind, "failing");
                assert!(source.to_string().contains("renderer exploded"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_history_is_refused() {
        let mut slot = ExportSlot::new(FailingExporter);
        let empty = ExportRequest::new(&[], ViewMode::ByPlot, "out");

        assert!(matches!(slot.start(empty), Err(ExportError::NothingToExport)));
        assert!(slot.wait().await.is_none());
    }
}
