//! Reconciliation Driver
//!
//! Runs one operation against the control plane and follows the external
//! controller until the target object converges:
//!
//! ```text
//!   Init ──apply──► (warm-up) ──► Polling ──┬──► Ready
//!                                  ▲   │    ├──► Error
//!                                  └───┘    └──► TimedOut
//!                              tick + log scan
//! ```
//!
//! Every control plane failure ends the run immediately.

use super::logtail::{LogCursor, LogTailFilter};
use super::operation::Operation;
use super::sink::{Outcome, ReadyReport, ReconcileHandle, ResultSink};
use crate::domain::ports::{
    ControlPlaneClient, ControlPlaneClientRef, ReconciliationState, ResourceKind,
    StatusClassifierRef,
};
use crate::engine::{Engine, EngineRef};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Delay between applying a manifest and the first status check
pub const WARMUP: Duration = Duration::from_secs(15);

/// Delay between status checks
pub const TICK: Duration = Duration::from_millis(500);

/// Status checks before a run times out
pub const MAX_TICKS: u32 = 1200;

// =============================================================================
// Driver
// =============================================================================

#[derive(Clone)]
pub struct ReconciliationDriver {
    client: ControlPlaneClientRef,
    metrics: Option<Arc<Metrics>>,
}

impl ReconciliationDriver {
    pub fn new(client: ControlPlaneClientRef) -> Self {
        Self {
            client,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `operation` as a background task
    pub fn spawn(&self, engine: EngineRef, operation: Operation) -> ReconcileHandle {
        let (sink, handle) = ResultSink::channel();
        let driver = self.clone();
        tokio::spawn(async move {
            driver.run(engine, operation, sink).await;
        });
        handle
    }

    /// Run `operation` to its terminal state, reporting through `sink`
    pub async fn run(&self, engine: EngineRef, operation: Operation, sink: ResultSink) {
        let started = Instant::now();
        let verb = operation.verb();
        info!(
            "Starting {} of {} {} with engine {} {}",
            verb,
            operation.target(),
            target_kind(&*engine, &operation),
            engine.name(),
            engine.version()
        );

        let (outcome, mut phase) = {
            let mut run = Run {
                client: &*self.client,
                engine: &*engine,
                sink: &sink,
                metrics: self.metrics.as_deref(),
                phase: Phase::new(target_kind(&*engine, &operation), operation.target()),
                cursor: LogCursor::starting_now(),
            };
            let outcome = run.execute(&operation).await;
            (outcome, run.phase)
        };

        let terminal = match &outcome {
            Ok(_) => ReconciliationState::Ready,
            Err(Error::ReconciliationTimedOut { .. }) => ReconciliationState::TimedOut,
            Err(_) => ReconciliationState::Error,
        };
        if let Err(e) = phase.enter(terminal) {
            error!("{}", e);
        }
        match &outcome {
            Ok(report) => info!("{} of {}/{} is ready", verb, report.kind, report.name),
            Err(e) => warn!("{} of {} ended: {}", verb, operation.target(), e),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_run(verb, &terminal.to_string(), started.elapsed());
        }
        sink.finish(outcome);
    }
}

fn target_kind<'e>(engine: &'e dyn Engine, operation: &Operation) -> &'e ResourceKind {
    match operation {
        Operation::Backup(_) => engine.backup_kind(),
        Operation::Restore(_) => engine.restore_kind(),
        _ => engine.cluster_kind(),
    }
}

fn join_overrides(layers: &[&str]) -> String {
    layers
        .iter()
        .map(|layer| layer.trim())
        .filter(|layer| !layer.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Phase Tracking
// =============================================================================

/// Current state of one run. Nothing follows a terminal state.
#[derive(Debug)]
struct Phase {
    target: String,
    state: ReconciliationState,
}

impl Phase {
    fn new(kind: &ResourceKind, name: &str) -> Self {
        Self {
            target: format!("{}/{}", kind, name),
            state: ReconciliationState::Init,
        }
    }

    fn enter(&mut self, next: ReconciliationState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Internal(format!(
                "{} is already {}, refusing to move to {}",
                self.target, self.state, next
            )));
        }
        if self.state != next {
            debug!("{}: {} -> {}", self.target, self.state, next);
        }
        self.state = next;
        Ok(())
    }
}

// =============================================================================
// Run
// =============================================================================

struct Run<'a> {
    client: &'a dyn ControlPlaneClient,
    engine: &'a dyn Engine,
    sink: &'a ResultSink,
    metrics: Option<&'a Metrics>,
    phase: Phase,
    cursor: LogCursor,
}

impl Run<'_> {
    async fn execute(&mut self, operation: &Operation) -> Outcome {
        let engine = self.engine;
        let cluster_kind = engine.cluster_kind();
        let controller = engine.controller();

        match operation {
            Operation::Create(spec) => {
                self.ensure_prerequisites().await?;
                self.ensure_absent(cluster_kind, &spec.name).await?;
                let manifest = engine.create_manifest(&spec.name, &spec.options)?;
                self.client.apply(&manifest).await?;
                self.poll(
                    cluster_kind,
                    &spec.name,
                    engine.cluster_classifier(),
                    &controller.cluster_controller,
                )
                .await
            }
            Operation::Edit(spec) => {
                self.ensure_prerequisites().await?;
                let current = self.fetch_existing(cluster_kind, &spec.name).await?;
                let manifest = engine.edit_manifest(&current, &spec.options)?;
                self.client.apply(&manifest).await?;
                self.poll(
                    cluster_kind,
                    &spec.name,
                    engine.cluster_classifier(),
                    &controller.cluster_controller,
                )
                .await
            }
            Operation::Upgrade(spec) => {
                let version_overrides = engine.upgrade_overrides(&spec.version)?;
                let overrides = join_overrides(&[&version_overrides, &spec.options]);
                self.ensure_prerequisites().await?;
                let current = self.fetch_existing(cluster_kind, &spec.name).await?;
                let manifest = engine.edit_manifest(&current, &overrides)?;
                self.client.apply(&manifest).await?;
                self.poll(
                    cluster_kind,
                    &spec.name,
                    engine.cluster_classifier(),
                    &controller.cluster_controller,
                )
                .await
            }
            Operation::Delete(spec) => {
                self.fetch_existing(cluster_kind, &spec.name).await?;
                self.client.delete(cluster_kind, &spec.name).await?;
                self.poll_until_gone(cluster_kind, &spec.name).await
            }
            Operation::Backup(spec) => {
                let kind = engine.backup_kind();
                self.fetch_existing(cluster_kind, &spec.cluster).await?;
                self.ensure_absent(kind, &spec.backup_name).await?;
                let manifest = engine.backup_manifest(&spec.cluster, &spec.backup_name, &spec.storage)?;
                self.client.apply(&manifest).await?;
                self.poll(
                    kind,
                    &spec.backup_name,
                    engine.job_classifier(),
                    &controller.backup_controller,
                )
                .await
            }
            Operation::Restore(spec) => {
                let kind = engine.restore_kind();
                self.fetch_existing(cluster_kind, &spec.cluster).await?;
                self.ensure_absent(kind, &spec.restore_name).await?;
                let manifest =
                    engine.restore_manifest(&spec.cluster, &spec.restore_name, &spec.backup_name)?;
                self.client.apply(&manifest).await?;
                self.poll(
                    kind,
                    &spec.restore_name,
                    engine.job_classifier(),
                    &controller.restore_controller,
                )
                .await
            }
        }
    }

    /// Apply the engine bundle, accepting objects somebody else installed
    async fn ensure_prerequisites(&self) -> Result<()> {
        for document in self.engine.bundle() {
            match self.client.apply(document).await {
                Ok(()) => {}
                Err(e) if e.is_tolerated_for_prerequisite() => {
                    warn!("Prerequisite already present or not ours to manage: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn ensure_absent(&self, kind: &ResourceKind, name: &str) -> Result<()> {
        match self.client.get(kind, name).await? {
            Some(_) => Err(Error::AlreadyExists {
                kind: kind.kind.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn fetch_existing(&self, kind: &ResourceKind, name: &str) -> Result<Vec<u8>> {
        self.client
            .get(kind, name)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: kind.kind.clone(),
                name: name.to_string(),
            })
    }

    /// Wait out the warm-up, then check status once per tick
    async fn poll(
        &mut self,
        kind: &ResourceKind,
        name: &str,
        classifier: StatusClassifierRef,
        controller_id: &str,
    ) -> Outcome {
        sleep(WARMUP).await;
        self.phase.enter(ReconciliationState::Polling)?;
        let filter = LogTailFilter::new(controller_id, name);

        for tick in 1..=MAX_TICKS {
            let status = self.fetch_existing(kind, name).await?;
            let classification = classifier.classify(&status)?;
            debug!("{}/{} tick {}: {}", kind, name, tick, classification.state);

            match classification.state {
                ReconciliationState::Ready => {
                    return Ok(ReadyReport {
                        kind: kind.kind.clone(),
                        name: name.to_string(),
                        messages: classification.messages,
                    });
                }
                ReconciliationState::Error => {
                    return Err(Error::ReconciliationError {
                        kind: kind.kind.clone(),
                        name: name.to_string(),
                        messages: classification.messages,
                    });
                }
                _ => {}
            }

            self.forward_diagnostics(&filter).await?;
            sleep(TICK).await;
        }

        Err(Error::ReconciliationTimedOut {
            kind: kind.kind.clone(),
            name: name.to_string(),
            ticks: MAX_TICKS,
        })
    }

    /// Check once per tick until the object is gone
    async fn poll_until_gone(&mut self, kind: &ResourceKind, name: &str) -> Outcome {
        self.phase.enter(ReconciliationState::Polling)?;
        let filter = LogTailFilter::new(&self.engine.controller().cluster_controller, name);

        for tick in 1..=MAX_TICKS {
            if self.client.get(kind, name).await?.is_none() {
                return Ok(ReadyReport {
                    kind: kind.kind.clone(),
                    name: name.to_string(),
                    messages: vec![format!("{} {} deleted", kind, name)],
                });
            }
            debug!("{}/{} tick {}: still terminating", kind, name, tick);
            self.forward_diagnostics(&filter).await?;
            sleep(TICK).await;
        }

        Err(Error::ReconciliationTimedOut {
            kind: kind.kind.clone(),
            name: name.to_string(),
            ticks: MAX_TICKS,
        })
    }

    async fn forward_diagnostics(&mut self, filter: &LogTailFilter) -> Result<()> {
        let log = self
            .client
            .logs(&self.engine.controller().label_selector)
            .await?;
        for diagnostic in filter.scan(&log, &mut self.cursor) {
            if let Some(metrics) = self.metrics {
                metrics.record_diagnostic(&diagnostic.level.to_string());
            }
            self.sink.diagnostic(diagnostic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{Classification, DiagnosticLevel, StatusClassifier};
    use crate::engine::ControllerRef;
    use crate::model::PxcClusterSpec;
    use crate::options::OptionIndex;
    use crate::reconcile::operation::{
        BackupSpec, CreateSpec, DeleteSpec, EditSpec, RestoreSpec, UpgradeSpec,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    const CONTROLLER: &str = "widget-controller";

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    fn api_error(code: u16, reason: &str) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: reason.into(),
            reason: reason.into(),
            code,
        }))
    }

    #[derive(Default)]
    struct FakeControlPlane {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        applied: Mutex<Vec<String>>,
        rejected_kinds: Mutex<HashMap<String, (u16, &'static str)>>,
        terminating: Mutex<HashMap<String, u32>>,
        log: Mutex<String>,
        fail_get: AtomicBool,
    }

    impl FakeControlPlane {
        fn insert(&self, kind: &str, name: &str) {
            self.objects
                .lock()
                .unwrap()
                .insert(format!("{}/{}", kind, name), b"{}".to_vec());
        }

        fn reject(&self, kind: &str, code: u16, reason: &'static str) {
            self.rejected_kinds
                .lock()
                .unwrap()
                .insert(kind.to_string(), (code, reason));
        }

        fn applied_kinds(&self) -> Vec<String> {
            self.applied
                .lock()
                .unwrap()
                .iter()
                .map(|doc| {
                    let value: serde_yaml::Value = serde_yaml::from_str(doc).unwrap();
                    value["kind"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    #[async_trait]
    impl ControlPlaneClient for FakeControlPlane {
        async fn apply(&self, manifest: &str) -> Result<()> {
            let value: serde_yaml::Value = serde_yaml::from_str(manifest)?;
            let kind = value["kind"].as_str().unwrap_or_default().to_string();
            let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
            if let Some((code, reason)) = self.rejected_kinds.lock().unwrap().get(&kind) {
                return Err(api_error(*code, reason));
            }
            self.applied.lock().unwrap().push(manifest.to_string());
            self.insert(&kind, &name);
            Ok(())
        }

        async fn get(&self, kind: &ResourceKind, name: &str) -> Result<Option<Vec<u8>>> {
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(Error::ControlPlane("connection refused".into()));
            }
            let key = format!("{}/{}", kind.kind, name);
            let mut terminating = self.terminating.lock().unwrap();
            if let Some(remaining) = terminating.get_mut(&key) {
                if *remaining == 0 {
                    terminating.remove(&key);
                    self.objects.lock().unwrap().remove(&key);
                } else {
                    *remaining -= 1;
                }
            }
            Ok(self.objects.lock().unwrap().get(&key).cloned())
        }

        async fn delete(&self, kind: &ResourceKind, name: &str) -> Result<()> {
            self.terminating
                .lock()
                .unwrap()
                .insert(format!("{}/{}", kind.kind, name), 3);
            Ok(())
        }

        async fn logs(&self, controller_label: &str) -> Result<Vec<u8>> {
            assert_eq!(controller_label, "name=widget-operator");
            Ok(self.log.lock().unwrap().clone().into_bytes())
        }
    }

    /// Returns scripted classifications, then repeats the fallback
    struct ScriptedClassifier {
        script: Mutex<VecDeque<Classification>>,
        fallback: Classification,
        calls: AtomicU32,
    }

    impl ScriptedClassifier {
        fn new(script: Vec<Classification>, fallback: Classification) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }

        fn always(classification: Classification) -> Arc<Self> {
            Self::new(Vec::new(), classification)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StatusClassifier for ScriptedClassifier {
        fn classify(&self, _status: &[u8]) -> Result<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct WidgetEngine {
        cluster_kind: ResourceKind,
        backup_kind: ResourceKind,
        restore_kind: ResourceKind,
        controller: ControllerRef,
        bundle: Vec<String>,
        index: OptionIndex,
        clusters: Arc<ScriptedClassifier>,
        jobs: Arc<ScriptedClassifier>,
    }

    impl WidgetEngine {
        fn new(clusters: Arc<ScriptedClassifier>) -> Arc<Self> {
            Self::with_jobs(clusters, ScriptedClassifier::always(Classification::init()))
        }

        fn with_jobs(clusters: Arc<ScriptedClassifier>, jobs: Arc<ScriptedClassifier>) -> Arc<Self> {
            Arc::new(Self {
                cluster_kind: ResourceKind::new("test.io", "v1", "Widget", "widgets"),
                backup_kind: ResourceKind::new("test.io", "v1", "WidgetBackup", "widgetbackups"),
                restore_kind: ResourceKind::new("test.io", "v1", "WidgetRestore", "widgetrestores"),
                controller: ControllerRef {
                    label_selector: "name=widget-operator".into(),
                    cluster_controller: CONTROLLER.into(),
                    backup_controller: "widgetbackup-controller".into(),
                    restore_controller: "widgetrestore-controller".into(),
                },
                bundle: vec![
                    "kind: ServiceAccount\nmetadata:\n  name: widget-operator\n".into(),
                    "kind: Role\nmetadata:\n  name: widget-operator\n".into(),
                ],
                index: OptionIndex::build::<PxcClusterSpec>().unwrap(),
                clusters,
                jobs,
            })
        }

        fn document(kind: &str, name: &str, options: &str) -> String {
            format!(
                "apiVersion: test.io/v1\nkind: {}\nmetadata:\n  name: {}\nspec:\n  options: \"{}\"\n",
                kind, name, options
            )
        }
    }

    impl Engine for WidgetEngine {
        fn name(&self) -> &str {
            "widget"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn cluster_kind(&self) -> &ResourceKind {
            &self.cluster_kind
        }
        fn backup_kind(&self) -> &ResourceKind {
            &self.backup_kind
        }
        fn restore_kind(&self) -> &ResourceKind {
            &self.restore_kind
        }
        fn controller(&self) -> &ControllerRef {
            &self.controller
        }
        fn bundle(&self) -> &[String] {
            &self.bundle
        }
        fn options(&self) -> &OptionIndex {
            &self.index
        }
        fn create_manifest(&self, name: &str, overrides: &str) -> Result<String> {
            Ok(Self::document("Widget", name, overrides))
        }
        fn edit_manifest(&self, _current: &[u8], overrides: &str) -> Result<String> {
            Ok(Self::document("Widget", "db1", overrides))
        }
        fn upgrade_overrides(&self, version: &str) -> Result<String> {
            Ok(format!("pxc.image=widget:{}", version))
        }
        fn backup_manifest(&self, _cluster: &str, backup: &str, storage: &str) -> Result<String> {
            Ok(Self::document("WidgetBackup", backup, storage))
        }
        fn restore_manifest(&self, _cluster: &str, restore: &str, backup: &str) -> Result<String> {
            Ok(Self::document("WidgetRestore", restore, backup))
        }
        fn cluster_classifier(&self) -> StatusClassifierRef {
            self.clusters.clone()
        }
        fn job_classifier(&self) -> StatusClassifierRef {
            self.jobs.clone()
        }
    }

    fn create(name: &str) -> Operation {
        Operation::Create(CreateSpec {
            name: name.into(),
            options: "pxc.size=5".into(),
        })
    }

    async fn run_to_end(
        client: Arc<FakeControlPlane>,
        engine: Arc<WidgetEngine>,
        operation: Operation,
    ) -> (Outcome, Vec<(DiagnosticLevel, String)>) {
        let driver = ReconciliationDriver::new(client);
        let handle = driver.spawn(engine, operation);
        let mut diagnostics = Vec::new();
        let outcome = handle.wait(|d| diagnostics.push((d.level, d.text))).await;
        (outcome, diagnostics)
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_poll() {
        let client = Arc::new(FakeControlPlane::default());
        let classifier = ScriptedClassifier::always(Classification::ready(vec!["Port: 3306".into()]));
        let engine = WidgetEngine::new(classifier.clone());
        let started = Instant::now();

        let (outcome, diagnostics) = run_to_end(client.clone(), engine, create("db1")).await;

        let report = outcome.unwrap();
        assert_eq!(report.kind, "Widget");
        assert_eq!(report.name, "db1");
        assert_eq!(report.messages, vec!["Port: 3306"]);
        assert!(diagnostics.is_empty());
        assert_eq!(classifier.calls(), 1);
        assert!(started.elapsed() >= WARMUP);
        assert_eq!(client.applied_kinds(), vec!["ServiceAccount", "Role", "Widget"]);
        assert!(client.applied.lock().unwrap()[2].contains("pxc.size=5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_init_times_out() {
        let client = Arc::new(FakeControlPlane::default());
        let classifier = ScriptedClassifier::always(Classification::init());
        let engine = WidgetEngine::new(classifier.clone());

        let (outcome, diagnostics) = run_to_end(client, engine, create("db1")).await;

        assert_matches!(
            outcome,
            Err(Error::ReconciliationTimedOut { kind, name, ticks })
                if kind == "Widget" && name == "db1" && ticks == MAX_TICKS
        );
        assert!(diagnostics.is_empty());
        assert_eq!(classifier.calls(), MAX_TICKS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_refuses_existing_cluster() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let classifier = ScriptedClassifier::always(Classification::ready(vec![]));
        let engine = WidgetEngine::new(classifier.clone());

        let (outcome, _) = run_to_end(client.clone(), engine, create("db1")).await;

        let err = outcome.unwrap_err();
        assert_matches!(&err, Error::AlreadyExists { kind, name } if kind == "Widget" && name == "db1");
        assert!(err.hint().is_some());
        assert_eq!(client.applied_kinds(), vec!["ServiceAccount", "Role"]);
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prerequisite_conflicts_are_tolerated() {
        let client = Arc::new(FakeControlPlane::default());
        client.reject("ServiceAccount", 409, "AlreadyExists");
        client.reject("Role", 403, "Forbidden");
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));

        let (outcome, _) = run_to_end(client.clone(), engine, create("db1")).await;

        assert!(outcome.is_ok());
        assert_eq!(client.applied_kinds(), vec!["Widget"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prerequisite_failure_is_fatal() {
        let client = Arc::new(FakeControlPlane::default());
        client.reject("Role", 500, "InternalError");
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));

        let (outcome, _) = run_to_end(client.clone(), engine, create("db1")).await;

        assert_matches!(outcome, Err(Error::Kube(_)));
        assert_eq!(client.applied_kinds(), vec!["ServiceAccount"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_failure_is_fatal() {
        let client = Arc::new(FakeControlPlane::default());
        client.fail_get.store(true, Ordering::SeqCst);
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::init()));

        let (outcome, _) = run_to_end(client, engine, create("db1")).await;

        let err = outcome.unwrap_err();
        assert!(err.is_control_plane_io());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_carries_messages() {
        let client = Arc::new(FakeControlPlane::default());
        let classifier = ScriptedClassifier::new(
            vec![Classification::init()],
            Classification::error(vec!["pxc: pods are unschedulable".into()]),
        );
        let engine = WidgetEngine::new(classifier.clone());

        let (outcome, _) = run_to_end(client, engine, create("db1")).await;

        assert_matches!(
            outcome,
            Err(Error::ReconciliationError { messages, .. })
                if messages == vec!["pxc: pods are unschedulable".to_string()]
        );
        assert_eq!(classifier.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_are_forwarded_once_in_order() {
        let client = Arc::new(FakeControlPlane::default());
        let base = (Utc::now() + chrono::Duration::hours(1)).timestamp() as f64;
        let records: Vec<String> = [("one", 1.0), ("two", 2.0)]
            .iter()
            .map(|(error, offset)| {
                serde_json::json!({
                    "level": "error",
                    "ts": base + offset,
                    "msg": "Reconciler error",
                    "controller": CONTROLLER,
                    "request": "default/db1",
                    "error": error,
                })
                .to_string()
            })
            .collect();
        *client.log.lock().unwrap() = records.join("\n");

        let classifier = ScriptedClassifier::new(
            vec![Classification::init(), Classification::init()],
            Classification::ready(vec![]),
        );
        let engine = WidgetEngine::new(classifier.clone());

        let (outcome, diagnostics) = run_to_end(client, engine, create("db1")).await;

        assert!(outcome.is_ok());
        assert_eq!(
            diagnostics,
            vec![
                (DiagnosticLevel::Error, "Reconciler error: one".to_string()),
                (DiagnosticLevel::Error, "Reconciler error: two".to_string()),
            ]
        );
        assert_eq!(classifier.calls(), 3);
    }

    // -------------------------------------------------------------------------
    // Edit / Upgrade / Delete
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_edit_requires_existing_cluster() {
        let client = Arc::new(FakeControlPlane::default());
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));
        let operation = Operation::Edit(EditSpec {
            name: "db1".into(),
            options: "pxc.size=5".into(),
        });

        let (outcome, _) = run_to_end(client, engine, operation).await;

        assert_matches!(outcome, Err(Error::NotFound { kind, .. }) if kind == "Widget");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_applies_version_before_user_options() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));
        let operation = Operation::Upgrade(UpgradeSpec {
            name: "db1".into(),
            version: "2.0".into(),
            options: "pxc.size=5".into(),
        });

        let (outcome, _) = run_to_end(client.clone(), engine, operation).await;

        assert!(outcome.is_ok());
        let applied = client.applied.lock().unwrap();
        assert!(applied.last().unwrap().contains("pxc.image=widget:2.0,pxc.size=5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_until_gone() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let classifier = ScriptedClassifier::always(Classification::init());
        let engine = WidgetEngine::new(classifier.clone());
        let operation = Operation::Delete(DeleteSpec { name: "db1".into() });

        let (outcome, _) = run_to_end(client.clone(), engine, operation).await;

        let report = outcome.unwrap();
        assert_eq!(report.messages, vec!["Widget db1 deleted"]);
        assert!(client.objects.lock().unwrap().is_empty());
        assert_eq!(classifier.calls(), 0);
    }

    // -------------------------------------------------------------------------
    // Backup / Restore
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_backup_of_missing_cluster() {
        let client = Arc::new(FakeControlPlane::default());
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));
        let operation = Operation::Backup(BackupSpec {
            cluster: "db1".into(),
            backup_name: "nightly".into(),
            storage: "fs-pvc".into(),
        });

        let (outcome, _) = run_to_end(client, engine, operation).await;

        assert_matches!(outcome, Err(Error::NotFound { kind, name }) if kind == "Widget" && name == "db1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_uses_job_classifier() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let clusters = ScriptedClassifier::always(Classification::init());
        let jobs = ScriptedClassifier::new(
            vec![Classification::init()],
            Classification::ready(vec!["Destination: pvc/nightly".into()]),
        );
        let engine = WidgetEngine::with_jobs(clusters.clone(), jobs.clone());
        let operation = Operation::Backup(BackupSpec {
            cluster: "db1".into(),
            backup_name: "nightly".into(),
            storage: "fs-pvc".into(),
        });

        let (outcome, _) = run_to_end(client.clone(), engine, operation).await;

        let report = outcome.unwrap();
        assert_eq!(report.kind, "WidgetBackup");
        assert_eq!(report.name, "nightly");
        assert_eq!(jobs.calls(), 2);
        assert_eq!(clusters.calls(), 0);
        assert_eq!(client.applied_kinds(), vec!["WidgetBackup"]);
    }

    fn restore(cluster: &str) -> Operation {
        Operation::Restore(RestoreSpec {
            cluster: cluster.into(),
            restore_name: "nightly-restore".into(),
            backup_name: "nightly".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_of_missing_cluster() {
        let client = Arc::new(FakeControlPlane::default());
        let jobs = ScriptedClassifier::always(Classification::ready(vec![]));
        let engine = WidgetEngine::with_jobs(ScriptedClassifier::always(Classification::init()), jobs.clone());

        let (outcome, _) = run_to_end(client.clone(), engine, restore("db1")).await;

        assert_matches!(outcome, Err(Error::NotFound { kind, name }) if kind == "Widget" && name == "db1");
        assert!(client.applied_kinds().is_empty());
        assert_eq!(jobs.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_refuses_existing_restore_object() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        client.insert("WidgetRestore", "nightly-restore");
        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::init()));

        let (outcome, _) = run_to_end(client.clone(), engine, restore("db1")).await;

        assert_matches!(outcome, Err(Error::AlreadyExists { kind, .. }) if kind == "WidgetRestore");
        assert!(client.applied_kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_uses_job_classifier() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let clusters = ScriptedClassifier::always(Classification::init());
        let jobs = ScriptedClassifier::new(
            vec![Classification::init()],
            Classification::ready(vec!["Completed: 2026-10-14T02:00:00Z".into()]),
        );
        let engine = WidgetEngine::with_jobs(clusters.clone(), jobs.clone());

        let (outcome, _) = run_to_end(client.clone(), engine, restore("db1")).await;

        let report = outcome.unwrap();
        assert_eq!(report.kind, "WidgetRestore");
        assert_eq!(report.name, "nightly-restore");
        assert_eq!(report.messages, vec!["Completed: 2026-10-14T02:00:00Z"]);
        assert_eq!(jobs.calls(), 2);
        assert_eq!(clusters.calls(), 0);
        assert_eq!(client.applied_kinds(), vec!["WidgetRestore"]);
        assert!(client.applied.lock().unwrap()[0].contains("options: \"nightly\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_job_error() {
        let client = Arc::new(FakeControlPlane::default());
        client.insert("Widget", "db1");
        let jobs = ScriptedClassifier::always(Classification::error(vec!["backup not found".into()]));
        let engine = WidgetEngine::with_jobs(ScriptedClassifier::always(Classification::init()), jobs);

        let (outcome, _) = run_to_end(client, engine, restore("db1")).await;

        assert_matches!(
            outcome,
            Err(Error::ReconciliationError { kind, name, messages })
                if kind == "WidgetRestore" && name == "nightly-restore"
                    && messages == vec!["backup not found".to_string()]
        );
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_metrics_record_outcomes() {
        let client = Arc::new(FakeControlPlane::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let driver = ReconciliationDriver::new(client.clone()).with_metrics(metrics.clone());

        let engine = WidgetEngine::new(ScriptedClassifier::always(Classification::ready(vec![])));
        driver.spawn(engine.clone(), create("db1")).wait(|_| {}).await.unwrap();
        let outcome = driver.spawn(engine, create("db1")).wait(|_| {}).await;

        assert!(outcome.is_err());
        assert_eq!(metrics.runs("create", "ready"), 1);
        assert_eq!(metrics.runs("create", "error"), 1);
    }

    #[test]
    fn test_phase_refuses_to_leave_terminal_state() {
        let kind = ResourceKind::new("test.io", "v1", "Widget", "widgets");
        let mut phase = Phase::new(&kind, "db1");
        phase.enter(ReconciliationState::Polling).unwrap();
        phase.enter(ReconciliationState::Polling).unwrap();
        phase.enter(ReconciliationState::Ready).unwrap();

        let err = phase.enter(ReconciliationState::Error).unwrap_err();
        assert_matches!(err, Error::Internal(_));
        assert_eq!(phase.state, ReconciliationState::Ready);
    }

    #[test]
    fn test_join_overrides_skips_empty_layers() {
        assert_eq!(join_overrides(&["a=1", "", "  ", "b=2"]), "a=1,b=2");
        assert_eq!(join_overrides(&["", ""]), "");
    }
}
