//! Routing runtime lifecycle
//!
//! [`LifecycleManager`] owns the current engine and drives it through
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Transitions are
//! serialized by an async lock; observers read the atomic state and the
//! engine slot without waiting on a transition in progress.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};

use crate::{
    config::{ContextUri, EngineConfig},
    core::{
        EngineFactory, ErrorContext, PipelineCompiler, RoutingEngine, RunnerError, RunnerResult,
        RuntimeState, ScriptDirectoryLoader, StateCell,
    },
    engine::RouteEngineFactory,
    pipeline::YamlPipelineCompiler,
};

/// The engine built by the last successful start, with the context it was
/// built from.
pub struct EngineHandle {
    pub engine: Arc<dyn RoutingEngine>,
    pub config: EngineConfig,
}

/// Outcome of a successful start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSummary {
    /// Ids of the routes the engine accepted
    pub routes: Vec<String>,
    /// Scripts that failed to compile
    pub skipped_scripts: usize,
    /// Compiled routes the engine refused
    pub skipped_routes: usize,
}

pub struct LifecycleManager {
    context_uri: ContextUri,
    routes_path: PathBuf,
    loader: Arc<ScriptDirectoryLoader>,
    engine_factory: Arc<dyn EngineFactory>,
    state: StateCell,
    engine: ArcSwapOption<EngineHandle>,
    transition: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        context_uri: ContextUri,
        routes_path: impl Into<PathBuf>,
        compiler: Arc<dyn PipelineCompiler>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            context_uri,
            routes_path: routes_path.into(),
            loader: Arc::new(ScriptDirectoryLoader::new(compiler)),
            engine_factory,
            state: StateCell::default(),
            engine: ArcSwapOption::empty(),
            transition: Mutex::new(()),
        }
    }

    /// Manager wired to the YAML pipeline compiler and the in-process engine.
    pub fn with_defaults(context_uri: ContextUri, routes_path: impl Into<PathBuf>) -> Self {
        Self::new(
            context_uri,
            routes_path,
            Arc::new(YamlPipelineCompiler::new()),
            Arc::new(RouteEngineFactory),
        )
    }

    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    /// Route ids registered on the current engine
    pub fn routes(&self) -> Vec<String> {
        self.engine
            .load_full()
            .map(|handle| handle.engine.list_routes())
            .unwrap_or_default()
    }

    pub fn engine(&self) -> Option<Arc<dyn RoutingEngine>> {
        self.engine.load_full().map(|handle| handle.engine.clone())
    }

    pub fn context_uri(&self) -> &ContextUri {
        &self.context_uri
    }

    pub fn routes_path(&self) -> &Path {
        &self.routes_path
    }

    /// Build an engine, load every script and start routing.
    ///
    /// Scripts that fail to compile and routes the engine refuses are logged
    /// and skipped. Any other failure leaves the manager `Stopped`.
    pub async fn start(&self) -> RunnerResult<StartSummary> {
        let _guard = self.transition.lock().await;
        self.start_locked().await
    }

    /// Stop routing and wait until the engine has drained, then remove every
    /// route. A no-op when already stopped.
    pub async fn stop(&self) -> RunnerResult<()> {
        let _guard = self.transition.lock().await;
        self.stop_locked().await
    }

    /// Stop, then start again from a fresh scan of the routes directory.
    pub async fn reload(&self) -> RunnerResult<StartSummary> {
        let _guard = self.transition.lock().await;
        info!("Reloading routing engine");
        self.stop_locked().await?;
        self.start_locked().await
    }

    async fn start_locked(&self) -> RunnerResult<StartSummary> {
        self.state
            .transition(RuntimeState::Stopped, RuntimeState::Starting)?;
        info!(
            "Starting routing engine with context {} and routes from '{}'",
            self.context_uri,
            self.routes_path.display()
        );

        match self.bring_up().await {
            Ok(summary) => {
                self.state
                    .transition(RuntimeState::Starting, RuntimeState::Running)?;
                info!(
                    "Routing engine running with {} routes ({} scripts and {} routes skipped)",
                    summary.routes.len(),
                    summary.skipped_scripts,
                    summary.skipped_routes
                );
                Ok(summary)
            }
            Err(e) => {
                self.state
                    .transition(RuntimeState::Starting, RuntimeState::Stopped)?;
                warn!("Routing engine start aborted: {e}");
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> RunnerResult<StartSummary> {
        let uri = self.context_uri.clone();
        let config = run_blocking(move || EngineConfig::resolve(&uri)).await?;
        let engine = self.engine_factory.create(&config)?;

        let loader = self.loader.clone();
        let routes_path = self.routes_path.clone();
        let report = run_blocking(move || loader.load(&routes_path)).await?;

        let mut summary = StartSummary {
            skipped_scripts: report.failures.len(),
            ..Default::default()
        };

        for route in report.routes {
            let source = route.source.clone();
            match engine.add_route(route) {
                Ok(id) => summary.routes.push(id),
                Err(e) => {
                    error!("Can't add route from '{}': {e}", source.display());
                    summary.skipped_routes += 1;
                }
            }
        }

        engine.start()?;
        self.engine
            .store(Some(Arc::new(EngineHandle { engine, config })));
        Ok(summary)
    }

    async fn stop_locked(&self) -> RunnerResult<()> {
        if self.state.get() == RuntimeState::Stopped {
            debug!("Routing engine already stopped");
            return Ok(());
        }

        self.state
            .transition(RuntimeState::Running, RuntimeState::Stopping)?;

        let Some(handle) = self.engine.load_full() else {
            return self
                .state
                .transition(RuntimeState::Stopping, RuntimeState::Stopped);
        };

        info!("Stopping routing engine '{}'", handle.engine.name());
        if let Err(e) = handle.engine.stop() {
            self.state
                .transition(RuntimeState::Stopping, RuntimeState::Running)?;
            return Err(e);
        }

        self.await_drain(&handle).await;
        Self::remove_routes(handle.engine.as_ref());

        self.state
            .transition(RuntimeState::Stopping, RuntimeState::Stopped)?;
        info!("Routing engine '{}' stopped", handle.engine.name());
        Ok(())
    }

    async fn await_drain(&self, handle: &EngineHandle) {
        let poll_interval = handle.config.drain.poll_interval();
        let deadline = handle
            .config
            .drain
            .timeout()
            .map(|timeout| Instant::now() + timeout);

        loop {
            match handle.engine.is_stopped() {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!("{}", RunnerError::DrainWaitObservation(e.to_string())),
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        "Engine '{}' still draining after {:?}, removing routes anyway",
                        handle.engine.name(),
                        handle.config.drain.timeout().unwrap_or_default()
                    );
                    return;
                }
            }

            sleep(poll_interval).await;
        }
    }

    fn remove_routes(engine: &dyn RoutingEngine) {
        for id in engine.list_routes() {
            if let Err(e) = engine.remove_route(&id) {
                warn!("Can't remove route '{id}': {e}");
            }
        }
    }
}

/// Run filesystem work off the async workers.
async fn run_blocking<T, F>(task: F) -> RunnerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RunnerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .with_context("Blocking task failed")?
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    use tempfile::TempDir;

    use super::*;
    use crate::pipeline::RouteDefinition;

    type StopHook = Arc<dyn Fn() + Send + Sync>;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        stop_calls: AtomicUsize,
        failed_removals: AtomicUsize,
    }

    struct MockEngine {
        routes: StdMutex<Vec<String>>,
        started: AtomicBool,
        stop_requested: AtomicBool,
        pending_polls: AtomicUsize,
        observe_errors: AtomicUsize,
        reject_stop: bool,
        on_stop: Option<StopHook>,
        counters: Arc<Counters>,
    }

    impl RoutingEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        fn add_route(&self, definition: RouteDefinition) -> RunnerResult<String> {
            if definition.from.ends_with("reject") {
                return Err(RunnerError::Registration {
                    route: definition.from,
                    reason: "refused".into(),
                });
            }
            let mut routes = self.routes.lock().unwrap();
            let id = definition
                .id
                .unwrap_or_else(|| format!("route{}", routes.len() + 1));
            routes.push(id.clone());
            Ok(id)
        }

        fn remove_route(&self, id: &str) -> RunnerResult<()> {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter().position(|r| r == id) {
                Some(pos) if !self.started.load(Ordering::SeqCst) => {
                    routes.remove(pos);
                    Ok(())
                }
                _ => {
                    self.counters.failed_removals.fetch_add(1, Ordering::SeqCst);
                    Err(RunnerError::NotFound(id.to_string()))
                }
            }
        }

        fn start(&self) -> RunnerResult<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> RunnerResult<()> {
            self.counters.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_stop {
                return Err(RunnerError::Engine("stop refused".into()));
            }
            if let Some(hook) = &self.on_stop {
                hook();
            }
            self.stop_requested.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_stopped(&self) -> RunnerResult<bool> {
            if !self.stop_requested.load(Ordering::SeqCst) {
                return Ok(false);
            }
            if self
                .observe_errors
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RunnerError::Internal("probe failed".into()));
            }
            if self
                .pending_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(false);
            }
            self.started.store(false, Ordering::SeqCst);
            Ok(true)
        }

        fn list_routes(&self) -> Vec<String> {
            self.routes.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct MockFactory {
        counters: Arc<Counters>,
        pending_polls: usize,
        observe_errors: usize,
        reject_stop: bool,
        on_stop: Option<StopHook>,
    }

    impl EngineFactory for MockFactory {
        fn create(&self, _config: &EngineConfig) -> RunnerResult<Arc<dyn RoutingEngine>> {
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockEngine {
                routes: StdMutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                pending_polls: AtomicUsize::new(self.pending_polls),
                observe_errors: AtomicUsize::new(self.observe_errors),
                reject_stop: self.reject_stop,
                on_stop: self.on_stop.clone(),
                counters: self.counters.clone(),
            }))
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new(context: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("context.yaml"), context).unwrap();
            fs::create_dir(dir.path().join("routes")).unwrap();
            Self { dir }
        }

        fn fast() -> Self {
            Self::new("drain:\n  poll_interval_ms: 5\n")
        }

        fn routes(&self) -> PathBuf {
            self.dir.path().join("routes")
        }

        fn script(&self, name: &str, content: &str) {
            fs::write(self.routes().join(name), content).unwrap();
        }

        fn context_uri(&self) -> ContextUri {
            ContextUri::File(self.dir.path().join("context.yaml"))
        }

        fn manager(&self, factory: MockFactory) -> LifecycleManager {
            LifecycleManager::new(
                self.context_uri(),
                self.routes(),
                Arc::new(YamlPipelineCompiler::new()),
                Arc::new(factory),
            )
        }
    }

    #[tokio::test]
    async fn test_start_skips_invalid_scripts() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "id: a\nfrom: direct:a\n");
        fixture.script("b.pipeline", "from: [broken\n");
        fixture.script("c.pipeline", "id: c\nfrom: direct:c\n");
        fixture.script("d.pipeline", "steps: []\n");

        let manager = fixture.manager(MockFactory::default());
        let summary = manager.start().await.unwrap();

        assert_eq!(summary.routes, vec!["a", "c"]);
        assert_eq!(summary.skipped_scripts, 2);
        assert_eq!(summary.skipped_routes, 0);
        assert_eq!(manager.state(), RuntimeState::Running);
        assert_eq!(manager.routes(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_start_skips_refused_routes() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "id: a\nfrom: direct:a\n");
        fixture.script("b.pipeline", "from: direct:reject\n");

        let manager = fixture.manager(MockFactory::default());
        let summary = manager.start().await.unwrap();

        assert_eq!(summary.routes, vec!["a"]);
        assert_eq!(summary.skipped_routes, 1);
        assert_eq!(manager.state(), RuntimeState::Running);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        init_log();
        let fixture = Fixture::fast();
        let counters = Arc::new(Counters::default());
        let manager = fixture.manager(MockFactory {
            counters: counters.clone(),
            ..Default::default()
        });

        manager.stop().await.unwrap();
        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_then_stop_removes_routes() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");
        fixture.script("b.pipeline", "from: direct:b\n");

        let counters = Arc::new(Counters::default());
        let manager = fixture.manager(MockFactory {
            counters: counters.clone(),
            pending_polls: 3,
            ..Default::default()
        });

        manager.start().await.unwrap();
        assert_eq!(manager.routes().len(), 2);

        manager.stop().await.unwrap();
        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert!(manager.routes().is_empty());
        assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.failed_removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drain_survives_observation_errors() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");

        let manager = fixture.manager(MockFactory {
            observe_errors: 2,
            pending_polls: 1,
            ..Default::default()
        });

        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert!(manager.routes().is_empty());
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_wait() {
        init_log();
        let fixture = Fixture::new("drain:\n  poll_interval_ms: 5\n  timeout_ms: 50\n");
        fixture.script("a.pipeline", "from: direct:a\n");

        let counters = Arc::new(Counters::default());
        let manager = fixture.manager(MockFactory {
            counters: counters.clone(),
            pending_polls: usize::MAX,
            ..Default::default()
        });

        manager.start().await.unwrap();
        manager.stop().await.unwrap();

        // The engine never reported stopped, so it refuses the removal
        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert_eq!(counters.failed_removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_stop_keeps_running() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");

        let manager = fixture.manager(MockFactory {
            reject_stop: true,
            ..Default::default()
        });

        manager.start().await.unwrap();
        assert!(matches!(manager.stop().await, Err(RunnerError::Engine(_))));
        assert_eq!(manager.state(), RuntimeState::Running);
        assert_eq!(manager.routes().len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        init_log();
        let fixture = Fixture::fast();
        let manager = fixture.manager(MockFactory::default());

        manager.start().await.unwrap();
        let err = manager.start().await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::InvalidTransition {
                from: RuntimeState::Running,
                to: RuntimeState::Starting
            }
        ));
        assert_eq!(manager.state(), RuntimeState::Running);
    }

    #[tokio::test]
    async fn test_missing_context_leaves_stopped() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");

        let counters = Arc::new(Counters::default());
        let manager = LifecycleManager::new(
            ContextUri::Classpath("missing-context.yaml".into()),
            fixture.routes(),
            Arc::new(YamlPipelineCompiler::new()),
            Arc::new(MockFactory {
                counters: counters.clone(),
                ..Default::default()
            }),
        );

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert!(manager.engine().is_none());
    }

    #[tokio::test]
    async fn test_missing_routes_directory_leaves_stopped() {
        init_log();
        let fixture = Fixture::fast();
        let manager = LifecycleManager::new(
            fixture.context_uri(),
            fixture.dir.path().join("nowhere"),
            Arc::new(YamlPipelineCompiler::new()),
            Arc::new(MockFactory::default()),
        );

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, RunnerError::DirectoryUnavailable { .. }));
        assert_eq!(manager.state(), RuntimeState::Stopped);

        // A later start may succeed once the directory exists
        fs::create_dir(fixture.dir.path().join("nowhere")).unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.state(), RuntimeState::Running);
    }

    #[tokio::test]
    async fn test_reload_rescans_directory() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "id: a\nfrom: direct:a\n");
        fixture.script("b.pipeline", "id: b\nfrom: direct:b\n");

        let routes = fixture.routes();
        let hook: StopHook = Arc::new(move || {
            let _ = fs::remove_file(routes.join("b.pipeline"));
            fs::write(routes.join("c.pipeline"), "id: c\nfrom: direct:c\n").unwrap();
        });

        let counters = Arc::new(Counters::default());
        let manager = fixture.manager(MockFactory {
            counters: counters.clone(),
            on_stop: Some(hook),
            ..Default::default()
        });

        let summary = manager.start().await.unwrap();
        assert_eq!(summary.routes, vec!["a", "b"]);

        let summary = manager.reload().await.unwrap();
        assert_eq!(summary.routes, vec!["a", "c"]);
        assert_eq!(manager.routes(), vec!["a", "c"]);
        assert_eq!(manager.state(), RuntimeState::Running);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reload_from_stopped_starts() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");
        let manager = fixture.manager(MockFactory::default());

        let summary = manager.reload().await.unwrap();
        assert_eq!(summary.routes.len(), 1);
        assert_eq!(manager.state(), RuntimeState::Running);
    }

    #[tokio::test]
    async fn test_concurrent_stops_stop_once() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script("a.pipeline", "from: direct:a\n");
        fixture.script("b.pipeline", "from: direct:b\n");

        let counters = Arc::new(Counters::default());
        let manager = fixture.manager(MockFactory {
            counters: counters.clone(),
            pending_polls: 2,
            ..Default::default()
        });

        manager.start().await.unwrap();
        let (first, second) = tokio::join!(manager.stop(), manager.stop());
        first.unwrap();
        second.unwrap();

        assert_eq!(manager.state(), RuntimeState::Stopped);
        assert_eq!(counters.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.failed_removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocking_task_panic_is_internal_error() {
        let result: RunnerResult<()> = run_blocking(|| panic!("scan exploded")).await;
        assert!(matches!(result, Err(RunnerError::Internal(_))));
    }

    #[tokio::test]
    async fn test_defaults_with_bundled_context() {
        init_log();
        let fixture = Fixture::fast();
        fixture.script(
            "a.pipeline",
            "from: direct:a\nsteps:\n  - to: log:out\n",
        );

        let manager = LifecycleManager::with_defaults(
            ContextUri::Classpath(crate::config::classpath::DEFAULT_CONTEXT.into()),
            fixture.routes(),
        );

        manager.start().await.unwrap();
        assert_eq!(manager.routes(), vec!["route1"]);
        manager.stop().await.unwrap();
        assert!(manager.routes().is_empty());
        assert!(manager.engine().unwrap().is_stopped().unwrap());
    }
}
