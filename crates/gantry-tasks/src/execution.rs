//! Execution engine
//!
//! An [`Execution`] interprets a runnable tree against a [`Plan`]. It owns the
//! deduplication cache, the directory listing and the run statistics; all of
//! them live exactly as long as the execution.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::context::{RunContext, TaskOptions, Verbosity};
use crate::dedup::{DedupCache, DedupKey};
use crate::error::{PlanError, TaskError};
use crate::listing::DirCache;
use crate::output::{BufferedOutput, Output};
use crate::plan::{Plan, PlanBuilder};
use crate::reporter::{TaskEvent, TaskReporter, TaskReporterRegistry};
use crate::runnable::{within_scope, PathScoped, Runnable};
use crate::task::Task;

/// Default time between interrupting a process and killing it
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Options for one execution
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub verbosity: Verbosity,
    /// Run manual tasks instead of skipping them
    pub run_manual: bool,
    /// Command-line option values per task name
    pub flags: HashMap<String, TaskOptions>,
    pub grace: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            run_manual: false,
            flags: HashMap::new(),
            grace: DEFAULT_GRACE,
        }
    }
}

/// Counters for a finished (or running) execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub executed: usize,
    pub deduplicated: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicUsize,
    deduplicated: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// State shared by every context of one execution
pub(crate) struct Engine {
    pub(crate) plan: Arc<Plan>,
    pub(crate) dirs: Arc<DirCache>,
    pub(crate) dedup: DedupCache,
    pub(crate) reporter: Arc<dyn TaskReporter>,
    pub(crate) options: ExecOptions,
    counters: Counters,
}

impl Engine {
    fn report(&self, event: TaskEvent) {
        self.reporter.report(&event);
    }
}

/// Builder for [`Execution`]
pub struct ExecutionBuilder {
    root: PathBuf,
    options: ExecOptions,
    skip_dirs: Vec<String>,
    dirs: Option<Arc<DirCache>>,
    output: Option<Output>,
    cancel: Option<CancelToken>,
    reporter: Option<Arc<dyn TaskReporter>>,
}

impl ExecutionBuilder {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            options: ExecOptions::default(),
            skip_dirs: Vec::new(),
            dirs: None,
            output: None,
            cancel: None,
            reporter: None,
        }
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.options.verbosity = verbosity;
        self
    }

    pub fn run_manual(mut self, run_manual: bool) -> Self {
        self.options.run_manual = run_manual;
        self
    }

    /// Command-line option values for one task
    pub fn task_flags(mut self, task: impl Into<String>, flags: TaskOptions) -> Self {
        self.options.flags.insert(task.into(), flags);
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.options.grace = grace;
        self
    }

    /// Directory names the listing never descends into
    pub fn skip_dirs(mut self, skip: Vec<String>) -> Self {
        self.skip_dirs = skip;
        self
    }

    /// Use an existing listing instead of creating one
    pub fn dir_cache(mut self, dirs: Arc<DirCache>) -> Self {
        self.dirs = Some(dirs);
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.output = Some(output);
        self
    }

    /// Root cancellation token (e.g. one bound to OS signals)
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Build the plan for `roots` and create the execution
    pub fn build_for(mut self, roots: &[Runnable]) -> Result<Execution, PlanError> {
        let dirs = self.take_dirs();
        let plan = PlanBuilder::new(&dirs).build(roots)?;
        Ok(self.finish(dirs, plan))
    }

    /// Create the execution from an already built plan
    pub fn build(mut self, plan: Plan) -> Execution {
        let dirs = self.take_dirs();
        self.finish(dirs, plan)
    }

    fn take_dirs(&mut self) -> Arc<DirCache> {
        match self.dirs.take() {
            Some(dirs) => dirs,
            None => Arc::new(DirCache::new(
                self.root.clone(),
                std::mem::take(&mut self.skip_dirs),
            )),
        }
    }

    fn finish(self, dirs: Arc<DirCache>, plan: Plan) -> Execution {
        let engine = Arc::new(Engine {
            plan: Arc::new(plan),
            dirs,
            dedup: DedupCache::new(),
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TaskReporterRegistry::new())),
            options: self.options,
            counters: Counters::default(),
        });
        let root = RunContext::new(
            engine.clone(),
            self.root,
            self.output.unwrap_or_else(Output::std),
            self.cancel.unwrap_or_default(),
        );
        Execution { engine, root }
    }
}

/// One run of a runnable tree
pub struct Execution {
    engine: Arc<Engine>,
    root: RunContext,
}

impl Execution {
    pub fn builder(root: impl Into<PathBuf>) -> ExecutionBuilder {
        ExecutionBuilder::new(root.into())
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.engine.plan
    }

    pub fn dir_cache(&self) -> &Arc<DirCache> {
        &self.engine.dirs
    }

    pub fn dedup_cache(&self) -> &DedupCache {
        &self.engine.dedup
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.root.cancel_token()
    }

    /// Context at the repository root, from which every branch derives
    pub fn root_context(&self) -> RunContext {
        self.root.clone()
    }

    pub fn stats(&self) -> RunStats {
        let c = &self.engine.counters;
        RunStats {
            executed: c.executed.load(Ordering::SeqCst),
            deduplicated: c.deduplicated.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            skipped: c.skipped.load(Ordering::SeqCst),
        }
    }

    /// Run `runnable` from the root context
    pub async fn run(&self, runnable: &Runnable) -> Result<(), TaskError> {
        let start = Instant::now();
        let result = runnable.run(self.root_context()).await;

        let stats = self.stats();
        self.engine.report(TaskEvent::AllCompleted {
            executed: stats.executed,
            deduplicated: stats.deduplicated,
            failed: stats.failed,
            skipped: stats.skipped,
            duration: start.elapsed(),
        });
        result
    }
}

impl Runnable {
    /// Run this node and everything below it
    pub fn run(&self, ctx: RunContext) -> BoxFuture<'static, Result<(), TaskError>> {
        let node = self.clone();
        async move { run_node(node, ctx).await }.boxed()
    }
}

async fn run_node(node: Runnable, ctx: RunContext) -> Result<(), TaskError> {
    if ctx.cancel_token().is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    match node {
        Runnable::Leaf(leaf) => leaf.call(ctx).await,
        Runnable::Task(task) => run_task(task, ctx).await,
        Runnable::Serial(children) => {
            for child in children.iter() {
                child.run(ctx.clone()).await?;
            }
            Ok(())
        }
        Runnable::Parallel(children) => {
            let branches = children.iter().map(|c| (c.clone(), ctx.clone())).collect();
            run_group(branches, &ctx).await
        }
        Runnable::PathScoped(scoped) => run_scoped(scoped, ctx).await,
    }
}

async fn run_task(task: Arc<Task>, ctx: RunContext) -> Result<(), TaskError> {
    let engine = ctx.engine.clone();
    let name = task.name().to_string();

    if task.is_manual() && !engine.options.run_manual {
        engine.counters.skipped.fetch_add(1, Ordering::SeqCst);
        engine.report(TaskEvent::Skipped {
            task: name,
            path: ctx.path().to_string(),
            reason: "manual task".to_string(),
        });
        return Ok(());
    }

    let key = DedupKey::for_task(&task, ctx.path());
    let base = if task.is_global() { ctx.at_root() } else { ctx.clone() };
    let cli = engine.options.flags.get(&name).cloned().unwrap_or_default();
    let task_ctx = base.for_task(&task, cli);
    let path = task_ctx.path().to_string();

    let (result, executed) = engine
        .dedup
        .run_once(key, || {
            let engine = engine.clone();
            let body = task.body().clone();
            let name = name.clone();
            let path = path.clone();
            async move {
                engine.report(TaskEvent::Started {
                    task: name.clone(),
                    path: path.clone(),
                });
                let start = Instant::now();
                let result = AssertUnwindSafe(body.run(task_ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(TaskError::from_panic(name.clone(), payload)));

                let duration = start.elapsed();
                engine.counters.executed.fetch_add(1, Ordering::SeqCst);
                match &result {
                    Ok(()) => engine.report(TaskEvent::Completed {
                        task: name,
                        path,
                        duration,
                    }),
                    Err(e) => {
                        if !e.is_cancelled() {
                            engine.counters.failed.fetch_add(1, Ordering::SeqCst);
                        }
                        engine.report(TaskEvent::Failed {
                            task: name,
                            path,
                            duration,
                            error: e.to_string(),
                        });
                    }
                }
                result
            }
        })
        .await;

    if !executed {
        engine.counters.deduplicated.fetch_add(1, Ordering::SeqCst);
        engine.report(TaskEvent::Deduplicated {
            task: task.name().to_string(),
            path: ctx.path().to_string(),
        });
    }
    result
}

async fn run_scoped(scoped: Arc<PathScoped>, ctx: RunContext) -> Result<(), TaskError> {
    let resolved = match ctx.plan().resolved_paths(scoped.id()) {
        Some(resolved) => resolved.clone(),
        None => {
            debug!(scope = ?scoped.id(), "scope missing from plan, resolving now");
            let resolved = scoped
                .spec()
                .resolve(&ctx.engine.dirs)
                .map_err(|e| TaskError::failed(e.to_string()))?;
            Arc::new(resolved)
        }
    };

    let dirs = within_scope(&resolved, ctx.path());
    if dirs.is_empty() {
        debug!(scope = ?scoped.id(), path = %ctx.path(), "no directories in scope");
        return Ok(());
    }

    let branches = dirs
        .iter()
        .map(|dir| {
            let overrides = scoped.spec().overrides_for(dir);
            (scoped.inner().clone(), ctx.scoped(dir, &overrides))
        })
        .collect();
    run_group(branches, &ctx).await
}

/// Run branches concurrently, buffering each branch's output when there is
/// more than one.
///
/// The first failure cancels the remaining branches; every branch is still
/// joined before returning.
async fn run_group(
    branches: Vec<(Runnable, RunContext)>,
    parent: &RunContext,
) -> Result<(), TaskError> {
    if branches.len() <= 1 {
        return match branches.into_iter().next() {
            Some((runnable, ctx)) => runnable.run(ctx).await,
            None => Ok(()),
        };
    }

    let cancel = parent.cancel_token().child();
    let quiet = parent.verbosity() == Verbosity::Quiet;
    let mut set = JoinSet::new();

    for (runnable, ctx) in branches {
        let buffer = BufferedOutput::new();
        let label = branch_label(&runnable, &ctx);
        let ctx = ctx.with_output(buffer.output()).with_cancel(cancel.clone());
        set.spawn(async move {
            let result = AssertUnwindSafe(runnable.run(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(TaskError::from_panic(label, payload)));
            (result, Some(buffer))
        });
    }

    let mut first: Option<TaskError> = None;
    while let Some(joined) = set.join_next().await {
        let (result, buffer) = match joined {
            Ok(done) => done,
            Err(e) if e.is_panic() => (
                Err(TaskError::from_panic("parallel branch", e.into_panic())),
                None,
            ),
            Err(_) => (Err(TaskError::Cancelled), None),
        };

        if let Some(buffer) = buffer {
            if quiet && result.is_ok() {
                buffer.discard();
            } else if let Err(e) = buffer.flush_to(parent.output()) {
                warn!(error = %e, "failed to flush branch output");
            }
        }

        if let Err(err) = result {
            cancel.cancel();
            first = match first {
                None => Some(err),
                Some(prev) if prev.is_cancelled() && !err.is_cancelled() => Some(err),
                Some(prev) => Some(prev),
            };
        }
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn branch_label(runnable: &Runnable, ctx: &RunContext) -> String {
    match runnable {
        Runnable::Task(task) => task.name().to_string(),
        Runnable::Leaf(leaf) => leaf.label().to_string(),
        other => match ctx.task_name() {
            Some(task) => format!("{} branch of {}", other.kind(), task),
            None => format!("{} branch", other.kind()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::detect_by_file;
    use crate::output::MemorySink;
    use crate::reporter::CollectingReporter;
    use crate::runnable::PathSpec;
    use crate::process::ProcessCommand;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn counting_leaf(counter: Arc<AtomicUsize>) -> Runnable {
        Runnable::leaf("count", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing_leaf(message: &'static str) -> Runnable {
        Runnable::leaf("fail", move |_ctx| async move { Err(TaskError::failed(message)) })
    }

    fn noop() -> Runnable {
        Runnable::leaf("noop", |_ctx| async { Ok(()) })
    }

    fn explode() -> Result<(), TaskError> {
        panic!("kaboom")
    }

    struct Harness {
        exec: Execution,
        stdout: Arc<MemorySink>,
        reporter: Arc<CollectingReporter>,
    }

    fn harness(root: &std::path::Path, tree: &Runnable, verbosity: Verbosity) -> Harness {
        let (output, stdout, _) = Output::memory();
        let reporter = Arc::new(CollectingReporter::default());
        let exec = Execution::builder(root)
            .verbosity(verbosity)
            .output(output)
            .reporter(reporter.clone())
            .build_for(std::slice::from_ref(tree))
            .unwrap();
        Harness {
            exec,
            stdout,
            reporter,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dedup_concurrent_invocations() {
        let runs = Arc::new(AtomicUsize::new(0));
        let body = {
            let runs = runs.clone();
            Runnable::leaf("slow", move |_ctx| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }
            })
        };
        let build = Arc::new(Task::new("build", body));
        let tree = Runnable::parallel((0..10).map(|_| Runnable::from(build.clone())));
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let stats = h.exec.stats();
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.deduplicated, 9);
        assert_eq!(h.reporter.started("build"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dedup_shares_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let body = {
            let runs = runs.clone();
            Runnable::leaf("fail", move |_ctx| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::failed("broken build"))
                }
            })
        };
        let build = Arc::new(Task::new("build", body));
        let tree = Runnable::serial([
            Runnable::parallel([Runnable::from(build.clone()), noop()]),
        ]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        let first = h.exec.run(&tree).await.unwrap_err();
        let again = Runnable::from(build).run(h.exec.root_context()).await.unwrap_err();

        assert_eq!(first.to_string(), "broken build");
        assert_eq!(again.to_string(), "broken build");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_global_task_runs_once_across_paths() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let body = {
            let seen = seen.clone();
            Runnable::leaf("record", move |ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.path().to_string());
                    Ok(())
                }
            })
        };
        let install = Task::new("install", body).global(true);
        let tree = Runnable::from(install).run_in(PathSpec::new().paths(["a", "b"]));
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["."]);
        assert_eq!(h.exec.stats().deduplicated, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_path_task_runs_per_directory() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let body = {
            let seen = seen.clone();
            Runnable::leaf("record", move |ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.path().to_string());
                    Ok(())
                }
            })
        };
        let build = Task::new("build", body);
        let tree = Runnable::from(build).run_in(PathSpec::new().paths(["a", "b"]));
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(h.exec.stats().executed, 2);
    }

    #[tokio::test]
    async fn test_serial_short_circuits() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let tree = Runnable::serial([
            counting_leaf(before.clone()),
            failing_leaf("step two failed"),
            counting_leaf(after.clone()),
        ]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        let err = h.exec.run(&tree).await.unwrap_err();

        assert_eq!(err.to_string(), "step two failed");
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_fail_fast_and_drain() {
        let drained = Arc::new(AtomicUsize::new(0));
        let saw_cancel = Arc::new(AtomicUsize::new(0));
        let sleeper = {
            let drained = drained.clone();
            let saw_cancel = saw_cancel.clone();
            Runnable::leaf("sleeper", move |ctx| {
                let drained = drained.clone();
                let saw_cancel = saw_cancel.clone();
                async move {
                    let result = tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(()),
                        _ = ctx.cancel_token().cancelled() => {
                            saw_cancel.fetch_add(1, Ordering::SeqCst);
                            Err(TaskError::Cancelled)
                        }
                    };
                    drained.fetch_add(1, Ordering::SeqCst);
                    result
                }
            })
        };
        let failing = Runnable::leaf("fail", |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(TaskError::failed("boom"))
        });
        let tree = Runnable::parallel([failing, sleeper]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        let err = h.exec.run(&tree).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(drained.load(Ordering::SeqCst), 1);
        assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
        assert!(!h.exec.cancel_token().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_output_is_atomic_per_branch() {
        let writer = |tag: &'static str| {
            Runnable::leaf(tag, move |ctx| async move {
                for i in 0..1000 {
                    ctx.output().println(format!("{} {}", tag, i))?;
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Ok::<(), TaskError>(())
            })
        };
        let tree = Runnable::parallel([writer("a"), writer("b"), writer("c")]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        let text = h.stdout.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3000);
        let mut tags = Vec::new();
        for block in lines.chunks(1000) {
            let tag = block[0].split(' ').next().unwrap();
            for (i, line) in block.iter().enumerate() {
                assert_eq!(*line, format!("{} {}", tag, i));
            }
            tags.push(tag);
        }
        tags.sort();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_quiet_discards_successful_branch_output() {
        let tree = Runnable::parallel([
            Runnable::leaf("ok", |ctx| async move {
                ctx.output().println("all good")?;
                Ok::<(), TaskError>(())
            }),
            Runnable::leaf("bad", |ctx| async move {
                ctx.output().println("diagnostics")?;
                Err::<(), TaskError>(TaskError::failed("bad"))
            }),
        ]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Quiet);

        h.exec.run(&tree).await.unwrap_err();

        assert_eq!(h.stdout.text(), "diagnostics\n");
    }

    #[tokio::test]
    async fn test_single_branch_writes_directly() {
        let tree = Runnable::parallel([Runnable::leaf("only", |ctx| async move {
            ctx.output().println("direct")?;
            assert!(!ctx.cancel_token().is_cancelled());
            Ok::<(), TaskError>(())
        })]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Quiet);

        h.exec.run(&tree).await.unwrap();
        assert_eq!(h.stdout.text(), "direct\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panic_becomes_error() {
        let tree = Runnable::parallel([
            Runnable::from(Task::new(
                "explode",
                Runnable::leaf("panics", |_ctx| async move { explode() }),
            )),
            noop(),
        ]);
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        let err = h.exec.run(&tree).await.unwrap_err();
        assert!(matches!(err, TaskError::Panicked { ref task, ref message } if task == "explode" && message == "kaboom"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_walk_for_many_scopes() {
        let temp = TempDir::new().unwrap();
        for dir in ["a", "b", "c"] {
            std::fs::create_dir_all(temp.path().join(dir)).unwrap();
            std::fs::write(temp.path().join(dir).join("Cargo.toml"), "").unwrap();
        }
        let counter = Arc::new(AtomicUsize::new(0));
        let tree = Runnable::parallel((0..6).map(|i| {
            Runnable::from(Task::new(format!("t{}", i), counting_leaf(counter.clone())))
                .run_in(PathSpec::new().detect(detect_by_file(["Cargo.toml"])))
        }));
        let h = harness(temp.path(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 18);
        assert_eq!(h.exec.dir_cache().walk_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_scope_succeeds() {
        let temp = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let tree = counting_leaf(counter.clone())
            .run_in(PathSpec::new().detect(detect_by_file(["go.mod"])));
        let h = harness(temp.path(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nested_scope_stays_under_current_path() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let seen = seen.clone();
            Runnable::leaf("record", move |ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.path().to_string());
                    Ok(())
                }
            })
        };
        let tree = record
            .run_in(PathSpec::new().paths(["a/x", "a/y", "b/z"]))
            .run_in(PathSpec::new().paths(["a"]));
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a/x", "a/y"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_path_overrides_reach_task_options() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let body = {
            let seen = seen.clone();
            Runnable::leaf("record", move |ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock()
                        .unwrap()
                        .push((ctx.path().to_string(), ctx.options().get_bool("strict")));
                    Ok(())
                }
            })
        };
        let lint = Task::new("lint", body).flag("strict", "false", "");
        let strict: TaskOptions = [("strict", "true")].into_iter().collect();
        let tree = Runnable::from(lint).run_in(
            PathSpec::new()
                .paths(["api", "web"])
                .override_options("api", strict),
        );
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![("api".to_string(), true), ("web".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_manual_task_skipped_unless_requested() {
        let counter = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Task::new("release", counting_leaf(counter.clone())).manual(true));
        let tree = Runnable::from(release);

        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);
        h.exec.run(&tree).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(h.exec.stats().skipped, 1);

        let exec = Execution::builder(std::env::temp_dir())
            .run_manual(true)
            .output(Output::memory().0)
            .build_for(std::slice::from_ref(&tree))
            .unwrap();
        exec.run(&tree).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cli_flags_reach_task() {
        let value = Arc::new(Mutex::new(None));
        let body = {
            let value = value.clone();
            Runnable::leaf("record", move |ctx| {
                let value = value.clone();
                async move {
                    *value.lock().unwrap() = ctx.options().get_parsed::<u32>("jobs")?;
                    Ok::<(), TaskError>(())
                }
            })
        };
        let tree = Runnable::from(Task::new("build", body).flag("jobs", "1", ""));
        let exec = Execution::builder(std::env::temp_dir())
            .task_flags("build", [("jobs", "8")].into_iter().collect())
            .output(Output::memory().0)
            .build_for(std::slice::from_ref(&tree))
            .unwrap();

        exec.run(&tree).await.unwrap();
        assert_eq!(*value.lock().unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_all_completed_reported() {
        let tree = Runnable::from(Task::new("fmt", noop()));
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);

        h.exec.run(&tree).await.unwrap();

        let events = h.reporter.events();
        assert!(matches!(events.first(), Some(TaskEvent::Started { task, .. }) if task == "fmt"));
        assert!(matches!(
            events.last(),
            Some(TaskEvent::AllCompleted { executed: 1, failed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_root_runs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tree = counting_leaf(counter.clone());
        let h = harness(&std::env::temp_dir(), &tree, Verbosity::Normal);
        h.exec.cancel_token().cancel();

        let err = h.exec.run(&tree).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_reaches_processes_in_parallel_branches() {
        let temp = TempDir::new().unwrap();
        let tree = Runnable::parallel([Runnable::shell("sleep 30"), Runnable::shell("sleep 30")]);
        let (output, _, _) = Output::memory();
        let token = CancelToken::new();
        let exec = Execution::builder(temp.path())
            .grace(Duration::from_millis(500))
            .output(output)
            .cancel_token(token.clone())
            .build_for(std::slice::from_ref(&tree))
            .unwrap();

        let started = Instant::now();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        let err = exec.run(&tree).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupt_then_kill_in_parallel_group() {
        let temp = TempDir::new().unwrap();
        let grace = Duration::from_millis(800);
        let marker = temp.path().join("polite.done");
        let polite = Runnable::leaf("polite", {
            let marker = marker.clone();
            move |ctx| {
                let marker = marker.clone();
                async move {
                    let result = ProcessCommand::shell("sleep 30").run(&ctx).await;
                    std::fs::write(&marker, "").unwrap();
                    result
                }
            }
        });
        let tree = Runnable::parallel([
            polite,
            Runnable::shell("trap '' INT; exec sleep 30"),
            Runnable::shell("sleep 30 & echo detached"),
        ]);
        let (output, _, _) = Output::memory();
        let token = CancelToken::new();
        let exec = Execution::builder(temp.path())
            .grace(grace)
            .output(output)
            .cancel_token(token.clone())
            .build_for(std::slice::from_ref(&tree))
            .unwrap();

        let run = tokio::spawn(async move { exec.run(&tree).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        let cancelled_at = Instant::now();
        token.cancel();

        // The process that honours SIGINT is gone well before the grace period
        tokio::time::sleep(grace / 2).await;
        assert!(marker.exists(), "interrupt did not reach every branch");
        assert!(!run.is_finished(), "trapping branch ended before grace");

        let err = run.await.unwrap().unwrap_err();
        let elapsed = cancelled_at.elapsed();
        assert!(err.is_cancelled());
        assert!(elapsed >= grace, "killed before grace: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "not killed: {:?}", elapsed);
    }
}
