//! Building runnable trees from configuration
//!
//! Each configured task becomes a [`Task`] whose body runs its required tasks
//! and then its commands, in order. Tasks declaring `detect`, `detect_dirs` or
//! `paths` are wrapped in a path scope. Requirements are composed as serial
//! chains, never as graph edges.

use std::collections::BTreeMap;
use std::sync::Arc;

use gantry_core::config::{requirement_order, Config, GroupStep, RunStep, TaskConfig};
use gantry_core::{ConfigError, Result};
use tracing::debug;

use crate::builtin::builtin_tasks;
use crate::context::TaskOptions;
use crate::detect::{detect_by_dir, detect_by_file, DetectFunc};
use crate::process::ProcessCommand;
use crate::runnable::{PathSpec, Runnable};
use crate::task::Task;

/// Every task of a configuration, ready to run
pub struct TaskSet {
    tasks: BTreeMap<String, Arc<Task>>,
    runnables: BTreeMap<String, Runnable>,
    default_run: Runnable,
}

impl TaskSet {
    /// Build the task set and default run tree from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut tasks = BTreeMap::new();
        let mut runnables: BTreeMap<String, Runnable> = BTreeMap::new();

        for name in requirement_order(&config.tasks)? {
            let Some(task_config) = config.tasks.get(&name) else {
                continue;
            };
            let task = Arc::new(build_task(&name, task_config, config, &runnables)?);
            let runnable = if task_config.is_path_scoped() {
                Runnable::from(task.clone()).run_in(path_spec(task_config))
            } else {
                Runnable::from(task.clone())
            };
            debug!(task = %name, kind = runnable.kind(), "composed task");
            tasks.insert(name.clone(), task);
            runnables.insert(name, runnable);
        }

        for task in builtin_tasks() {
            runnables.insert(task.name().to_string(), Runnable::from(task.clone()));
            tasks.insert(task.name().to_string(), task);
        }

        let default_run = match &config.run {
            Some(step) => build_step(step, &runnables, "run")?,
            None => Runnable::parallel(
                config
                    .tasks
                    .iter()
                    .filter(|(_, t)| !t.manual)
                    .filter_map(|(name, _)| runnables.get(name).cloned()),
            ),
        };

        Ok(Self {
            tasks,
            runnables,
            default_run,
        })
    }

    /// Runnable invoking `name`, including its path scope
    pub fn get(&self, name: &str) -> Option<&Runnable> {
        self.runnables.get(name)
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    /// Tree run when no task is named
    pub fn default_run(&self) -> &Runnable {
        &self.default_run
    }

    /// Roots the plan is built from: the default run and every task
    pub fn plan_roots(&self) -> Vec<Runnable> {
        let mut roots = Vec::with_capacity(self.runnables.len() + 1);
        roots.push(self.default_run.clone());
        roots.extend(self.runnables.values().cloned());
        roots
    }

    /// All task names, built-ins included, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

fn build_task(
    name: &str,
    task_config: &TaskConfig,
    config: &Config,
    built: &BTreeMap<String, Runnable>,
) -> Result<Task> {
    let mut steps = Vec::with_capacity(task_config.requires.len() + task_config.run.len());
    for required in &task_config.requires {
        let runnable = built.get(required).ok_or_else(|| ConfigError::UnknownTask {
            name: required.clone(),
            referenced_from: format!("tasks.{}.requires", name),
        })?;
        steps.push(runnable.clone());
    }

    for command in &task_config.run {
        let mut process = match &config.settings.shell {
            Some(shell) => ProcessCommand::shell_with(shell, command),
            None => ProcessCommand::shell(command),
        };
        for (key, value) in &task_config.env {
            process = process.env(key, value);
        }
        steps.push(Runnable::command(process));
    }

    let body = if steps.len() == 1 {
        steps.remove(0)
    } else {
        Runnable::serial(steps)
    };

    let mut task = Task::new(name, body)
        .usage(&task_config.usage)
        .hidden(task_config.hidden)
        .global(task_config.global)
        .manual(task_config.manual);
    for (flag, flag_config) in &task_config.flags {
        task = task.flag(flag, flag_config.default.to_string(), &flag_config.help);
    }
    Ok(task)
}

fn path_spec(task_config: &TaskConfig) -> PathSpec {
    let mut spec = PathSpec::new()
        .paths(&task_config.paths)
        .exclude(task_config.exclude.iter().cloned());
    if let Some(detect) = detect_for(&task_config.detect, &task_config.detect_dirs) {
        spec = spec.detect(detect);
    }
    for (path, overrides) in &task_config.path_flags {
        let options: TaskOptions = overrides
            .iter()
            .map(|(flag, value)| (flag.clone(), value.to_string()))
            .collect();
        spec = spec.override_options(path, options);
    }
    spec
}

fn detect_for(files: &[String], dirs: &[String]) -> Option<DetectFunc> {
    match (files.is_empty(), dirs.is_empty()) {
        (true, true) => None,
        (false, true) => Some(detect_by_file(files.iter().cloned())),
        (true, false) => Some(detect_by_dir(dirs.iter().cloned())),
        (false, false) => {
            let by_file = detect_by_file(files.iter().cloned());
            let by_dir = detect_by_dir(dirs.iter().cloned());
            let description = format!("{} or {}", by_file.description(), by_dir.description());
            Some(DetectFunc::new(description, move |listing, root| {
                let mut selected = by_file.apply(listing, root);
                selected.extend(by_dir.apply(listing, root));
                selected.sort();
                selected.dedup();
                selected
            }))
        }
    }
}

fn build_step(step: &RunStep, built: &BTreeMap<String, Runnable>, location: &str) -> Result<Runnable> {
    match step {
        RunStep::Task(name) => built.get(name).cloned().ok_or_else(|| {
            ConfigError::UnknownTask {
                name: name.clone(),
                referenced_from: location.to_string(),
            }
            .into()
        }),
        RunStep::Group(group) => build_group(group, built, location),
    }
}

fn build_group(group: &GroupStep, built: &BTreeMap<String, Runnable>, location: &str) -> Result<Runnable> {
    let (children, serial) = match (&group.serial, &group.parallel) {
        (Some(children), None) => (children, true),
        (None, Some(children)) => (children, false),
        _ => {
            return Err(ConfigError::InvalidValue {
                field: location.to_string(),
                message: "group must have exactly one of 'serial' or 'parallel'".to_string(),
            }
            .into())
        }
    };

    let children = children
        .iter()
        .enumerate()
        .map(|(i, child)| build_step(child, built, &format!("{}[{}]", location, i)))
        .collect::<Result<Vec<_>>>()?;
    let node = if serial {
        Runnable::serial(children)
    } else {
        Runnable::parallel(children)
    };

    if !group.is_path_scoped() {
        return Ok(node);
    }
    let mut spec = PathSpec::new()
        .paths(&group.paths)
        .exclude(group.exclude.iter().cloned());
    if let Some(detect) = detect_for(&group.detect, &[]) {
        spec = spec.detect(detect);
    }
    Ok(node.run_in(spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;
    use crate::output::Output;
    use gantry_core::config::validate_config;
    use tempfile::TempDir;

    fn parse(toml_str: &str) -> Config {
        let config: Config = toml::from_str(toml_str).unwrap();
        validate_config(&config).unwrap();
        config
    }

    fn repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        for dir in ["api", "web", "tools/.hooks"] {
            std::fs::create_dir_all(temp.path().join(dir)).unwrap();
        }
        std::fs::write(temp.path().join("api/Cargo.toml"), "").unwrap();
        std::fs::write(temp.path().join("web/package.json"), "").unwrap();
        temp
    }

    async fn run(
        temp: &TempDir,
        set: &TaskSet,
        runnable: &Runnable,
        manual: bool,
    ) -> (std::result::Result<(), crate::error::TaskError>, String) {
        let (output, stdout, _) = Output::memory();
        let exec = Execution::builder(temp.path())
            .output(output)
            .run_manual(manual)
            .build_for(&set.plan_roots())
            .unwrap();
        let result = exec.run(runnable).await;
        (result, stdout.text())
    }

    #[test]
    fn test_tasks_and_builtins() {
        let config = parse(
            r#"
            [tasks.fmt]
            usage = "Format"
            run = ["cargo fmt"]
            detect = ["Cargo.toml"]

            [tasks.lint]
            run = ["cargo clippy"]
            hidden = true
            "#,
        );
        let set = TaskSet::from_config(&config).unwrap();

        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["fmt", "lint", "list", "matrix", "plan"]);
        assert!(matches!(set.get("fmt"), Some(Runnable::PathScoped(_))));
        assert!(matches!(set.get("lint"), Some(Runnable::Task(_))));
        assert!(set.task("lint").unwrap().is_hidden());
        assert!(matches!(set.default_run(), Runnable::Parallel(children) if children.len() == 2));
    }

    #[test]
    fn test_detect_files_and_dirs_combined() {
        let temp = repo();
        let detect = detect_for(&["Cargo.toml".to_string()], &[".hooks".to_string()]).unwrap();
        let listing = vec![
            "api".to_string(),
            "tools".to_string(),
            "web".to_string(),
        ];
        assert_eq!(detect.apply(&listing, temp.path()), vec!["api", "tools"]);
        assert_eq!(detect.description(), "file:Cargo.toml or dir:.hooks");
    }

    #[test]
    fn test_unknown_run_step() {
        let mut config = parse(
            r#"
            [tasks.fmt]
            run = ["cargo fmt"]
            "#,
        );
        config.run = Some(RunStep::Task("missing".to_string()));
        assert!(TaskSet::from_config(&config).is_err());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requirements_run_first_and_once() {
        let temp = repo();
        let config = parse(
            r#"
            [tasks.setup]
            run = ["echo setup in $GANTRY_PATH"]
            global = true

            [tasks.build]
            run = ["echo build in $GANTRY_PATH"]
            requires = ["setup"]
            paths = ["api", "web"]
            "#,
        );
        let set = TaskSet::from_config(&config).unwrap();

        let (result, stdout) = run(&temp, &set, set.get("build").unwrap(), false).await;
        result.unwrap();

        let lines: Vec<&str> = stdout.lines().collect();
        assert_eq!(lines.iter().filter(|l| l.starts_with("setup")).count(), 1);
        assert!(lines.contains(&"setup in ."));
        assert!(lines.contains(&"build in api"));
        assert!(lines.contains(&"build in web"));
        // The branch that ran the requirement flushes it ahead of its own build
        let setup_at = lines.iter().position(|l| l.starts_with("setup")).unwrap();
        assert!(lines[setup_at + 1].starts_with("build in "));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_default_run_tree_and_manual() {
        let temp = repo();
        let config = parse(
            r#"
            [tasks.fmt]
            run = ["echo fmt $GANTRY_PATH"]
            detect = ["Cargo.toml", "package.json"]

            [tasks.release]
            run = ["echo release"]
            manual = true

            [run]
            serial = ["fmt", "release"]
            "#,
        );
        let set = TaskSet::from_config(&config).unwrap();

        let (result, stdout) = run(&temp, &set, set.default_run(), false).await;
        result.unwrap();
        assert!(stdout.contains("fmt api"));
        assert!(stdout.contains("fmt web"));
        assert!(!stdout.contains("release"));

        let (result, stdout) = run(&temp, &set, set.get("release").unwrap(), true).await;
        result.unwrap();
        assert_eq!(stdout, "release\n");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_path_flags_and_env() {
        let temp = repo();
        let config = parse(
            r#"
            [tasks.lint]
            run = ["echo $GANTRY_PATH strict=$GANTRY_FLAG_STRICT mode=$MODE"]
            paths = ["api", "web"]
            env = { MODE = "ci" }

            [tasks.lint.flags.strict]
            default = false

            [tasks.lint.path_flags.api]
            strict = true
            "#,
        );
        let set = TaskSet::from_config(&config).unwrap();

        let (result, stdout) = run(&temp, &set, set.get("lint").unwrap(), false).await;
        result.unwrap();
        assert!(stdout.contains("api strict=true mode=ci"));
        assert!(stdout.contains("web strict=false mode=ci"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scoped_group() {
        let temp = repo();
        let config = parse(
            r#"
            [tasks.check]
            run = ["echo check $GANTRY_PATH"]

            [run]
            parallel = ["check"]
            paths = ["api", "web"]
            exclude = ["web"]
            "#,
        );
        let set = TaskSet::from_config(&config).unwrap();

        let (result, stdout) = run(&temp, &set, set.default_run(), false).await;
        result.unwrap();
        assert_eq!(stdout, "check api\n");
    }
}
