//! Configuration validation

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, GroupStep, RunStep, TaskConfig};

/// Names taken by built-in CLI commands
pub const RESERVED_TASK_NAMES: &[&str] = &["plan", "list", "matrix", "completions", "help"];

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    for (name, task) in &config.tasks {
        validate_task(name, task, config)?;
    }
    if let Some(run) = &config.run {
        validate_step(run, config, "run")?;
    }
    requirement_order(&config.tasks)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_task(name: &str, task: &TaskConfig, config: &Config) -> Result<()> {
    validate_name(name, "tasks")?;
    if RESERVED_TASK_NAMES.contains(&name) {
        return Err(ConfigError::InvalidValue {
            field: format!("tasks.{}", name),
            message: "name is reserved for a built-in command".to_string(),
        }
        .into());
    }

    if task.run.is_empty() && task.requires.is_empty() {
        return Err(ConfigError::MissingField(format!("tasks.{}.run", name)).into());
    }

    for required in &task.requires {
        if !config.tasks.contains_key(required) {
            return Err(ConfigError::UnknownTask {
                name: required.clone(),
                referenced_from: format!("tasks.{}.requires", name),
            }
            .into());
        }
    }

    for flag in task.flags.keys() {
        validate_name(flag, &format!("tasks.{}.flags", name))?;
    }

    if !task.path_flags.is_empty() && !task.is_path_scoped() {
        return Err(ConfigError::InvalidValue {
            field: format!("tasks.{}.path_flags", name),
            message: "path overrides need 'detect', 'detect_dirs' or 'paths'".to_string(),
        }
        .into());
    }

    for (path, overrides) in &task.path_flags {
        for flag in overrides.keys() {
            if !task.flags.contains_key(flag) {
                return Err(ConfigError::InvalidValue {
                    field: format!("tasks.{}.path_flags.{}", name, path),
                    message: format!("flag '{}' is not declared", flag),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "name cannot be empty".to_string(),
        }
        .into());
    }
    if name.chars().any(char::is_whitespace) || name.starts_with('-') {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.{}", field, name),
            message: "name must not contain whitespace or start with '-'".to_string(),
        }
        .into());
    }
    Ok(())
}

fn validate_step(step: &RunStep, config: &Config, location: &str) -> Result<()> {
    match step {
        RunStep::Task(name) => {
            if !config.tasks.contains_key(name) {
                return Err(ConfigError::UnknownTask {
                    name: name.clone(),
                    referenced_from: location.to_string(),
                }
                .into());
            }
            Ok(())
        }
        RunStep::Group(group) => {
            let children = group_children(group, location)?;
            for (i, child) in children.iter().enumerate() {
                validate_step(child, config, &format!("{}[{}]", location, i))?;
            }
            Ok(())
        }
    }
}

fn group_children<'a>(group: &'a GroupStep, location: &str) -> Result<&'a [RunStep]> {
    match (&group.serial, &group.parallel) {
        (Some(children), None) | (None, Some(children)) => Ok(children),
        _ => Err(ConfigError::InvalidValue {
            field: location.to_string(),
            message: "group must have exactly one of 'serial' or 'parallel'".to_string(),
        }
        .into()),
    }
}

/// Order task names so every task comes after the tasks it requires.
///
/// Uses Kahn's algorithm; ties are broken alphabetically so the order is
/// stable. Fails with [`ConfigError::CyclicRequirement`] when requirements
/// form a cycle.
pub fn requirement_order(tasks: &BTreeMap<String, TaskConfig>) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, task) in tasks {
        let degree = task
            .requires
            .iter()
            .filter(|r| tasks.contains_key(r.as_str()))
            .count();
        in_degree.insert(name, degree);
        for required in &task.requires {
            dependents.entry(required).or_default().push(name);
        }
    }

    let mut queue: VecDeque<&str> = tasks
        .keys()
        .map(String::as_str)
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();
    let mut sorted = Vec::with_capacity(tasks.len());

    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_string());
        if let Some(waiting) = dependents.get(name) {
            for dependent in waiting {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    if sorted.len() != tasks.len() {
        let cyclic: Vec<&str> = tasks
            .keys()
            .map(String::as_str)
            .filter(|name| !sorted.iter().any(|s| s == name))
            .collect();
        return Err(ConfigError::CyclicRequirement(cyclic.join(", ")).into());
    }

    Ok(sorted)
}
