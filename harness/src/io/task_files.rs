//! Task configuration files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::task::{Difficulty, TaskConfigFile};
use crate::error::HarnessError;

/// Difficulties that have predefined config directories.
pub const LISTED_DIFFICULTIES: [Difficulty; 2] = [Difficulty::Simple, Difficulty::Hard];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListing {
    pub name: String,
    pub difficulty: Difficulty,
}

pub fn predefined_path(root: &Path, difficulty: Difficulty, name: &str) -> PathBuf {
    root.join(difficulty.as_str()).join(format!("{name}.yaml"))
}

/// Read a task config document. A missing file is `NotFound`.
pub fn load_task_config(path: &Path) -> Result<TaskConfigFile> {
    if !path.is_file() {
        return Err(HarnessError::not_found(format!("task config {}", path.display())).into());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_yaml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Predefined tasks under `root`, sorted by difficulty then name.
pub fn list_tasks(root: &Path, difficulty: Option<Difficulty>) -> Result<Vec<TaskListing>> {
    let difficulties = match difficulty {
        Some(difficulty) => vec![difficulty],
        None => LISTED_DIFFICULTIES.to_vec(),
    };
    let mut tasks = Vec::new();
    for difficulty in difficulties {
        let dir = root.join(difficulty.as_str());
        if !dir.is_dir() {
            continue;
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry.context("read entry")?.path();
            if path.extension().is_some_and(|ext| ext == "yaml")
                && let Some(stem) = path.file_stem()
            {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        tasks.extend(
            names
                .into_iter()
                .map(|name| TaskListing { name, difficulty }),
        );
    }
    Ok(tasks)
}

/// Task names from a newline-separated file, blanks skipped.
pub fn read_task_names(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn load_parses_yaml_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = predefined_path(temp.path(), Difficulty::Simple, "collect_wood");
        write(
            &path,
            "text: Collect wood\ncustom_init_commands:\n  - /give @s minecraft:iron_axe\n",
        );
        let file = load_task_config(&path).expect("load");
        assert_eq!(file.text.as_deref(), Some("Collect wood"));
        assert_eq!(file.custom_init_commands.len(), 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_task_config(&temp.path().join("nope.yaml")).expect_err("missing");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::NotFound { .. })
        ));
    }

    #[test]
    fn list_tasks_sorted_and_filtered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("simple/b.yaml"), "text: b\n");
        write(&root.join("simple/a.yaml"), "text: a\n");
        write(&root.join("simple/notes.txt"), "skip");
        write(&root.join("hard/c.yaml"), "text: c\n");

        let all = list_tasks(root, None).expect("list");
        let names: Vec<&str> = all.iter().map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(all[2].difficulty, Difficulty::Hard);

        let hard = list_tasks(root, Some(Difficulty::Hard)).expect("list");
        assert_eq!(hard.len(), 1);
    }

    #[test]
    fn task_names_skip_blank_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.txt");
        fs::write(&path, "collect_wood\n\n  mine_iron  \n").expect("write");
        assert_eq!(
            read_task_names(&path).expect("read"),
            vec!["collect_wood".to_string(), "mine_iron".to_string()]
        );
    }
}
