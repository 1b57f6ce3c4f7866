//! Task resolution: predefined config lookup or generation through the
//! completion service.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, instrument};

use crate::core::generation::{
    GenerationTemplate, MarkerParser, ResponseParser, clean_task_name, compose_prompt,
    compose_task_names, filter_candidates,
};
use crate::core::task::{Difficulty, TaskSpec, TaskType};
use crate::error::{HarnessError, ProtocolError};
use crate::io::completion::{ChatMessage, CompletionRequest, CompletionService};
use crate::io::config::HarnessConfig;
use crate::io::task_files::{
    TaskListing, list_tasks, load_task_config, predefined_path, read_task_names,
};
use crate::io::task_store::GeneratedTaskStore;

const TASK_LIST_FILE: &str = "atomic_task_list.txt";

/// A resolved task and how the performer can reach its config.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    /// Store id, for generated tasks.
    pub id: Option<String>,
    pub spec: Arc<TaskSpec>,
    /// On-disk config, for predefined tasks.
    pub config_path: Option<PathBuf>,
}

pub struct TaskResolver {
    configs_root: PathBuf,
    generation_dir: PathBuf,
    denylist: Vec<String>,
    compositional_denylist: Vec<String>,
    compositional_count: usize,
    completion: Arc<dyn CompletionService>,
    parser: Box<dyn ResponseParser>,
    store: GeneratedTaskStore,
}

impl TaskResolver {
    pub fn new(
        config: &HarnessConfig,
        completion: Arc<dyn CompletionService>,
        store: GeneratedTaskStore,
    ) -> Self {
        Self {
            configs_root: config.paths.task_configs_dir.clone(),
            generation_dir: config.paths.generation_dir.clone(),
            denylist: config.denylist(false),
            compositional_denylist: config.denylist(true),
            compositional_count: config.generation.compositional_count,
            completion,
            parser: Box::new(MarkerParser),
            store,
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn store(&self) -> &GeneratedTaskStore {
        &self.store
    }

    /// Predefined tasks are looked up on disk; other task types are generated.
    #[instrument(skip_all, fields(task = name.unwrap_or("<random>"), %difficulty, %task_type))]
    pub fn resolve(
        &self,
        name: Option<&str>,
        difficulty: Difficulty,
        task_type: TaskType,
    ) -> Result<ResolvedTask> {
        if task_type.is_generated() {
            return self.generate(name, difficulty, task_type, None);
        }
        let name = name.ok_or_else(|| {
            HarnessError::from(ProtocolError::MissingField {
                field: "task_name".to_string(),
            })
        })?;
        self.load_predefined(name, difficulty)
    }

    pub fn load_predefined(&self, name: &str, difficulty: Difficulty) -> Result<ResolvedTask> {
        let path = predefined_path(&self.configs_root, difficulty, name);
        let file = load_task_config(&path)?;
        let spec = TaskSpec::from_config_file(name, difficulty, file);
        info!(id = %spec.id, commands = spec.init_commands.len(), "loaded predefined task");
        Ok(ResolvedTask {
            id: None,
            spec: Arc::new(spec),
            config_path: Some(path),
        })
    }

    /// Generate a task config and store it under a fresh id.
    ///
    /// Without a name, one is sampled from the task list; compositional tasks
    /// join `count` (default from config) sampled names.
    pub fn generate(
        &self,
        name: Option<&str>,
        difficulty: Difficulty,
        task_type: TaskType,
        count: Option<usize>,
    ) -> Result<ResolvedTask> {
        let raw_name = match name {
            Some(name) => name.to_string(),
            None => self.sample_task_name(task_type, count, &mut rand::thread_rng())?,
        };
        let template = GenerationTemplate::select(task_type, difficulty);
        let template_path = self.generation_dir.join(template.file_name());
        if !template_path.is_file() {
            return Err(HarnessError::not_found(format!(
                "generation template {}",
                template_path.display()
            ))
            .into());
        }
        let template_text = fs::read_to_string(&template_path)
            .with_context(|| format!("read {}", template_path.display()))?;

        let request = CompletionRequest::new(vec![ChatMessage::user(compose_prompt(
            &template_text,
            &raw_name,
        ))]);
        let reply = self
            .completion
            .complete(&request)
            .with_context(|| format!("generate task config for {raw_name}"))?;
        let generated = self.parser.parse(&raw_name, &reply)?;

        let spec = Arc::new(TaskSpec {
            id: GeneratedTaskStore::mint_id(),
            name: clean_task_name(&raw_name),
            description: generated.description,
            difficulty,
            init_commands: generated.init_commands,
            generated: true,
            thinking: generated.thinking,
        });
        self.store.insert(Arc::clone(&spec));
        info!(id = %spec.id, name = %spec.name, commands = spec.init_commands.len(), "generated task");
        Ok(ResolvedTask {
            id: Some(spec.id.clone()),
            spec,
            config_path: None,
        })
    }

    pub fn resolve_generated(&self, id: &str) -> Result<Arc<TaskSpec>> {
        self.store
            .get(id)
            .ok_or_else(|| HarnessError::not_found(format!("generated task {id}")).into())
    }

    pub fn list_tasks(&self, difficulty: Option<Difficulty>) -> Result<Vec<TaskListing>> {
        list_tasks(&self.configs_root, difficulty)
    }

    /// Draw a task name from the filtered task list.
    pub fn sample_task_name<R: Rng + ?Sized>(
        &self,
        task_type: TaskType,
        count: Option<usize>,
        rng: &mut R,
    ) -> Result<String> {
        let compositional = task_type == TaskType::Compositional;
        let denylist = if compositional {
            &self.compositional_denylist
        } else {
            &self.denylist
        };
        let list_path = self.generation_dir.join(TASK_LIST_FILE);
        if !list_path.is_file() {
            return Err(
                HarnessError::not_found(format!("task list {}", list_path.display())).into(),
            );
        }
        let names = read_task_names(&list_path)?.join("\n");
        let candidates = filter_candidates(&names, denylist);
        if candidates.is_empty() {
            return Err(HarnessError::not_found("candidate tasks after filtering").into());
        }

        let draws = if compositional {
            count.unwrap_or(self.compositional_count).max(1)
        } else {
            1
        };
        let sampled: Vec<String> = (0..draws)
            .filter_map(|_| candidates.choose(rng).cloned())
            .collect();
        compose_task_names(&sampled, rng)
            .ok_or_else(|| HarnessError::not_found("candidate tasks after filtering").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedCompletion, task_workspace};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::Path;

    const REPLY: &str = "- In order to hunt a cow, the agent needs a sword.\n\
- Task description: Hunt one cow in the plains\n\
- custom_init_commands:\n  - /give @s minecraft:iron_sword\n  - /time set day\n";

    fn config(root: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.paths.task_configs_dir = root.join("task_configs");
        config.paths.generation_dir = root.join("task_generation");
        config
    }

    fn resolver(root: &Path, completion: Arc<ScriptedCompletion>) -> TaskResolver {
        TaskResolver::new(&config(root), completion, GeneratedTaskStore::new())
    }

    #[test]
    fn predefined_task_loads_from_disk() {
        let temp = task_workspace(&[("collect_wood", Difficulty::Simple)]).expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        let resolved = resolver
            .resolve(Some("collect_wood"), Difficulty::Simple, TaskType::Predefined)
            .expect("resolve");
        assert_eq!(resolved.id, None);
        assert_eq!(resolved.spec.id, "simple/collect_wood");
        assert_eq!(resolved.spec.description, "collect wood in the overworld");
        assert_eq!(
            resolved.spec.init_commands,
            vec!["/give @s minecraft:iron_axe".to_string()]
        );
        assert!(resolved.config_path.expect("path").ends_with("collect_wood.yaml"));
    }

    #[test]
    fn missing_predefined_task_is_not_found() {
        let temp = task_workspace(&[]).expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        let err = resolver
            .resolve(Some("fly_to_moon"), Difficulty::Hard, TaskType::Predefined)
            .expect_err("missing");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::NotFound { .. })
        ));
    }

    #[test]
    fn predefined_without_name_is_a_protocol_error() {
        let temp = task_workspace(&[]).expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        let err = resolver
            .resolve(None, Difficulty::Simple, TaskType::Predefined)
            .expect_err("no name");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::Protocol(ProtocolError::MissingField { .. }))
        ));
    }

    #[test]
    fn generated_task_is_stored_and_re_resolvable() {
        let temp = task_workspace(&[]).expect("workspace");
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(REPLY);
        let resolver = resolver(temp.path(), completion.clone());

        let resolved = resolver
            .resolve(Some("Hunt a Cow"), Difficulty::Hard, TaskType::Atomic)
            .expect("generate");
        let id = resolved.id.clone().expect("generated id");
        assert_eq!(resolved.spec.name, "hunt_a_cow");
        assert_eq!(resolved.spec.description, "Hunt one cow in the plains");
        assert!(resolved.spec.generated);
        assert_eq!(resolved.spec.init_commands.len(), 2);
        assert_eq!(resolver.resolve_generated(&id).expect("stored"), resolved.spec);

        let prompt = completion.requests()[0].messages[0].text();
        assert!(prompt.starts_with("Template atomic_hard_system_prompt.txt."));
        assert!(prompt.ends_with("The task I want to complete: Hunt a Cow"));
    }

    #[test]
    fn reply_without_command_marker_fails_generation() {
        let temp = task_workspace(&[]).expect("workspace");
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply("- Task description: something vague");
        let resolver = resolver(temp.path(), completion);
        let err = resolver
            .resolve(Some("mine iron ore"), Difficulty::Simple, TaskType::Atomic)
            .expect_err("parse failure");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::GenerationParse { .. })
        ));
        assert!(resolver.store().is_empty());
    }

    #[test]
    fn unknown_generated_id_is_not_found() {
        let temp = task_workspace(&[]).expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        assert!(resolver.resolve_generated("nope").is_err());
    }

    #[test]
    fn sampling_skips_denied_keywords() {
        let temp = task_workspace(&[]).expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let name = resolver
                .sample_task_name(TaskType::Atomic, None, &mut rng)
                .expect("sample");
            assert!(!name.contains("redstone"), "{name}");
        }
        for _ in 0..20 {
            let name = resolver
                .sample_task_name(TaskType::Compositional, Some(2), &mut rng)
                .expect("sample");
            assert!(name.contains(" or "), "{name}");
            assert!(!name.contains("craft"), "{name}");
        }
    }

    #[test]
    fn lists_predefined_tasks() {
        let temp = task_workspace(&[
            ("collect_wood", Difficulty::Simple),
            ("build_house", Difficulty::Hard),
        ])
        .expect("workspace");
        let resolver = resolver(temp.path(), Arc::new(ScriptedCompletion::new()));
        let all = resolver.list_tasks(None).expect("list");
        assert_eq!(all.len(), 2);
        let hard = resolver.list_tasks(Some(Difficulty::Hard)).expect("list");
        assert_eq!(hard[0].name, "build_house");
    }
}
