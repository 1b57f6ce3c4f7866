//! Performer-side decision loop: a language-model planner splits the task
//! into subtasks, and each control step is delegated to a low-level policy or,
//! without one, to primitive actions suggested by the completion service.
//!
//! Phases: `NoPlan → Planning → ExecutingSubtask ⇄ Advancing → Done`.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::actions::{Action, exploration_fallback, parse_action_reply};
use crate::core::observation::Observation;
use crate::core::plan::{Plan, PlanState, extract_json};
use crate::core::tracker::StateTracker;
use crate::io::completion::{ChatMessage, CompletionRequest, CompletionService};
use crate::io::config::PolicyConfig;
use crate::io::prompt::PromptEngine;

/// Simulator-adjacent controller that picks raw actions from observations.
pub trait LowLevelPolicy: Send {
    fn act(&mut self, observation: &Observation, subtask: &str) -> Result<Action>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPhase {
    NoPlan,
    Planning,
    ExecutingSubtask,
    Advancing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySettings {
    pub max_steps_per_subtask: u32,
    pub max_replans: u32,
}

impl From<&PolicyConfig> for PolicySettings {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_steps_per_subtask: config.max_steps_per_subtask,
            max_replans: config.max_replans,
        }
    }
}

/// Asks the completion service for a plan; never fails.
pub struct SubtaskPlanner {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptEngine>,
}

impl SubtaskPlanner {
    pub fn new(completion: Arc<dyn CompletionService>, prompts: Arc<PromptEngine>) -> Self {
        Self {
            completion,
            prompts,
        }
    }

    pub fn plan(&self, task: &str, state: &StateTracker) -> Plan {
        match self.try_plan(task, state) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(err = %err, "planning failed, using single-subtask plan");
                Plan::fallback(task, &format!("{err:#}"))
            }
        }
    }

    fn try_plan(&self, task: &str, state: &StateTracker) -> Result<Plan> {
        let inventory = serde_json::to_string_pretty(&state.inventory)?;
        let prompts =
            self.prompts
                .planner(task, &inventory, &state.position_text(), state.completed())?;
        let reply = self.completion.complete(&CompletionRequest::json(vec![
            ChatMessage::system(prompts.system),
            ChatMessage::user(prompts.user),
        ]))?;
        Plan::from_reply(&reply)
    }
}

/// Turns a subtask into primitive action names, buffered and drained one
/// per step.
pub struct ActionMapper {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptEngine>,
    buffer: VecDeque<String>,
}

impl ActionMapper {
    pub fn new(completion: Arc<dyn CompletionService>, prompts: Arc<PromptEngine>) -> Self {
        Self {
            completion,
            prompts,
            buffer: VecDeque::new(),
        }
    }

    /// Primitive sequence for a subtask; the exploration sequence on any failure.
    pub fn actions_for(&self, subtask: &str, state: &StateTracker) -> Vec<String> {
        match self.try_actions(subtask, state) {
            Ok(actions) if !actions.is_empty() => actions,
            Ok(_) => {
                debug!("mapper returned no usable actions");
                exploration_fallback()
            }
            Err(err) => {
                warn!(err = %err, "action mapping failed, exploring");
                exploration_fallback()
            }
        }
    }

    fn try_actions(&self, subtask: &str, state: &StateTracker) -> Result<Vec<String>> {
        let prompts = self.prompts.mapper(subtask, &state.summary())?;
        let reply = self.completion.complete(&CompletionRequest::json(vec![
            ChatMessage::system(prompts.system),
            ChatMessage::user(prompts.user),
        ]))?;
        parse_action_reply(&extract_json(&reply)?)
    }

    /// Next buffered primitive, querying for a new sequence when empty.
    pub fn next_action(&mut self, subtask: &str, state: &StateTracker) -> String {
        if self.buffer.is_empty() {
            self.buffer.extend(self.actions_for(subtask, state));
        }
        self.buffer
            .pop_front()
            .unwrap_or_else(|| "move_forward".to_string())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanningEvent {
    Initial,
    Replan,
}

#[derive(Debug, Clone)]
struct ReasoningEntry {
    event: PlanningEvent,
    task: String,
    plan: Plan,
}

pub struct HybridPolicy {
    task: String,
    settings: PolicySettings,
    planner: SubtaskPlanner,
    mapper: ActionMapper,
    low_level: Option<Box<dyn LowLevelPolicy>>,
    tracker: StateTracker,
    plan: Option<PlanState>,
    phase: PolicyPhase,
    replans: u32,
    reasoning_log: Vec<ReasoningEntry>,
}

impl HybridPolicy {
    pub fn new(
        task: &str,
        completion: Arc<dyn CompletionService>,
        settings: PolicySettings,
    ) -> Self {
        let prompts = Arc::new(PromptEngine::new());
        Self {
            task: task.trim().to_string(),
            settings,
            planner: SubtaskPlanner::new(Arc::clone(&completion), Arc::clone(&prompts)),
            mapper: ActionMapper::new(completion, prompts),
            low_level: None,
            tracker: StateTracker::default(),
            plan: None,
            phase: PolicyPhase::NoPlan,
            replans: 0,
            reasoning_log: Vec::new(),
        }
    }

    pub fn with_low_level(mut self, policy: Box<dyn LowLevelPolicy>) -> Self {
        self.low_level = Some(policy);
        self
    }

    pub fn phase(&self) -> PolicyPhase {
        self.phase
    }

    pub fn plan_state(&self) -> Option<&PlanState> {
        self.plan.as_ref()
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Plan the task from the given starting observation.
    pub fn initialize_plan(&mut self, observation: &Observation) -> &Plan {
        self.tracker.update(observation);
        self.plan_with(PlanningEvent::Initial)
    }

    fn plan_with(&mut self, event: PlanningEvent) -> &Plan {
        self.phase = PolicyPhase::Planning;
        let plan = self.planner.plan(&self.task, &self.tracker);
        info!(
            ?event,
            subtasks = plan.subtasks.len(),
            estimated_steps = ?plan.estimated_steps,
            "plan ready"
        );
        match (event, self.plan.as_mut()) {
            (PlanningEvent::Replan, Some(state)) => state.extend(plan.subtasks.iter().cloned()),
            _ => {
                self.plan = Some(PlanState::new(
                    plan.subtasks.clone(),
                    self.settings.max_steps_per_subtask,
                ));
            }
        }
        self.mapper.clear();
        self.reasoning_log.push(ReasoningEntry {
            event,
            task: self.task.clone(),
            plan,
        });
        self.phase = PolicyPhase::ExecutingSubtask;
        &self.reasoning_log[self.reasoning_log.len() - 1].plan
    }

    /// Choose the action for this control step.
    pub fn next_action(&mut self, observation: &Observation) -> Action {
        self.tracker.update(observation);
        if self.plan.is_none() {
            self.plan_with(PlanningEvent::Initial);
        }
        self.advance_if_due();

        let subtask = self
            .plan
            .as_ref()
            .and_then(PlanState::current)
            .unwrap_or(self.task.as_str())
            .to_string();

        let action = match self.low_level.as_mut().map(|policy| policy.act(observation, &subtask)) {
            Some(Ok(action)) => {
                self.tracker.record_action("low_level");
                action
            }
            Some(Err(err)) => {
                debug!(err = %err, "low-level policy failed, using action mapper");
                self.mapped_action(&subtask)
            }
            None => self.mapped_action(&subtask),
        };

        if let Some(plan) = self.plan.as_mut() {
            plan.record_step();
        }
        action
    }

    fn mapped_action(&mut self, subtask: &str) -> Action {
        let name = self.mapper.next_action(subtask, &self.tracker);
        self.tracker.record_action(&name);
        Action::from_primitive(&name).unwrap_or_else(Action::noop)
    }

    fn advance_if_due(&mut self) {
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        if !plan.should_advance() {
            return;
        }
        self.phase = PolicyPhase::Advancing;
        if let Some(finished) = plan.advance() {
            self.tracker.mark_complete(&finished);
            info!(
                subtask = %finished,
                index = plan.current_index,
                total = plan.subtasks.len(),
                "subtask finished"
            );
        }
        self.mapper.clear();
        if plan.is_exhausted() && self.replans < self.settings.max_replans {
            self.replans += 1;
            self.plan_with(PlanningEvent::Replan);
        } else {
            self.phase = PolicyPhase::ExecutingSubtask;
        }
    }

    /// Mark the episode over.
    pub fn finish(&mut self) {
        self.phase = PolicyPhase::Done;
    }

    /// Markdown record of every planning event and the subtasks completed.
    pub fn reasoning_summary(&self) -> String {
        let mut summary = String::from("# Agent Reasoning Summary\n\n");
        for entry in &self.reasoning_log {
            let heading = match entry.event {
                PlanningEvent::Initial => "Initial Plan",
                PlanningEvent::Replan => "Replan",
            };
            let _ = write!(
                summary,
                "## {heading}\nTask: {}\n\nReasoning: {}\n\nSubtasks:\n",
                entry.task, entry.plan.reasoning
            );
            for (index, subtask) in entry.plan.subtasks.iter().enumerate() {
                let _ = writeln!(summary, "{}. {subtask}", index + 1);
            }
            summary.push('\n');
        }
        let completed = self.tracker.completed();
        let _ = writeln!(
            summary,
            "## Progress\nCompleted subtasks: {}",
            completed.len()
        );
        for subtask in completed {
            let _ = writeln!(summary, "- [x] {subtask}");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;
    use anyhow::bail;

    const TWO_STEP_PLAN: &str = r#"{"reasoning":"need wood first","subtasks":["find a tree","chop the tree"],"current_subtask":"find a tree","estimated_steps":40}"#;

    struct Noop;

    impl LowLevelPolicy for Noop {
        fn act(&mut self, _observation: &Observation, _subtask: &str) -> Result<Action> {
            Ok(Action::noop())
        }
    }

    struct Broken;

    impl LowLevelPolicy for Broken {
        fn act(&mut self, _observation: &Observation, _subtask: &str) -> Result<Action> {
            bail!("model not loaded")
        }
    }

    fn settings(max_steps_per_subtask: u32, max_replans: u32) -> PolicySettings {
        PolicySettings {
            max_steps_per_subtask,
            max_replans,
        }
    }

    #[test]
    fn planning_failure_falls_back_to_the_whole_task() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_error("rate limited");
        let mut policy = HybridPolicy::new("collect wood", completion, settings(500, 0));
        let plan = policy.initialize_plan(&Observation::default()).clone();
        assert_eq!(plan.subtasks, vec!["collect wood".to_string()]);
        assert!(plan.reasoning.starts_with("Error in planning: rate limited"));
        assert_eq!(plan.estimated_steps, Some(1000));
        assert_eq!(policy.phase(), PolicyPhase::ExecutingSubtask);
    }

    #[test]
    fn planner_requests_json_mode_with_state() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(TWO_STEP_PLAN);
        let mut policy = HybridPolicy::new("collect wood", completion.clone(), settings(500, 0));
        let observation = Observation {
            inventory: [("oak_log".to_string(), 2)].into_iter().collect(),
            ..Observation::default()
        };
        policy.initialize_plan(&observation);

        let request = &completion.requests()[0];
        assert!(request.json_mode);
        assert!(request.messages[1].text().contains("\"oak_log\": 2"));
        assert_eq!(
            policy.plan_state().expect("plan").current(),
            Some("find a tree")
        );
    }

    #[test]
    fn subtasks_advance_after_step_budget() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(TWO_STEP_PLAN);
        let mut policy = HybridPolicy::new("collect wood", completion, settings(3, 0))
            .with_low_level(Box::new(Noop));
        let observation = Observation::default();

        for _ in 0..3 {
            policy.next_action(&observation);
        }
        assert_eq!(policy.plan_state().expect("plan").current_index, 0);

        policy.next_action(&observation);
        let plan = policy.plan_state().expect("plan");
        assert_eq!(plan.current_index, 1);
        assert_eq!(plan.steps_in_current, 1);
        assert_eq!(policy.tracker().completed(), ["find a tree".to_string()]);

        for _ in 0..10 {
            policy.next_action(&observation);
        }
        let plan = policy.plan_state().expect("plan");
        assert_eq!(plan.current_index, 2);
        assert!(plan.is_exhausted());
    }

    #[test]
    fn exhausted_plan_replans_once() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(TWO_STEP_PLAN);
        completion.push_reply(
            r#"{"reasoning":"try again","subtasks":["craft planks"],"current_subtask":"craft planks","estimated_steps":10}"#,
        );
        let mut policy = HybridPolicy::new("collect wood", completion.clone(), settings(2, 1))
            .with_low_level(Box::new(Noop));
        let observation = Observation::default();
        for _ in 0..12 {
            policy.next_action(&observation);
        }
        assert_eq!(completion.requests().len(), 2);
        let summary = policy.reasoning_summary();
        assert!(summary.starts_with("# Agent Reasoning Summary\n\n## Initial Plan\n"));
        assert!(summary.contains("## Replan\nTask: collect wood\n\nReasoning: try again"));
        assert!(summary.contains("Completed subtasks: 3"));
        assert!(summary.contains("- [x] craft planks"));
    }

    #[test]
    fn replan_keeps_the_subtask_index_moving_forward() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(r#"{"subtasks":["a","b"]}"#);
        completion.push_reply(r#"{"subtasks":["c"]}"#);
        let mut policy = HybridPolicy::new("collect wood", completion, settings(2, 1))
            .with_low_level(Box::new(Noop));
        let observation = Observation::default();

        let mut previous = 0;
        for step in 0..10 {
            policy.next_action(&observation);
            let plan = policy.plan_state().expect("plan");
            assert!(
                plan.current_index >= previous,
                "index went from {previous} to {} at step {step}",
                plan.current_index
            );
            assert!(plan.current_index <= plan.subtasks.len());
            previous = plan.current_index;
        }

        let plan = policy.plan_state().expect("plan");
        assert_eq!(plan.subtasks, ["a", "b", "c"]);
        assert_eq!(plan.current_index, 3);
        assert_eq!(plan.completed_subtasks.len(), 3);
    }

    #[test]
    fn mapper_actions_are_buffered() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply(TWO_STEP_PLAN);
        completion.push_reply(r#"{"actions": ["attack", "jump"]}"#);
        let mut policy = HybridPolicy::new("collect wood", completion.clone(), settings(500, 0));
        let observation = Observation::default();

        assert!(policy.next_action(&observation).pressed("attack"));
        assert!(policy.next_action(&observation).pressed("jump"));
        // Queue is empty now: the mapper falls back to exploring.
        assert!(policy.next_action(&observation).pressed("forward"));
        assert_eq!(completion.requests().len(), 3);
        assert_eq!(policy.tracker().recent_actions()[..2], ["attack", "jump"]);
    }

    #[test]
    fn broken_low_level_policy_uses_mapper() {
        let completion = Arc::new(ScriptedCompletion::new());
        let mut policy = HybridPolicy::new("collect wood", completion, settings(500, 0))
            .with_low_level(Box::new(Broken));
        let action = policy.next_action(&Observation::default());
        assert!(action.pressed("forward"));
    }
}
