//! Planner Runner: prompt construction, strict-JSON plan parsing with
//! fallback extraction, and sub-planner fan-out.

use std::path::Path;

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::executor::manager::ExecutorManager;
use crate::task::{Task, TaskStore};

const MAX_TASKS: usize = 10;
const MAX_SUB_PLANNERS: usize = 5;

#[derive(Debug, Deserialize)]
struct PlanTaskJson {
    title: String,
    description: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    success_criteria: String,
    #[serde(default)]
    #[allow(dead_code)]
    priority: i32,
    #[serde(default)]
    needs_web_search: bool,
}

#[derive(Debug, Deserialize)]
struct SubPlannerJson {
    name: String,
    description: String,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    #[allow(dead_code)]
    analysis: String,
    #[serde(default)]
    tasks: Vec<PlanTaskJson>,
    #[serde(default)]
    spawn_sub_planners: Vec<SubPlannerJson>,
}

static OBJECT_WITH_ANALYSIS_AND_TASKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)\{(?:(?!\}\s*$).)*"analysis"(?:(?!\}\s*$).)*"tasks"(?:(?!\}\s*$).)*\}"#).unwrap());
static FENCED_JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());
static ANY_FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").unwrap());

/// Parse a Planner response using the three-tier fallback chain, falling
/// back to whole-output parsing, and finally an empty plan. Never invents
/// tasks.
fn parse_plan(output: &str) -> PlanJson {
    if let Some(m) = OBJECT_WITH_ANALYSIS_AND_TASKS.find(output) {
        if let Ok(plan) = serde_json::from_str::<PlanJson>(m.as_str()) {
            return plan;
        }
    }
    if let Some(caps) = FENCED_JSON_BLOCK.captures(output) {
        if let Ok(plan) = serde_json::from_str::<PlanJson>(&caps[1]) {
            return plan;
        }
    }
    if let Some(caps) = ANY_FENCED_BLOCK.captures(output) {
        if let Ok(plan) = serde_json::from_str::<PlanJson>(&caps[1]) {
            return plan;
        }
    }
    if let Ok(plan) = serde_json::from_str::<PlanJson>(output.trim()) {
        return plan;
    }
    tracing::warn!("failed to parse planner output by any strategy, returning empty plan");
    PlanJson {
        analysis: String::new(),
        tasks: Vec::new(),
        spawn_sub_planners: Vec::new(),
    }
}

pub fn build_prompt(goal: &str, cycle: u32, max_cycles: u32, summary: &TaskSummary) -> String {
    format!(
        "You are the planner for an autonomous coding session.\n\
         Goal: {goal}\n\
         Cycle {cycle} of {max_cycles}.\n\
         Completed tasks: {completed}\n\
         Failed tasks: {failed}\n\
         Pending tasks: {pending}\n\n\
         Respond with a single JSON object: {{\"analysis\": string, \"tasks\": [...], \"spawn_sub_planners\": [...]}}. \
         At most {MAX_TASKS} tasks and {MAX_SUB_PLANNERS} sub-planners.",
        completed = summary.completed,
        failed = summary.failed,
        pending = summary.pending,
    )
}

pub struct TaskSummary {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

impl TaskSummary {
    pub fn from_store(store: &TaskStore) -> Self {
        let counts = store.counts();
        Self {
            completed: counts.completed as usize,
            failed: counts.failed as usize,
            pending: counts.pending as usize,
        }
    }
}

pub struct PlannerRunner<'a> {
    pub executor: &'a ExecutorManager,
}

impl<'a> PlannerRunner<'a> {
    pub fn new(executor: &'a ExecutorManager) -> Self {
        Self { executor }
    }

    /// Run one planner pass (plus any sub-planners it spawns) and append
    /// new tasks to `store`. Returns the newly created tasks.
    pub async fn run(
        &self,
        pool: &crate::agent_pool::AgentPool,
        store: &TaskStore,
        working_dir: &Path,
        goal: &str,
        cycle: u32,
        max_cycles: u32,
    ) -> Vec<Task> {
        let summary = TaskSummary::from_store(store);
        let prompt = build_prompt(goal, cycle, max_cycles, &summary);

        let outcome = match self.executor.execute_raw(pool, &prompt, working_dir, "planner").await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::warn!(reason, "planner could not run this cycle");
                return Vec::new();
            }
        };

        let plan = parse_plan(&outcome.result.output);
        let mut created = self.materialize_tasks(store, &plan.tasks, "planner");

        if !plan.spawn_sub_planners.is_empty() {
            let areas: Vec<&SubPlannerJson> = plan.spawn_sub_planners.iter().take(MAX_SUB_PLANNERS).collect();
            let futures = areas.iter().map(|area| {
                let prompt = format!(
                    "You are a sub-planner restricted to the area \"{}\": {}\nFiles of interest: {:?}\n\
                     Respond with a single JSON object: {{\"analysis\": string, \"tasks\": [...]}}. At most 5 tasks.",
                    area.name, area.description, area.files
                );
                self.executor.execute_raw(pool, &prompt, working_dir, "sub_planner")
            });
            let results = futures::future::join_all(futures).await;
            for (area, result) in areas.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        let sub_plan = parse_plan(&outcome.result.output);
                        let capped: Vec<PlanTaskJson> = sub_plan.tasks.into_iter().take(5).collect();
                        created.extend(self.materialize_tasks(store, &capped, &format!("sub_planner:{}", area.name)));
                    }
                    Err(reason) => tracing::warn!(area = area.name, reason, "sub-planner could not run"),
                }
            }
        }

        created
    }

    fn materialize_tasks(&self, store: &TaskStore, tasks: &[PlanTaskJson], created_by: &str) -> Vec<Task> {
        let mut created = Vec::new();
        for t in tasks.iter().take(MAX_TASKS) {
            if t.title.trim().is_empty() || t.description.trim().is_empty() {
                continue;
            }
            let task = store.create_task(
                t.title.clone(),
                t.description.clone(),
                created_by.to_string(),
                t.files.clone(),
                3,
                t.needs_web_search,
            );
            store.add(task.clone());
            created.push(task);
        }
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_object() {
        let raw = r#"{"analysis":"ok","tasks":[{"title":"a","description":"b","files":[],"success_criteria":"","priority":1}]}"#;
        let plan = parse_plan(raw);
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn parses_fenced_json_block() {
        let raw = "Here is my plan:\n```json\n{\"analysis\":\"a\",\"tasks\":[{\"title\":\"x\",\"description\":\"y\"}]}\n```\nDone.";
        let plan = parse_plan(raw);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].title, "x");
    }

    #[test]
    fn parses_any_fenced_block_without_json_tag() {
        let raw = "```\n{\"analysis\":\"a\",\"tasks\":[{\"title\":\"x\",\"description\":\"y\"}]}\n```";
        let plan = parse_plan(raw);
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn returns_empty_plan_on_total_failure() {
        let plan = parse_plan("the plan is to just wing it");
        assert!(plan.tasks.is_empty());
        assert!(plan.spawn_sub_planners.is_empty());
    }

    #[test]
    fn caps_tasks_at_ten() {
        let store = TaskStore::new();
        let executor = {
            let dir = tempfile::tempdir().unwrap();
            ExecutorManager::new(Vec::new(), dir.path())
        };
        let runner = PlannerRunner::new(&executor);
        let many: Vec<PlanTaskJson> = (0..20)
            .map(|i| PlanTaskJson {
                title: format!("t{i}"),
                description: "d".to_string(),
                files: vec![],
                success_criteria: String::new(),
                priority: 0,
                needs_web_search: false,
            })
            .collect();
        let created = runner.materialize_tasks(&store, &many, "planner");
        assert_eq!(created.len(), MAX_TASKS);
    }

    #[test]
    fn skips_tasks_with_empty_title_or_description() {
        let store = TaskStore::new();
        let executor = {
            let dir = tempfile::tempdir().unwrap();
            ExecutorManager::new(Vec::new(), dir.path())
        };
        let runner = PlannerRunner::new(&executor);
        let tasks = vec![
            PlanTaskJson { title: "".to_string(), description: "d".to_string(), files: vec![], success_criteria: String::new(), priority: 0, needs_web_search: false },
            PlanTaskJson { title: "ok".to_string(), description: "d".to_string(), files: vec![], success_criteria: String::new(), priority: 0, needs_web_search: false },
        ];
        let created = runner.materialize_tasks(&store, &tasks, "planner");
        assert_eq!(created.len(), 1);
    }
}
