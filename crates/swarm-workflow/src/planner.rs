//! Planner (C7): uses a text-generation client to produce an ordered task
//! list from a user request.

use persistence_core::TaskDefinition;
use serde::Deserialize;
use tracing::warn;

use crate::error::WorkflowError;
use crate::text_gen::TextGenClient;

const PLANNER_SYSTEM_PROMPT: &str = "You are a workflow planner. Given a user request, respond \
with ONLY a JSON array of task objects, each with string fields \"name\", \"description\", and \
\"promptTemplate\". Do not include any other text. \"promptTemplate\" may reference \
{{user_request}}, {{prev_output}}, or an earlier task's \"name\" as {{name}}.";

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    description: String,
    #[serde(rename = "promptTemplate")]
    prompt_template: String,
}

pub struct Planner;

impl Planner {
    /// Build the strict planning prompt for `user_request`.
    pub fn build_prompt(user_request: &str) -> String {
        format!("{PLANNER_SYSTEM_PROMPT}\n\nUser request:\n{user_request}")
    }

    /// Call `client` and parse its response into an ordered task list. A
    /// parse failure or empty result is a `PlannerFailure` carrying the raw
    /// model output.
    pub async fn plan(
        client: &dyn TextGenClient,
        user_request: &str,
    ) -> Result<Vec<TaskDefinition>, WorkflowError> {
        let prompt = Self::build_prompt(user_request);
        let raw = client.generate(&prompt).await.map_err(|e| {
            WorkflowError::PlannerFailure {
                raw: format!("client failure: {e}"),
            }
        })?;

        Self::parse(&raw)
    }

    /// Extract the substring between the first `[` and the last `]` and
    /// parse it as a JSON array of task objects.
    pub fn parse(raw: &str) -> Result<Vec<TaskDefinition>, WorkflowError> {
        let json_slice = extract_array_slice(raw).ok_or_else(|| WorkflowError::PlannerFailure {
            raw: raw.to_string(),
        })?;

        let raw_tasks: Vec<RawTask> =
            serde_json::from_str(json_slice).map_err(|_| WorkflowError::PlannerFailure {
                raw: raw.to_string(),
            })?;

        if raw_tasks.is_empty() {
            return Err(WorkflowError::PlannerFailure {
                raw: raw.to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        let mut tasks = Vec::with_capacity(raw_tasks.len());
        for t in raw_tasks {
            if t.name.trim().is_empty() || t.name.chars().any(char::is_whitespace) {
                return Err(WorkflowError::PlannerFailure {
                    raw: raw.to_string(),
                });
            }
            if !seen.insert(t.name.clone()) {
                return Err(WorkflowError::argument(format!(
                    "duplicate task name in plan: {}",
                    t.name
                )));
            }
            tasks.push(TaskDefinition::new(t.name, t.description, t.prompt_template));
        }

        Ok(tasks)
    }
}

fn extract_array_slice(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        warn!("planner output has ']' before '[', rejecting");
        return None;
    }
    Some(&raw[start..=end])
}
