//! Generic prompt bodies used when no stored template matches.
//!
//! Placeholders: `{agent_id}`, `{task_type}`, `{description}`, `{requirements}`,
//! `{constraints}`, `{context}`, `{output_keys}`, `{prediction}`, `{deviation}`,
//! `{artifact}`, `{gaps}`, `{input}`, `{scope}`.
//!
//! Every body opens with a `QUERY:` header naming the step, the subtask and a
//! digest of its inputs (`{scope}`), followed by a blank line. The response
//! cache keys on that header, never on the interpolated payload below it.

pub const SIMULATE: &str = "QUERY: simulate {task_type} \"{description}\" [{scope}]

You are the {agent_id} agent's simulation module.

TASK: Predict the result of the subtask \"{description}\" (type: {task_type}) without performing it.

REQUIREMENTS:
{requirements}

CONSTRAINTS:
{constraints}

Return ONLY a JSON object with:
- status: \"success\"
- task_type: \"{task_type}\"
- expected_keys: array of the top-level keys the real result will contain (expected: {output_keys})
- a one-line sketch under each expected key";

pub const EXECUTE: &str = "QUERY: execute {task_type} \"{description}\" [{scope}]

You are the {agent_id} agent.

TASK: {description} (type: {task_type})

REQUIREMENTS:
{requirements}

CONSTRAINTS:
{constraints}

RELEVANT CONTEXT:
{context}

Return the result as a single JSON object wrapped in ```json fences, with top-level keys: {output_keys}.";

pub const GUIDED: &str = "QUERY: guided {task_type} \"{description}\" [{scope}]

You are the {agent_id} agent.

TASK: {description} (type: {task_type})

REQUIREMENTS:
{requirements}

CONSTRAINTS:
{constraints}

RELEVANT CONTEXT:
{context}

PREDICTED RESULT SHAPE:
{prediction}

The previous attempt deviated from the prediction: {deviation}
Follow the predicted shape and include every expected key.
Return the result as a single JSON object wrapped in ```json fences.";

pub const VALIDATE: &str = "QUERY: validate {task_type} [{scope}]

Review the architecture artifact below for completeness against the requirements.

REQUIREMENTS:
{requirements}

ARTIFACT:
{artifact}

Return ONLY a JSON object of the form {\"complete\": true|false, \"gaps\": [\"...\"]}.";

pub const GAP_FILL: &str = "QUERY: gap_fill {task_type} [{scope}]

The architecture artifact below is incomplete.

ARTIFACT:
{artifact}

GAPS:
{gaps}

REQUIREMENTS:
{requirements}

Return the completed artifact as a single JSON object with the same top-level keys, filling every gap.";

pub const ANALYSIS: &str = "QUERY: {agent_id} {task_type} \"{description}\" [{scope}]

You are the {agent_id} agent. Please complete the task: {task_type}

TASK: {description}

INPUT:
{input}

RELEVANT CONTEXT:
{context}

Return the result as a single JSON object.";

/// Template task-type key for the simulation prompt of `task_type`.
pub fn simulate_key(task_type: &str) -> String {
    format!("simulate_{}", task_type)
}

/// Template task-type key for guided re-execution of `task_type`.
pub fn guided_key(task_type: &str) -> String {
    format!("guided_{}", task_type)
}

pub const VALIDATE_KEY: &str = "validate_architecture";
pub const GAP_FILL_KEY: &str = "gap_fill";
