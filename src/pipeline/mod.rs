//! Simulation-guided execution of composite goals.
//!
//! # Steps
//! 1. **Decompose** the goal into ordered subtasks ([`decompose`])
//! 2. **Simulate** each subtask's result shape on the lightweight tier
//! 3. **Execute** each subtask with retrieved context
//! 4. **Detect deviation** between prediction and result ([`detect`])
//! 5. **Guided re-execution**, bounded by `guided_retry_limit` per subtask
//! 6. **Synthesize** results structurally ([`synthesize`])
//! 7. **Validate** completeness
//! 8. **Gap-fill**, bounded by `gap_fill_passes`
//!
//! Cancellation is checked at every step boundary and is the only error;
//! backend failures degrade into `partial`/`error`-tagged outcomes.

mod decompose;
mod deviation;
mod parse;
mod synthesize;
mod validate;

pub use decompose::{artifact_keys, decompose, CompositeGoal, Subtask, ARCHITECTURE_KEYS};
pub use deviation::{detect, Deviation, Side, SubtaskOutcome};
pub use parse::{extract_object, ValidationParseError};
pub use synthesize::synthesize;
pub use validate::{parse_validation, Validation};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agents::{AgentContext, ResultStatus};
use crate::config::Config;
use crate::llm::{scope_digest, Complexity, Generation, GenerationRequest};
use crate::prompts::{builtin, render_template};
use crate::retrieval::render_context;

const SIMULATE_TEMPERATURE: f64 = 0.1;
const EXECUTE_TEMPERATURE: f64 = 0.2;
const GUIDED_TEMPERATURE: f64 = 0.1;
const VALIDATE_TEMPERATURE: f64 = 0.1;
const GAP_FILL_TEMPERATURE: f64 = 0.3;

/// Pipeline step, used to report where cancellation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Decompose,
    Simulate,
    Execute,
    Validate,
    GapFill,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Decompose => "decompose",
            Step::Simulate => "simulate",
            Step::Execute => "execute",
            Step::Validate => "validate",
            Step::GapFill => "gap_fill",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline cancelled during {0}")]
    Cancelled(Step),
}

/// Per-subtask trace, kept for one run only.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRecord {
    pub subtask: Subtask,
    pub predicted: Value,
    pub actual: SubtaskOutcome,
    /// Deviation of the first execution, if any
    pub deviation: Option<Deviation>,
    /// Deviation left after guided re-execution, if any
    pub residual: Option<Deviation>,
    pub guided_attempts: u32,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub status: ResultStatus,
    pub artifact: Value,
    pub records: Vec<SimulationRecord>,
    pub validation: Validation,
    pub gap_fill_passes: u32,
}

impl PipelineOutput {
    pub fn guided_reexecutions(&self) -> u32 {
        self.records.iter().map(|r| r.guided_attempts).sum()
    }
}

pub struct SimulationPipeline {
    guided_retry_limit: u32,
    gap_fill_passes: u32,
    parallelism: usize,
    top_k: usize,
    min_relevance: f64,
}

impl SimulationPipeline {
    pub fn from_config(config: &Config) -> Self {
        Self {
            guided_retry_limit: config.pipeline.guided_retry_limit,
            gap_fill_passes: config.pipeline.gap_fill_passes,
            parallelism: config.pipeline.subtask_parallelism.max(1),
            top_k: config.retrieval.top_k,
            min_relevance: config.retrieval.min_relevance,
        }
    }

    /// Run every step for `goal`.
    ///
    /// # Postconditions
    /// - `records` follow decomposition order, whatever the parallelism
    /// - each subtask has at most `guided_retry_limit` guided re-executions
    /// - at most `gap_fill_passes` gap-fill requests were issued
    ///
    /// # Errors
    /// Only [`PipelineError::Cancelled`].
    pub async fn run(&self, goal: &CompositeGoal, ctx: &AgentContext) -> Result<PipelineOutput, PipelineError> {
        let workflow = ctx.workflow_id.as_deref().unwrap_or("-");

        checkpoint(ctx, Step::Decompose)?;
        let subtasks = decompose(goal);
        info!(
            workflow_id = %workflow,
            goal = %goal.task_type,
            subtasks = subtasks.len(),
            "Decomposed composite goal"
        );

        checkpoint(ctx, Step::Simulate)?;
        let simulations: Vec<_> = subtasks.iter().map(|s| self.simulate(goal, s, ctx)).collect();
        let predictions: Vec<Value> = stream::iter(simulations)
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        let executions: Vec<_> = subtasks
            .iter()
            .zip(predictions)
            .map(|(s, predicted)| self.run_subtask(goal, s, predicted, ctx))
            .collect();
        let records: Vec<SimulationRecord> = stream::iter(executions)
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        let outcomes: Vec<SubtaskOutcome> = records.iter().map(|r| r.actual.clone()).collect();
        let mut artifact = synthesize(&outcomes, artifact_keys(&goal.task_type));
        debug!(workflow_id = %workflow, "Synthesized artifact from {} subtasks", outcomes.len());

        checkpoint(ctx, Step::Validate)?;
        let mut validation = self.validate(goal, &artifact, ctx).await?;
        let mut passes = 0;
        let mut unfilled = false;
        while !validation.complete && passes < self.gap_fill_passes {
            checkpoint(ctx, Step::GapFill)?;
            info!(workflow_id = %workflow, gaps = validation.gaps.len(), pass = passes + 1, "Filling gaps");
            match self.fill_gaps(goal, &artifact, &validation.gaps, ctx).await? {
                Some(filled) => {
                    artifact = filled;
                    unfilled = false;
                }
                None => unfilled = true,
            }
            passes += 1;
            if passes < self.gap_fill_passes {
                checkpoint(ctx, Step::Validate)?;
                validation = self.validate(goal, &artifact, ctx).await?;
            }
        }

        let status = overall_status(&records, unfilled);
        info!(
            workflow_id = %workflow,
            status = %status,
            guided = records.iter().map(|r| r.guided_attempts).sum::<u32>(),
            complete = validation.complete,
            "Pipeline finished"
        );
        Ok(PipelineOutput {
            status,
            artifact,
            records,
            validation,
            gap_fill_passes: passes,
        })
    }

    async fn simulate(&self, goal: &CompositeGoal, subtask: &Subtask, ctx: &AgentContext) -> Result<Value, PipelineError> {
        let key = builtin::simulate_key(subtask.task_type.as_str());
        let choice = ctx.templates.choose(goal.agent_id.as_str(), &key, builtin::SIMULATE).await;
        let prompt = fill(&choice.body, &subtask_vars(goal, subtask));

        let mut request = GenerationRequest::new(prompt)
            .with_complexity(Complexity::Low)
            .with_temperature(SIMULATE_TEMPERATURE);
        if let Some(tier) = ctx.generation.lightweight_tier() {
            request = request.with_tier(tier);
        }
        let generation = generate(ctx, request, Step::Simulate).await?;

        Ok(match extract_object(&generation.text) {
            Ok(map) => Value::Object(map),
            Err(e) => {
                debug!(subtask = %subtask.task_type, "Unstructured simulation: {}", e.reason);
                json!({"status": "partial", "simulation": generation.text})
            }
        })
    }

    async fn run_subtask(
        &self,
        goal: &CompositeGoal,
        subtask: &Subtask,
        predicted: Value,
        ctx: &AgentContext,
    ) -> Result<SimulationRecord, PipelineError> {
        checkpoint(ctx, Step::Execute)?;
        let context = self.retrieve(subtask, ctx).await;
        let choice = ctx
            .templates
            .choose(goal.agent_id.as_str(), subtask.task_type.as_str(), builtin::EXECUTE)
            .await;
        let mut vars = subtask_vars(goal, subtask);
        vars.push(("context", context.clone()));

        let request = GenerationRequest::new(fill(&choice.body, &vars))
            .with_complexity(Complexity::Medium)
            .with_temperature(EXECUTE_TEMPERATURE);
        let generation = generate(ctx, request, Step::Execute).await?;
        let mut actual = outcome(&generation, subtask, false);

        let first = detect(&predicted, &actual, &subtask.task_type);
        let mut residual = first.clone();
        let mut guided_attempts = 0;
        while let Some(deviation) = &residual {
            if guided_attempts >= self.guided_retry_limit {
                warn!(subtask = %subtask.task_type, %deviation, "Deviation persists after guided re-execution");
                break;
            }
            warn!(subtask = %subtask.task_type, %deviation, "Deviation detected, re-executing with guidance");
            checkpoint(ctx, Step::Execute)?;
            actual = self.guided(goal, subtask, &predicted, deviation, &vars, ctx).await?;
            guided_attempts += 1;
            residual = detect(&predicted, &actual, &subtask.task_type);
        }

        if let Some(template_id) = &choice.template_id {
            let score = match (&first, &residual) {
                (None, _) => 1.0,
                (Some(_), None) => 0.5,
                (Some(_), Some(_)) => 0.0,
            };
            ctx.templates
                .record_performance_for(
                    template_id,
                    score,
                    json!({"subtask": subtask.task_type, "guided_attempts": guided_attempts}),
                )
                .await;
        }

        Ok(SimulationRecord {
            subtask: subtask.clone(),
            predicted,
            actual,
            deviation: first,
            residual,
            guided_attempts,
        })
    }

    async fn guided(
        &self,
        goal: &CompositeGoal,
        subtask: &Subtask,
        predicted: &Value,
        deviation: &Deviation,
        vars: &[(&'static str, String)],
        ctx: &AgentContext,
    ) -> Result<SubtaskOutcome, PipelineError> {
        let key = builtin::guided_key(subtask.task_type.as_str());
        let choice = ctx.templates.choose(goal.agent_id.as_str(), &key, builtin::GUIDED).await;

        let prediction = match predicted.get("simulation").and_then(Value::as_str) {
            Some(raw) => raw.to_string(),
            None => pretty(predicted),
        };
        let mut vars = vars.to_vec();
        vars.push(("prediction", prediction));
        vars.push(("deviation", deviation.to_string()));

        let request = GenerationRequest::new(fill(&choice.body, &vars))
            .with_complexity(Complexity::High)
            .with_temperature(GUIDED_TEMPERATURE)
            .without_cache();
        let generation = generate(ctx, request, Step::Execute).await?;
        Ok(outcome(&generation, subtask, true))
    }

    async fn retrieve(&self, subtask: &Subtask, ctx: &AgentContext) -> String {
        let query = format!("{} for {}", subtask.description, subtask.requirements);
        let chunks = ctx
            .retriever
            .retrieve(ctx.collection(), &query, self.top_k, self.min_relevance)
            .await;
        debug!(subtask = %subtask.task_type, chunks = chunks.len(), "Retrieved context");
        if chunks.is_empty() {
            "(no relevant context found)".to_string()
        } else {
            render_context(&chunks)
        }
    }

    async fn validate(&self, goal: &CompositeGoal, artifact: &Value, ctx: &AgentContext) -> Result<Validation, PipelineError> {
        let choice = ctx
            .templates
            .choose(goal.agent_id.as_str(), builtin::VALIDATE_KEY, builtin::VALIDATE)
            .await;
        let vars = vec![
            ("task_type", goal.task_type.to_string()),
            ("scope", scope_digest(&[&goal.requirements, &goal.constraints, artifact])),
            ("requirements", pretty(&goal.requirements)),
            ("constraints", pretty(&goal.constraints)),
            ("artifact", pretty(artifact)),
        ];
        let request = GenerationRequest::new(fill(&choice.body, &vars))
            .with_complexity(Complexity::Medium)
            .with_temperature(VALIDATE_TEMPERATURE);
        let generation = generate(ctx, request, Step::Validate).await?;

        if generation.degraded {
            warn!("Validation request degraded; treating artifact as incomplete");
            return Ok(Validation::incomplete(Vec::new()));
        }
        let validation = match parse_validation(&generation.text) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}", e);
                Validation::incomplete(Vec::new())
            }
        };
        info!(complete = validation.complete, gaps = validation.gaps.len(), "Validated artifact");
        Ok(validation)
    }

    async fn fill_gaps(
        &self,
        goal: &CompositeGoal,
        artifact: &Value,
        gaps: &[String],
        ctx: &AgentContext,
    ) -> Result<Option<Value>, PipelineError> {
        let choice = ctx
            .templates
            .choose(goal.agent_id.as_str(), builtin::GAP_FILL_KEY, builtin::GAP_FILL)
            .await;
        let gap_list = if gaps.is_empty() {
            "(none reported)".to_string()
        } else {
            gaps.iter().map(|g| format!("- {}", g)).collect::<Vec<_>>().join("\n")
        };
        let gap_values = Value::from(gaps.to_vec());
        let vars = vec![
            ("task_type", goal.task_type.to_string()),
            ("scope", scope_digest(&[&goal.requirements, artifact, &gap_values])),
            ("artifact", pretty(artifact)),
            ("gaps", gap_list),
            ("requirements", pretty(&goal.requirements)),
            ("constraints", pretty(&goal.constraints)),
        ];
        let request = GenerationRequest::new(fill(&choice.body, &vars))
            .with_complexity(Complexity::High)
            .with_temperature(GAP_FILL_TEMPERATURE);
        let generation = generate(ctx, request, Step::GapFill).await?;

        if generation.degraded {
            warn!("Gap-fill request degraded; artifact unchanged");
            return Ok(None);
        }
        match extract_object(&generation.text) {
            Ok(map) => Ok(Some(Value::Object(map))),
            Err(e) => {
                warn!("Gap-fill reply unusable, artifact unchanged: {}", e);
                Ok(None)
            }
        }
    }
}

fn checkpoint(ctx: &AgentContext, step: Step) -> Result<(), PipelineError> {
    if ctx.is_cancelled() {
        info!(%step, "Pipeline cancelled");
        return Err(PipelineError::Cancelled(step));
    }
    Ok(())
}

async fn generate(ctx: &AgentContext, request: GenerationRequest, step: Step) -> Result<Generation, PipelineError> {
    ctx.generation
        .generate(request, &ctx.cancel_token)
        .await
        .map_err(|_| PipelineError::Cancelled(step))
}

/// Classify a generation into a subtask outcome.
///
/// A degraded generation is an error. A reply from a successful call counts as
/// success even when it carries no object; the raw text becomes the result and
/// the shortfall is kept in `parse_error`. Only a fenced JSON block that fails
/// to parse is partial.
fn outcome(generation: &Generation, subtask: &Subtask, guided: bool) -> SubtaskOutcome {
    let (status, result, parse_error) = if generation.degraded {
        (ResultStatus::Error, Value::String(generation.text.clone()), None)
    } else {
        match extract_object(&generation.text) {
            Ok(map) => (ResultStatus::Success, Value::Object(map), None),
            Err(e) => {
                let status = if generation.text.contains("```json") {
                    ResultStatus::Partial
                } else {
                    ResultStatus::Success
                };
                debug!(subtask = %subtask.task_type, %status, "Unstructured reply: {}", e.reason);
                (status, Value::String(generation.text.clone()), Some(e.reason))
            }
        }
    };
    SubtaskOutcome {
        status,
        task_type: subtask.task_type.clone(),
        result,
        guided,
        model: generation.model.clone(),
        parse_error,
    }
}

/// `error` if every subtask failed; `partial` if anything is short of success.
fn overall_status(records: &[SimulationRecord], unfilled: bool) -> ResultStatus {
    if !records.is_empty() && records.iter().all(|r| r.actual.status == ResultStatus::Error) {
        return ResultStatus::Error;
    }
    let degraded = records
        .iter()
        .any(|r| r.actual.status != ResultStatus::Success || r.residual.is_some());
    if degraded || unfilled {
        ResultStatus::Partial
    } else {
        ResultStatus::Success
    }
}

fn subtask_vars(goal: &CompositeGoal, subtask: &Subtask) -> Vec<(&'static str, String)> {
    let output_keys = if subtask.output_keys.is_empty() {
        "any keys relevant to the task".to_string()
    } else {
        subtask.output_keys.join(", ")
    };
    vec![
        ("agent_id", goal.agent_id.to_string()),
        ("task_type", subtask.task_type.to_string()),
        ("description", subtask.description.clone()),
        ("requirements", pretty(&subtask.requirements)),
        ("constraints", pretty(&subtask.constraints)),
        ("output_keys", output_keys),
        ("scope", scope_digest(&[&subtask.requirements, &subtask.constraints])),
    ]
}

fn fill(body: &str, vars: &[(&str, String)]) -> String {
    let pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
    render_template(body, &pairs)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
