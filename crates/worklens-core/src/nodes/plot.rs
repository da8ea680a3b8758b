//! Chart nodes: the auto-plot decision, script generation, and rendering.
//!
//! Generation and rendering form a bounded retry loop. `create plot` owns
//! the attempt counter and feeds the previous script plus its error back
//! into the prompt on retries; `run plot` only executes and records, never
//! deciding to retry itself. The conditional edge out of `run plot` closes
//! the loop while attempts remain, so the bound holds even if a node
//! misbehaves. Plot failures are recorded in state, never fatal: the answer
//! stage runs regardless.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{Instrument, info_span};

use worklens_types::state::{TurnState, WantsPlot};

use crate::format::strip_code_fence;
use crate::llm::{BoxLlmProvider, complete_structured};
use crate::plot::PlotRunner;
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

const PLOT_DECISION_SYSTEM_PROMPT: &str = r#"Decide whether a chart would help answer the user's question, given the query result below.

Say "yes" only when the result has a shape worth seeing: a trend over time, a comparison across several categories, a distribution. Say "no" for single values, one or two rows, empty results, or error messages.

Query result:
{result}

Respond with a single JSON object."#;

const PLOT_CREATE_SYSTEM_PROMPT: &str = r#"Write a standalone Python matplotlib script that charts the query result below to answer the user's question.

Rules:
- Use only matplotlib (`import matplotlib.pyplot as plt`) and the Python standard library; embed the data as literals from the result below.
- Save the figure by calling plt.savefig(SAVE_PATH). SAVE_PATH is provided by the host; reference it as a bare name, never assign or redefine it.
- Label axes, add a title, and keep the chart readable without the surrounding conversation.
- Return only the code.

Query result:
{result}"#;

const PLOT_RETRY_SYSTEM_PROMPT: &str = r#"Your previous matplotlib script failed. Fix it and return the corrected script.

Previous script:
{prev_code}

Error:
{prev_error}

Rules:
- Use only matplotlib (`import matplotlib.pyplot as plt`) and the Python standard library; embed the data as literals from the result below.
- Save the figure by calling plt.savefig(SAVE_PATH). SAVE_PATH is provided by the host; reference it as a bare name, never assign or redefine it.
- Return only the corrected code.

Query result:
{result}"#;

/// Binary decision for the auto branch. Deliberately not [`WantsPlot`]:
/// "auto" must resolve here, so the model only gets the two real options.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum PlotChoice {
    Yes,
    No,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PlotDecision {
    /// Whether a chart would help answer the question.
    plot: PlotChoice,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GeneratedScript {
    /// Syntactically valid Python code producing a matplotlib figure.
    code: String,
}

// ---------------------------------------------------------------------------
// Auto-plot decision
// ---------------------------------------------------------------------------

pub struct PlotDecisionNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl PlotDecisionNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for PlotDecisionNode {
    fn name(&self) -> &'static str {
        node_name::CHECK_PLOT_NEEDED
    }

    fn label(&self) -> &'static str {
        "check if plot needed"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let system = PLOT_DECISION_SYSTEM_PROMPT.replace("{result}", &state.result.join("\n\n"));

        let span = info_span!(
            "gen_ai.check_plot_needed",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: PlotDecision = complete_structured(
            &self.provider,
            &self.model,
            "PlotDecision",
            &system,
            &state.question,
        )
        .instrument(span)
        .await?;

        state.wants_plot = match parsed.plot {
            PlotChoice::Yes => WantsPlot::Yes,
            PlotChoice::No => WantsPlot::No,
        };
        tracing::debug!(
            thread_id = %state.thread_id,
            wants_plot = ?state.wants_plot,
            "auto plot decision resolved"
        );
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Script generation
// ---------------------------------------------------------------------------

pub struct CreatePlotNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl CreatePlotNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for CreatePlotNode {
    fn name(&self) -> &'static str {
        node_name::CREATE_PLOT
    }

    fn label(&self) -> &'static str {
        "create plot"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        if state.plot_attempts >= TurnState::MAX_PLOT_ATTEMPTS {
            // Backstop: the retry edge stops the loop first under normal flow.
            state.plot_error = Some("Plot-creation failed after 3 attempts".to_string());
            return Ok(state);
        }

        let result = state.result.join("\n\n");
        let system = if state.plot_attempts == 0 {
            PLOT_CREATE_SYSTEM_PROMPT.replace("{result}", &result)
        } else {
            PLOT_RETRY_SYSTEM_PROMPT
                .replace("{prev_code}", state.plot_code.as_deref().unwrap_or(""))
                .replace("{prev_error}", state.plot_error.as_deref().unwrap_or(""))
                .replace("{result}", &result)
        };

        let span = info_span!(
            "gen_ai.create_plot",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: GeneratedScript = complete_structured(
            &self.provider,
            &self.model,
            "GeneratedScript",
            &system,
            &state.question,
        )
        .instrument(span)
        .await?;

        state.plot_code = Some(strip_code_fence(&parsed.code));
        state.plot_attempts += 1;
        tracing::debug!(
            thread_id = %state.thread_id,
            attempt = state.plot_attempts,
            "plot script generated"
        );
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Script execution
// ---------------------------------------------------------------------------

pub struct RunPlotNode<P> {
    runner: Arc<P>,
}

impl<P> RunPlotNode<P> {
    pub fn new(runner: Arc<P>) -> Self {
        Self { runner }
    }
}

impl<P: PlotRunner + 'static> Node for RunPlotNode<P> {
    fn name(&self) -> &'static str {
        node_name::RUN_PLOT
    }

    fn label(&self) -> &'static str {
        "run plot"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let Some(code) = state.plot_code.clone() else {
            state.plot_error = Some("no plot script was generated".to_string());
            return Ok(state);
        };

        match self.runner.render(&code).await {
            Ok(artifact) => {
                tracing::debug!(
                    thread_id = %state.thread_id,
                    path = %artifact.path,
                    "plot rendered"
                );
                state.plot_path = Some(artifact.path);
                state.plot_base64 = Some(artifact.data_uri);
                state.plot_error = None;
            }
            Err(e) => {
                tracing::warn!(
                    thread_id = %state.thread_id,
                    attempt = state.plot_attempts,
                    error = %e,
                    "plot script failed"
                );
                state.plot_path = None;
                state.plot_base64 = None;
                state.plot_error = Some(e.to_string());
            }
        }

        Ok(state)
    }
}
