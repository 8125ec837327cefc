//! Ordered, optionally cyclic step execution.
//!
//! A [`ProbingSequence`] owns its steps, its token and, between passes, the
//! persistent connection its last step left open. Each call to
//! [`ProbingSequence::run_once`] is one pass: steps run strictly in order,
//! redirects are followed without advancing the step index, and the first
//! failure ends the pass.

use crate::connection::Connection;
use crate::connector::Connector;
use crate::error::ProberError;
use crate::handler::HandlerOutcome;
use crate::metrics::{MetricsSink, ProbeMetric, TracingSink};
use crate::step::ProbingStep;
use crate::token::Token;
use crate::types::{ProbeOutcome, SequenceFailure, SequenceReport, SequenceState, StepReport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default bound on one action when none is configured.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// A scripted series of exchanges against one service.
#[derive(Debug)]
pub struct ProbingSequence {
    name: String,
    steps: Vec<ProbingStep>,
    first_repeated: usize,
    token: Box<dyn Token>,
    connector: Arc<dyn Connector>,
    step_timeout: Option<Duration>,
    max_redirects: Option<usize>,
    connection: Option<Connection>,
    metrics: Arc<dyn MetricsSink>,
    state: SequenceState,
}

impl ProbingSequence {
    pub fn builder<N: Into<String>>(
        name: N,
        token: Box<dyn Token>,
        connector: Arc<dyn Connector>,
    ) -> ProbingSequenceBuilder {
        ProbingSequenceBuilder {
            name: name.into(),
            steps: Vec::new(),
            first_repeated: None,
            token,
            connector,
            step_timeout: Some(DEFAULT_STEP_TIMEOUT),
            max_redirects: None,
            metrics: Arc::new(TracingSink),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ProbingStep] {
        &self.steps
    }

    /// Index of the step a pass resumes from while a connection is kept.
    pub fn first_repeated(&self) -> usize {
        self.first_repeated
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    /// Target the next pass will probe.
    pub fn target(&self) -> &str {
        self.token.target()
    }

    /// Whether a persistent connection survived the last pass.
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Run one pass over the sequence.
    ///
    /// The token advances afterwards whatever the outcome.
    pub async fn run_once(&mut self) -> Result<SequenceReport, SequenceFailure> {
        let started = Instant::now();
        let target = self.token.target().to_string();
        let start = if self.connection.is_some() {
            self.first_repeated
        } else {
            0
        };
        let redirect_limit = self.max_redirects.unwrap_or(self.steps.len());
        let mut redirects = 0;
        let mut completed = Vec::with_capacity(self.steps.len() - start);

        debug!(
            sequence = %self.name,
            target = %target,
            first_step = self.steps[start].name(),
            "starting pass"
        );

        for index in start..self.steps.len() {
            match self
                .run_step(index, start, &target, redirect_limit, &mut redirects)
                .await
            {
                Ok(report) => completed.push(report),
                Err(error) => return Err(self.fail(index, target, error, completed).await),
            }
        }

        // A pass that restarts from the first step always opens a fresh connection.
        if self.first_repeated == 0 {
            self.close().await;
        }
        self.state = SequenceState::SequenceCompleted;
        self.token.next();

        let report = SequenceReport {
            sequence: self.name.clone(),
            target,
            steps: completed,
            duration: started.elapsed(),
            connection_kept: self.connection.is_some(),
        };
        info!(
            sequence = %report.sequence,
            target = %report.target,
            duration_ms = report.duration.as_millis() as u64,
            "pass completed"
        );
        Ok(report)
    }

    /// Close the kept connection, if any.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    async fn run_step(
        &mut self,
        index: usize,
        start: usize,
        target: &str,
        redirect_limit: usize,
        redirects: &mut usize,
    ) -> Result<StepReport, ProberError> {
        let step_name = self.steps[index].name().to_string();
        self.state = SequenceState::StepExecuting {
            step: step_name.clone(),
        };
        let step_started = Instant::now();

        let result = self
            .execute_step(index, start, redirect_limit, redirects)
            .await;

        let (outcome, latency, protocol) = match &result {
            Ok(report) => (
                ProbeOutcome::Success,
                report.latency,
                report.endpoint.protocol.clone(),
            ),
            Err(error) => (
                ProbeOutcome::from_error(error),
                step_started.elapsed(),
                self.steps[index].protocol().name().to_string(),
            ),
        };
        self.metrics.record(ProbeMetric {
            sequence: self.name.clone(),
            target: target.to_string(),
            step: step_name.clone(),
            protocol,
            outcome,
            latency,
        });

        self.state = match &result {
            Ok(report) => {
                info!(
                    sequence = %self.name,
                    step = %step_name,
                    target = %target,
                    connection_id = report.connection_id,
                    latency_ms = report.latency.as_millis() as u64,
                    "step succeeded"
                );
                SequenceState::StepSucceeded { step: step_name }
            }
            Err(_) => SequenceState::StepFailed { step: step_name },
        };
        result
    }

    async fn execute_step(
        &mut self,
        index: usize,
        start: usize,
        redirect_limit: usize,
        redirects: &mut usize,
    ) -> Result<StepReport, ProberError> {
        let step = &self.steps[index];
        let persistent = step.protocol().persistent_connection();
        let requires_existing = persistent && index != start;

        let mut action =
            step.generate_action(self.token.as_mut(), self.step_timeout, requires_existing)?;
        let mut existing = if persistent {
            self.connection.take()
        } else {
            None
        };

        let mut hops = 0;
        let mut latency = Duration::ZERO;
        loop {
            let result = action
                .call(existing.take(), self.connector.as_ref())
                .await?;
            latency += result.latency;

            match result.outcome {
                HandlerOutcome::Success => {
                    if result.connection.is_some() {
                        self.connection = result.connection;
                    }
                    return Ok(StepReport {
                        step: step.name().to_string(),
                        connection_id: result.connection_id,
                        latency,
                        endpoint: result.context.endpoint(),
                        redirects: hops,
                    });
                }
                HandlerOutcome::Redirect {
                    context,
                    rewrite_to_get,
                } => {
                    *redirects += 1;
                    hops += 1;
                    if *redirects > redirect_limit {
                        return Err(ProberError::validation(
                            "redirect limit",
                            format!(
                                "more than {} redirects in one pass, last to {}",
                                redirect_limit,
                                context.endpoint()
                            ),
                        ));
                    }
                    debug!(
                        sequence = %self.name,
                        step = step.name(),
                        to = %context.endpoint(),
                        "following redirect"
                    );
                    action = step.redirect_action(&action, context, rewrite_to_get)?;
                }
            }
        }
    }

    async fn fail(
        &mut self,
        index: usize,
        target: String,
        error: ProberError,
        completed: Vec<StepReport>,
    ) -> SequenceFailure {
        let step = self.steps[index].name().to_string();
        let outcome = ProbeOutcome::from_error(&error);

        if outcome == ProbeOutcome::InternalError {
            error!(
                sequence = %self.name,
                step = %step,
                target = %target,
                error = %error,
                "prober defect while running step"
            );
        } else {
            warn!(
                sequence = %self.name,
                step = %step,
                target = %target,
                outcome = %outcome,
                error = %error,
                "step failed"
            );
        }

        // The next pass starts over from the first step.
        self.close().await;
        self.state = SequenceState::SequenceFailed;
        self.token.next();

        SequenceFailure {
            sequence: self.name.clone(),
            target,
            step,
            step_index: index,
            outcome,
            message: error.to_string(),
            completed,
            error,
        }
    }
}

/// Builder for [`ProbingSequence`].
#[derive(Debug)]
pub struct ProbingSequenceBuilder {
    name: String,
    steps: Vec<ProbingStep>,
    first_repeated: Option<usize>,
    token: Box<dyn Token>,
    connector: Arc<dyn Connector>,
    step_timeout: Option<Duration>,
    max_redirects: Option<usize>,
    metrics: Arc<dyn MetricsSink>,
}

impl ProbingSequenceBuilder {
    pub fn add_step(mut self, step: ProbingStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Mark the most recently added step as where later passes resume
    /// while a persistent connection is kept.
    pub fn mark_first_repeated(mut self) -> Self {
        self.first_repeated = self.steps.len().checked_sub(1);
        self
    }

    /// `None` disables the per-step bound.
    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn max_redirects(mut self, max_redirects: Option<usize>) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<ProbingSequence, ProberError> {
        if self.steps.is_empty() {
            return Err(ProberError::config(format!(
                "Sequence '{}' has no steps",
                self.name
            )));
        }

        Ok(ProbingSequence {
            name: self.name,
            steps: self.steps,
            first_repeated: self.first_repeated.unwrap_or(0),
            token: self.token,
            connector: self.connector,
            step_timeout: self.step_timeout,
            max_redirects: self.max_redirects,
            connection: None,
            metrics: self.metrics,
            state: SequenceState::NotStarted,
        })
    }
}
