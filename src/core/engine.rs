//! Workflow engine: validates configuration fail-fast, builds the iteration
//! plan, and drives iterations through a bounded worker pool. Each iteration
//! owns its session context; the only cross-iteration shared state is the
//! read-only workflow definition and value pools. A run always completes
//! with a full accounting, never silently.

use crate::core::context::RunContext;
use crate::core::error::ConfigError;
use crate::core::trace::TraceBuffer;
use crate::exec::sequencer::{IterationOutcome, StepSequencer};
use crate::http::client::Dispatch;
use crate::plan::planner::plan_iterations;
use crate::reporting::model::{FindingCandidate, RunReport};
use crate::reporting::reporter::Reporter;
use crate::validation::baseline::run_baseline_pair;
use crate::validation::diff::BaselineConfig;
use crate::workflow::definition::{AccountBindingStrategy, WorkflowDefinition};
use crate::workflow::mutation::MutationProfile;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct WorkflowEngine {
    dispatch: Arc<dyn Dispatch>,
    trace: Option<Arc<TraceBuffer>>,
    cancel: Arc<AtomicBool>,
}

struct TaskResult {
    outcomes: Vec<IterationOutcome>,
    pair_finding: Option<FindingCandidate>,
}

impl WorkflowEngine {
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            dispatch,
            trace: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_trace(mut self, trace: Arc<TraceBuffer>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Handle for operator abort. Observed at iteration boundaries and at
    /// concurrency join points; an in-flight HTTP call is never preempted.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute one workflow run to completion.
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        run_ctx: &RunContext,
        profile: Option<&MutationProfile>,
    ) -> Result<RunReport, ConfigError> {
        let started_at = chrono::Utc::now().to_rfc3339();

        // ---- FAIL-FAST VALIDATION ----
        workflow.validate()?;
        if let Some(profile) = profile {
            profile.validate(workflow)?;
        }

        // ---- ITERATION PLAN ----
        let iterations = plan_iterations(
            workflow,
            &run_ctx.accounts,
            &run_ctx.pools,
            run_ctx.config.max_iterations,
        )?;
        let planned = iterations.len();

        tracing::info!(
            run = %run_ctx.config.run_id,
            workflow = %workflow.name,
            iterations = planned,
            workers = run_ctx.config.workers,
            "run starting"
        );

        let sequencer = StepSequencer::new(
            Arc::new(workflow.clone()),
            Arc::new(run_ctx.environment.clone()),
            Arc::new(run_ctx.accounts.clone()),
            Arc::clone(&self.dispatch),
            self.trace.clone(),
            Arc::clone(&self.cancel),
            run_ctx.config.run_id.clone(),
            run_ctx.config.retry_backoff_ms,
        );

        let baseline_config: Option<Arc<BaselineConfig>> = (workflow.account_binding_strategy
            == AccountBindingStrategy::AnchorAttacker
            && workflow.enable_baseline)
            .then(|| Arc::new(workflow.baseline_config.clone().unwrap_or_default()));
        let profile: Option<Arc<MutationProfile>> = profile.cloned().map(Arc::new);

        // ---- BOUNDED WORKER POOL ----
        let semaphore = Arc::new(Semaphore::new(run_ctx.config.workers.max(1)));
        let mut handles = Vec::with_capacity(planned);

        for iteration in iterations {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("cancellation observed, remaining iterations not scheduled");
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let sequencer = sequencer.clone();
            let profile = profile.clone();
            let baseline_config = baseline_config.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match baseline_config {
                    Some(config) => {
                        let pair = run_baseline_pair(
                            &sequencer,
                            &iteration,
                            profile.as_deref(),
                            &config,
                        )
                        .await;
                        TaskResult {
                            outcomes: vec![pair.baseline, pair.mutated],
                            pair_finding: pair.finding,
                        }
                    }
                    None => {
                        let outcome = sequencer.run_iteration(&iteration, profile.as_deref()).await;
                        TaskResult {
                            outcomes: vec![outcome],
                            pair_finding: None,
                        }
                    }
                }
            }));
        }
        let scheduled = handles.len();

        // ---- AGGREGATION ----
        let mut reporter = Reporter::new();
        let mut completed = 0usize;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "iteration task panicked");
                    continue;
                }
            };

            let aborted = result.outcomes.iter().any(|o| o.aborted);
            if !aborted {
                completed += 1;
            }
            for outcome in result.outcomes {
                for record in outcome.records {
                    reporter.add_record(record);
                }
                for finding in outcome.findings {
                    reporter.add_finding(finding);
                }
            }
            if let Some(finding) = result.pair_finding {
                reporter.add_finding(finding);
            }
        }

        let (records, findings, error_count) = reporter.into_parts();
        let report = RunReport {
            run_id: run_ctx.config.run_id.clone(),
            workflow_name: workflow.name.clone(),
            started_at,
            completed_at: chrono::Utc::now().to_rfc3339(),
            iterations_planned: planned,
            iterations_completed: completed,
            error_count,
            findings,
            records,
        };

        tracing::info!(
            run = %report.run_id,
            scheduled,
            completed = report.iterations_completed,
            errors = report.error_count,
            findings = report.findings.len(),
            "run finished"
        );
        Ok(report)
    }
}
