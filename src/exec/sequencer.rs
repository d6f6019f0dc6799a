//! Step sequencer: executes a workflow's steps in order for one iteration.
//! Owns the iteration's session context, applies the mutation profile
//! (skips, swaps, repeats, locks, concurrency modes), classifies every
//! response, and emits one record per attempt. Step-local failures are
//! recorded and never abort sibling steps or sibling iterations.

use crate::core::context::Account;
use crate::core::scope::Environment;
use crate::core::trace::{TraceBuffer, TraceEntry};
use crate::exec::classify::classify_response;
use crate::exec::concurrency::{pick_primary, run_members, MemberOutcome};
use crate::http::client::Dispatch;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::plan::iteration::Iteration;
use crate::reporting::model::{
    Classification, FindingCandidate, FindingKind, RequestSnapshot, ResponseSnapshot,
    StepExecutionRecord,
};
use crate::session::context::SessionContext;
use crate::session::extractor::run_extractors;
use crate::session::template::resolve_template;
use crate::workflow::definition::{SessionJarConfig, StepDefinition, WorkflowDefinition};
use crate::workflow::mutation::{
    AccountRef, ConcurrentReplaySpec, MutationProfile, ParallelGroupSpec, WritebackPolicy,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything one iteration produced.
#[derive(Debug)]
pub struct IterationOutcome {
    pub iteration_id: u64,
    pub records: Vec<StepExecutionRecord>,
    pub findings: Vec<FindingCandidate>,
    pub error_count: u32,
    /// Last response that fed the sequence; the baseline diff compares these.
    pub final_response: Option<HttpResponse>,
    pub context: SessionContext,
    /// Set when a cancellation was observed mid-iteration.
    pub aborted: bool,
}

#[derive(Clone)]
pub struct StepSequencer {
    workflow: Arc<WorkflowDefinition>,
    env: Arc<Environment>,
    accounts: Arc<Vec<Account>>,
    dispatch: Arc<dyn Dispatch>,
    trace: Option<Arc<TraceBuffer>>,
    cancel: Arc<AtomicBool>,
    run_id: String,
    retry_backoff_ms: u64,
}

impl StepSequencer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: Arc<WorkflowDefinition>,
        env: Arc<Environment>,
        accounts: Arc<Vec<Account>>,
        dispatch: Arc<dyn Dispatch>,
        trace: Option<Arc<TraceBuffer>>,
        cancel: Arc<AtomicBool>,
        run_id: String,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            workflow,
            env,
            accounts,
            dispatch,
            trace,
            cancel,
            run_id,
            retry_backoff_ms,
        }
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execute one iteration through the full step sequence.
    pub async fn run_iteration(
        &self,
        iteration: &Iteration,
        profile: Option<&MutationProfile>,
    ) -> IterationOutcome {
        self.run_iteration_locked(iteration, profile, &BTreeSet::new()).await
    }

    /// Like `run_iteration`, with additional variables pinned for this run
    /// (ticket reuse seeds the mutated baseline run this way).
    pub async fn run_iteration_locked(
        &self,
        iteration: &Iteration,
        profile: Option<&MutationProfile>,
        extra_locked: &BTreeSet<String>,
    ) -> IterationOutcome {
        let mut ctx = SessionContext::new();
        let mut out = IterationOutcome {
            iteration_id: iteration.id,
            records: Vec::new(),
            findings: Vec::new(),
            error_count: 0,
            final_response: None,
            context: SessionContext::new(),
            aborted: false,
        };

        // Locked variables are resolved once, here, and never re-resolved.
        let mut locked: BTreeSet<String> = extra_locked.clone();
        if let Some(p) = profile {
            locked.extend(p.lock_variables.iter().cloned());
        }

        tracing::debug!(
            iteration = iteration.id,
            attacker = ?iteration.attacker_account_id,
            target = ?iteration.target_account_id,
            "iteration start"
        );

        for step in self.workflow.ordered_steps() {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!(iteration = iteration.id, "cancellation observed, iteration aborted");
                out.aborted = true;
                break;
            }

            if let Some(p) = profile {
                if p.skip_steps.contains(&step.order) {
                    tracing::debug!(step = step.order, "step skipped by mutation profile");
                    continue;
                }
            }

            let values = self.effective_values(iteration, profile, step.order, &locked);
            let jar = self.jar_config();

            if let Some(p) = profile {
                if let Some(replay) = p.replay_at(step.order) {
                    self.run_concurrent_replay(step, replay, &values, &mut ctx, jar, iteration, &locked, &mut out)
                        .await;
                    continue;
                }
                if let Some(group) = p.group_at(step.order) {
                    self.run_parallel_group(step, group, &values, &mut ctx, jar, iteration, &locked, &mut out)
                        .await;
                    continue;
                }
            }

            let executed = self
                .execute_step(step, &values, &mut ctx, jar, iteration, &locked, 0, &mut out)
                .await;

            // Immediate re-execution for idempotency / double-submit testing.
            if let (Some((request, _, _)), Some(p)) = (&executed, profile) {
                if let Some(&count) = p.repeat_steps.get(&step.order) {
                    for attempt in 1..=count {
                        self.repeat_step(step, request.clone(), attempt, iteration, &mut out).await;
                    }
                }
            }
        }

        out.context = ctx;
        out
    }

    fn jar_config(&self) -> Option<&SessionJarConfig> {
        self.workflow
            .enable_session_jar
            .then_some(&self.workflow.session_jar_config)
    }

    /// Values for one step: the iteration's assignment, with account-field
    /// variables re-read from the swap account when the profile swaps this
    /// step. Locked variables keep their iteration-start value.
    fn effective_values(
        &self,
        iteration: &Iteration,
        profile: Option<&MutationProfile>,
        step_order: u32,
        locked: &BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let mut values = iteration.values.clone();

        let Some(account_ref) = profile.and_then(|p| p.swap_account_at_steps.get(&step_order)) else {
            return values;
        };

        let account_id = match account_ref {
            AccountRef::Attacker => iteration.attacker_account_id.clone(),
            AccountRef::Victim => iteration.target_account_id.clone(),
            AccountRef::Concrete(id) => Some(id.clone()),
        };
        let account = account_id
            .as_deref()
            .and_then(|id| self.accounts.iter().find(|a| a.id == id));
        let Some(account) = account else {
            tracing::warn!(step = step_order, swap = ?account_ref, "swap account not resolvable, swap ignored");
            return values;
        };

        for var in &self.workflow.variable_configs {
            if var.data_source != crate::workflow::variables::DataSource::AccountField {
                continue;
            }
            if locked.contains(&var.name) {
                continue;
            }
            if let Some(value) = account.field(var.field_name()) {
                values.insert(var.name.clone(), value.to_string());
            }
        }

        tracing::debug!(step = step_order, account = %account.id, "account swap applied");
        values
    }

    /// Resolve, send (with one transient retry), classify, extract, and
    /// record one step. Returns the materialized request and response when
    /// a response was obtained.
    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        step: &StepDefinition,
        values: &BTreeMap<String, String>,
        ctx: &mut SessionContext,
        jar: Option<&SessionJarConfig>,
        iteration: &Iteration,
        locked: &BTreeSet<String>,
        attempt: u32,
        out: &mut IterationOutcome,
    ) -> Option<(HttpRequest, HttpResponse, Classification)> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        let request = match resolve_template(
            &step.template,
            step.order,
            &self.workflow.variable_configs,
            values,
            ctx,
            jar,
            &self.env,
        ) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(step = step.order, error = %e, "template resolution failed");
                self.push_record(
                    out,
                    iteration,
                    step.order,
                    &step.name,
                    attempt,
                    None,
                    true,
                    None,
                    None,
                    Some(e.to_string()),
                    start.elapsed().as_millis(),
                    0,
                    Classification::ExecutionError,
                    started_at,
                );
                return None;
            }
        };

        let (result, retries) = self.send_with_retry(&request).await;
        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.push_record(
                    out,
                    iteration,
                    step.order,
                    &step.name,
                    attempt,
                    None,
                    true,
                    Some(&request),
                    None,
                    Some(e.to_string()),
                    start.elapsed().as_millis(),
                    retries,
                    Classification::ExecutionError,
                    started_at,
                );
                return None;
            }
        };

        let mut classification = classify_response(&response, &step.template);

        // Extraction and jar carryover feed later steps; repeats observe only.
        if attempt == 0 {
            classification = self.apply_session_updates(step.order, &response, ctx, jar, classification, locked);
        }

        if classification == Classification::FindingCandidate {
            out.findings.push(self.finding(
                iteration,
                step.order,
                &step.name,
                FindingKind::UnexpectedSuccess,
                Some(response.status),
                format!(
                    "step `{}` returned {} without matching its failure patterns",
                    step.name, response.status
                ),
            ));
        }

        self.push_record(
            out,
            iteration,
            step.order,
            &step.name,
            attempt,
            None,
            attempt == 0,
            Some(&request),
            Some(&response),
            None,
            start.elapsed().as_millis(),
            retries,
            classification,
            started_at,
        );
        out.final_response = Some(response.clone());

        Some((request, response, classification))
    }

    /// Re-send an already materialized request without touching the session.
    async fn repeat_step(
        &self,
        step: &StepDefinition,
        request: HttpRequest,
        attempt: u32,
        iteration: &Iteration,
        out: &mut IterationOutcome,
    ) {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        let (result, retries) = self.send_with_retry(&request).await;
        match result {
            Ok(response) => {
                let classification = classify_response(&response, &step.template);
                if classification == Classification::FindingCandidate {
                    out.findings.push(self.finding(
                        iteration,
                        step.order,
                        &step.name,
                        FindingKind::UnexpectedSuccess,
                        Some(response.status),
                        format!(
                            "repeat {} of step `{}` returned {} without matching its failure patterns",
                            attempt, step.name, response.status
                        ),
                    ));
                }
                self.push_record(
                    out,
                    iteration,
                    step.order,
                    &step.name,
                    attempt,
                    None,
                    false,
                    Some(&request),
                    Some(&response),
                    None,
                    start.elapsed().as_millis(),
                    retries,
                    classification,
                    started_at,
                );
                out.final_response = Some(response);
            }
            Err(e) => {
                self.push_record(
                    out,
                    iteration,
                    step.order,
                    &step.name,
                    attempt,
                    None,
                    false,
                    Some(&request),
                    None,
                    Some(e.to_string()),
                    start.elapsed().as_millis(),
                    retries,
                    Classification::ExecutionError,
                    started_at,
                );
            }
        }
    }

    /// Concurrent replay: N copies of the same materialized request.
    #[allow(clippy::too_many_arguments)]
    async fn run_concurrent_replay(
        &self,
        step: &StepDefinition,
        spec: &ConcurrentReplaySpec,
        values: &BTreeMap<String, String>,
        ctx: &mut SessionContext,
        jar: Option<&SessionJarConfig>,
        iteration: &Iteration,
        locked: &BTreeSet<String>,
        out: &mut IterationOutcome,
    ) {
        let started_at = chrono::Utc::now().to_rfc3339();
        let request = match resolve_template(
            &step.template,
            step.order,
            &self.workflow.variable_configs,
            values,
            ctx,
            jar,
            &self.env,
        ) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(step = step.order, error = %e, "replay template resolution failed");
                self.push_record(
                    out, iteration, step.order, &step.name, 0, None, true, None, None,
                    Some(e.to_string()), 0, 0, Classification::ExecutionError, started_at,
                );
                return;
            }
        };

        tracing::info!(
            step = step.order,
            concurrency = spec.concurrency,
            barrier = spec.barrier,
            "concurrent replay"
        );

        let copies = (0..spec.concurrency).map(|_| request.clone()).collect();
        let members = run_members(Arc::clone(&self.dispatch), copies, spec.barrier, spec.timeout_ms).await;
        let primary = pick_primary(&members, spec.pick_primary);

        self.absorb_group(
            step,
            &members,
            primary,
            primary,
            ctx,
            jar,
            iteration,
            locked,
            out,
            |_index| step.name.clone(),
        );
    }

    /// Parallel group: the anchor step plus frozen extra requests.
    #[allow(clippy::too_many_arguments)]
    async fn run_parallel_group(
        &self,
        step: &StepDefinition,
        spec: &ParallelGroupSpec,
        values: &BTreeMap<String, String>,
        ctx: &mut SessionContext,
        jar: Option<&SessionJarConfig>,
        iteration: &Iteration,
        locked: &BTreeSet<String>,
        out: &mut IterationOutcome,
    ) {
        let started_at = chrono::Utc::now().to_rfc3339();
        let anchor = match resolve_template(
            &step.template,
            step.order,
            &self.workflow.variable_configs,
            values,
            ctx,
            jar,
            &self.env,
        ) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(step = step.order, error = %e, "anchor template resolution failed");
                self.push_record(
                    out, iteration, step.order, &step.name, 0, None, true, None, None,
                    Some(e.to_string()), 0, 0, Classification::ExecutionError, started_at,
                );
                return;
            }
        };

        // Extras are frozen snapshots: materialized verbatim, never against
        // the live account context.
        let empty_values = BTreeMap::new();
        let frozen_ctx = SessionContext::new();
        let mut requests = vec![anchor];
        let mut extra_names = vec![step.name.clone()];
        for extra in &spec.extras {
            match resolve_template(&extra.template, 0, &[], &empty_values, &frozen_ctx, None, &self.env) {
                Ok(req) => {
                    requests.push(req);
                    extra_names.push(extra.name.clone());
                }
                Err(e) => {
                    tracing::warn!(extra = %extra.name, error = %e, "extra request dropped");
                    self.push_record(
                        out, iteration, step.order, &extra.name, 0, None, false, None, None,
                        Some(e.to_string()), 0, 0, Classification::ExecutionError,
                        chrono::Utc::now().to_rfc3339(),
                    );
                }
            }
        }

        tracing::info!(
            step = step.order,
            extras = requests.len() - 1,
            barrier = spec.barrier,
            "parallel group"
        );

        let members = run_members(Arc::clone(&self.dispatch), requests, spec.barrier, spec.timeout_ms).await;
        let primary = pick_primary(&members, spec.pick_primary);

        let writeback = match spec.writeback_policy {
            WritebackPolicy::PrimaryOnly => primary,
            // Group members never feed the jar; the anchor's own extractor
            // writes still apply below.
            WritebackPolicy::None => None,
        };
        let names = extra_names.clone();
        self.absorb_group(
            step,
            &members,
            primary,
            writeback,
            ctx,
            jar,
            iteration,
            locked,
            out,
            move |index| names[index as usize].clone(),
        );

        if spec.writeback_policy == WritebackPolicy::None {
            if let Some(anchor_resp) = members.first().and_then(|m| m.response.as_ref()) {
                let classification = classify_response(anchor_resp, &step.template);
                let applied =
                    self.apply_session_updates(step.order, anchor_resp, ctx, None, classification, locked);
                if applied == Classification::ExtractionMissing {
                    let start = out.records.len().saturating_sub(members.len());
                    for record in &mut out.records[start..] {
                        if record.member_index == Some(0) {
                            record.classification = Classification::ExtractionMissing;
                            out.error_count += 1;
                        }
                    }
                }
            }
        }
    }

    /// Record every member of a concurrency group, apply session updates
    /// from the writeback member, and emit race evidence. `primary` drives
    /// the record flag and finding attribution; `writeback` drives session
    /// mutation (they coincide except under writeback policy `none`).
    #[allow(clippy::too_many_arguments)]
    fn absorb_group(
        &self,
        step: &StepDefinition,
        members: &[MemberOutcome],
        primary: Option<usize>,
        writeback: Option<usize>,
        ctx: &mut SessionContext,
        jar: Option<&SessionJarConfig>,
        iteration: &Iteration,
        locked: &BTreeSet<String>,
        out: &mut IterationOutcome,
        member_name: impl Fn(u32) -> String,
    ) {
        let mut writeback_classification = None;
        if let Some(member) = writeback.and_then(|i| members.get(i)) {
            if let Some(resp) = &member.response {
                let classification = classify_response(resp, &step.template);
                let classification =
                    self.apply_session_updates(step.order, resp, ctx, jar, classification, locked);
                writeback_classification = Some((member.index, classification));
                out.final_response = Some(resp.clone());
            }
        }

        let mut successes = 0u32;
        for member in members {
            let classification = match (&member.response, member.timed_out) {
                (Some(resp), _) => {
                    if resp.is_success() {
                        successes += 1;
                    }
                    match writeback_classification {
                        Some((idx, c)) if idx == member.index => c,
                        _ => classify_response(resp, &step.template),
                    }
                }
                (None, true) => Classification::Timeout,
                (None, false) => Classification::ExecutionError,
            };

            let is_primary = primary.map(|i| i as u32) == Some(member.index);
            let name = member_name(member.index);
            if classification == Classification::FindingCandidate && is_primary {
                out.findings.push(self.finding(
                    iteration,
                    step.order,
                    &name,
                    FindingKind::UnexpectedSuccess,
                    member.response.as_ref().map(|r| r.status),
                    format!(
                        "primary member {} returned {} without matching failure patterns",
                        member.index,
                        member.response.as_ref().map(|r| r.status).unwrap_or_default()
                    ),
                ));
            }

            self.push_record(
                out,
                iteration,
                step.order,
                &name,
                0,
                Some(member.index),
                is_primary,
                Some(&member.request),
                member.response.as_ref(),
                member.error.clone(),
                member.elapsed_ms,
                0,
                classification,
                member.started_at.clone(),
            );
        }

        // More than one success in a group built to race is evidence of a
        // double-spend-class bug.
        if successes > 1 {
            out.findings.push(self.finding(
                iteration,
                step.order,
                &step.name,
                FindingKind::RaceEvidence,
                None,
                format!("{successes} of {} racing members succeeded", members.len()),
            ));
        }
    }

    /// Run extractors and jar carryover for a response that feeds the
    /// session. Returns the (possibly escalated) classification.
    fn apply_session_updates(
        &self,
        step_order: u32,
        response: &HttpResponse,
        ctx: &mut SessionContext,
        jar: Option<&SessionJarConfig>,
        classification: Classification,
        locked: &BTreeSet<String>,
    ) -> Classification {
        let mut classification = classification;

        if self.workflow.enable_extractor {
            let failures = run_extractors(
                &self.workflow.extractor_rules,
                step_order,
                response,
                ctx,
                classification.is_step_failure(),
                locked,
            );
            if failures.iter().any(|f| f.required) {
                tracing::warn!(step = step_order, "required extraction missing");
                classification = Classification::ExtractionMissing;
            }
        }

        if let Some(jar) = jar {
            ctx.absorb_response(response, jar);
        }

        classification
    }

    async fn send_with_retry(&self, request: &HttpRequest) -> (anyhow::Result<HttpResponse>, u32) {
        match self.dispatch.dispatch(request.clone()).await {
            Ok(resp) => (Ok(resp), 0),
            Err(first) => {
                tracing::debug!(error = %first, "transient dispatch failure, retrying once");
                tokio::time::sleep(Duration::from_millis(self.retry_backoff_ms)).await;
                match self.dispatch.dispatch(request.clone()).await {
                    Ok(resp) => (Ok(resp), 1),
                    Err(second) => (Err(second), 1),
                }
            }
        }
    }

    fn finding(
        &self,
        iteration: &Iteration,
        step_order: u32,
        step_name: &str,
        kind: FindingKind,
        status: Option<u16>,
        evidence: String,
    ) -> FindingCandidate {
        FindingCandidate {
            run_id: self.run_id.clone(),
            iteration_id: iteration.id,
            step_order,
            step_name: step_name.to_string(),
            kind,
            status,
            evidence,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_record(
        &self,
        out: &mut IterationOutcome,
        iteration: &Iteration,
        step_order: u32,
        step_name: &str,
        attempt: u32,
        member_index: Option<u32>,
        primary: bool,
        request: Option<&HttpRequest>,
        response: Option<&HttpResponse>,
        error: Option<String>,
        duration_ms: u128,
        retries: u32,
        classification: Classification,
        started_at: String,
    ) {
        if classification.is_error() {
            out.error_count += 1;
        }

        let request_snapshot = request.map(RequestSnapshot::from);
        let response_snapshot = response.map(ResponseSnapshot::from);

        if let Some(trace) = &self.trace {
            trace.record(TraceEntry {
                iteration_id: iteration.id,
                step_order,
                request: request_snapshot.clone(),
                response: response_snapshot.clone(),
                error: error.clone(),
                at: chrono::Utc::now().to_rfc3339(),
            });
        }

        out.records.push(StepExecutionRecord {
            iteration_id: iteration.id,
            step_order,
            step_name: step_name.to_string(),
            attempt,
            member_index,
            primary,
            request: request_snapshot,
            response: response_snapshot,
            error,
            duration_ms,
            retries,
            classification,
            started_at,
            completed_at: chrono::Utc::now().to_rfc3339(),
        });
    }
}
