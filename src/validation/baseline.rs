//! Baseline/mutated pair execution. Active only under the anchor-attacker
//! strategy with baseline comparison enabled: the control run points every
//! target-role variable at the attacker's own resource, the mutated run
//! points them at the victim, and the two final responses are diffed.

use crate::core::context::Account;
use crate::exec::sequencer::{IterationOutcome, StepSequencer};
use crate::plan::iteration::Iteration;
use crate::reporting::model::{FindingCandidate, FindingKind};
use crate::validation::diff::{diff_responses, BaselineConfig, DiffReport};
use crate::workflow::mutation::MutationProfile;
use crate::workflow::variables::{VariableRole, VariableType};
use std::collections::BTreeSet;

/// Outcome of one baseline/mutated pair.
#[derive(Debug)]
pub struct BaselinePair {
    pub baseline: IterationOutcome,
    pub mutated: IterationOutcome,
    pub report: Option<DiffReport>,
    pub finding: Option<FindingCandidate>,
}

/// Run the control ("attacker on own resource") and test ("attacker on
/// victim resource") executions for one iteration and diff their final
/// responses. The mutation profile applies to the mutated run only; the
/// control run executes the unmutated plan.
pub async fn run_baseline_pair(
    sequencer: &StepSequencer,
    iteration: &Iteration,
    profile: Option<&MutationProfile>,
    config: &BaselineConfig,
) -> BaselinePair {
    let workflow = sequencer.workflow();

    let baseline_iteration = repoint_at_attacker(sequencer, iteration);
    tracing::debug!(iteration = iteration.id, "baseline run (attacker as self)");
    let baseline = sequencer.run_iteration(&baseline_iteration, None).await;

    // Ticket reuse: FLOW_TICKET variables carry over verbatim from the
    // baseline run instead of being re-resolved. Explicitly locked
    // variables take precedence and keep their iteration-start value.
    let mut mutated_iteration = iteration.clone();
    let mut reused: BTreeSet<String> = BTreeSet::new();
    if profile.map(|p| p.reuse_tickets).unwrap_or(false) {
        let locked: BTreeSet<String> = profile
            .map(|p| p.lock_variables.clone())
            .unwrap_or_default();
        for (name, value) in baseline.context.variables_of_type(VariableType::FlowTicket) {
            if locked.contains(name) {
                continue;
            }
            mutated_iteration
                .values
                .insert(name.to_string(), value.to_string());
            reused.insert(name.to_string());
        }
        if !reused.is_empty() {
            tracing::debug!(iteration = iteration.id, tickets = reused.len(), "reusing flow tickets");
        }
    }

    tracing::debug!(iteration = iteration.id, "mutated run (attacker as victim)");
    let mutated = sequencer
        .run_iteration_locked(&mutated_iteration, profile, &reused)
        .await;

    let (report, finding) = match (&baseline.final_response, &mutated.final_response) {
        (Some(b), Some(m)) => {
            let report = diff_responses(b, m, config);
            let finding = report.is_divergent().then(|| {
                let last = workflow.ordered_steps().last().map(|s| (s.order, s.name.clone()));
                let (step_order, step_name) = last.unwrap_or((0, String::new()));
                tracing::warn!(
                    iteration = iteration.id,
                    target = ?iteration.target_account_id,
                    "baseline divergence: {}",
                    report.describe()
                );
                FindingCandidate {
                    run_id: sequencer.run_id().to_string(),
                    iteration_id: iteration.id,
                    step_order,
                    step_name,
                    kind: FindingKind::BaselineDivergence,
                    status: Some(m.status),
                    evidence: report.describe(),
                }
            });
            (Some(report), finding)
        }
        _ => {
            tracing::warn!(
                iteration = iteration.id,
                "baseline pair incomplete, no final responses to diff"
            );
            (None, None)
        }
    };

    BaselinePair {
        baseline,
        mutated,
        report,
        finding,
    }
}

/// Control-run variant of the iteration: every target-role variable takes
/// the attacker's own field value.
fn repoint_at_attacker(sequencer: &StepSequencer, iteration: &Iteration) -> Iteration {
    let mut control = iteration.clone();
    let attacker: Option<&Account> = iteration
        .attacker_account_id
        .as_deref()
        .and_then(|id| sequencer.accounts().iter().find(|a| a.id == id));

    let Some(attacker) = attacker else {
        tracing::warn!(iteration = iteration.id, "attacker account missing, control run unchanged");
        return control;
    };

    for var in &sequencer.workflow().variable_configs {
        if var.role != VariableRole::Target {
            continue;
        }
        match attacker.field(var.field_name()) {
            Some(value) => {
                control.values.insert(var.name.clone(), value.to_string());
            }
            None => tracing::warn!(
                variable = %var.name,
                "attacker account lacks field for control run"
            ),
        }
    }
    control.target_account_id = Some(attacker.id.clone());
    control
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::Environment;
    use crate::exec::sequencer::StepSequencer;
    use crate::http::client::Dispatch;
    use crate::http::request::HttpRequest;
    use crate::http::response::HttpResponse;
    use crate::session::extractor::{ExtractorRule, ExtractorSource};
    use crate::workflow::definition::{
        AccountBindingStrategy, RequestTemplate, SessionJarConfig, StepDefinition,
        WorkflowDefinition,
    };
    use crate::workflow::variables::{
        DataSource, StepVariableMapping, VariableConfig, WritePolicy,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Issues an incrementing ticket on /ticket and logs /use bodies.
    struct TicketCounter {
        issued: AtomicUsize,
        used: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatch for TicketCounter {
        async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse> {
            match req.url.path() {
                "/ticket" => {
                    let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(HttpResponse::for_test(
                        200,
                        format!(r#"{{"ticket":"T-{n}"}}"#).as_bytes(),
                    ))
                }
                "/use" => {
                    self.used
                        .lock()
                        .unwrap()
                        .push(req.body_text().unwrap_or_default());
                    Ok(HttpResponse::for_test(200, br#"{"ok":true}"#))
                }
                _ => Ok(HttpResponse::for_test(404, b"{}")),
            }
        }
    }

    fn ticket_workflow() -> WorkflowDefinition {
        let mut use_template = RequestTemplate::new("POST", "/use");
        use_template.body = Some(json!({"ticket": "{{ticket}}", "resource": "placeholder"}));

        WorkflowDefinition {
            name: "ticket".to_string(),
            steps: vec![
                StepDefinition {
                    order: 1,
                    name: "issue".to_string(),
                    template: RequestTemplate::new("GET", "/ticket"),
                },
                StepDefinition {
                    order: 2,
                    name: "spend".to_string(),
                    template: use_template,
                },
            ],
            account_binding_strategy: AccountBindingStrategy::AnchorAttacker,
            attacker_account_id: Some("attacker".to_string()),
            enable_baseline: true,
            baseline_config: None,
            enable_extractor: true,
            extractor_rules: vec![ExtractorRule {
                step_order: 1,
                name: "ticket".to_string(),
                source: ExtractorSource::ResponseBodyJsonpath,
                expression: "ticket".to_string(),
                transform: None,
                required: true,
                var_type: VariableType::FlowTicket,
                write_policy: WritePolicy::Overwrite,
            }],
            enable_session_jar: false,
            session_jar_config: SessionJarConfig::default(),
            variable_configs: vec![VariableConfig {
                name: "resource".to_string(),
                data_source: DataSource::AccountField,
                role: VariableRole::Target,
                var_type: VariableType::ObjectId,
                write_policy: WritePolicy::Overwrite,
                account_field: None,
                mappings: vec![StepVariableMapping {
                    step_order: 2,
                    json_path: "body.resource".to_string(),
                    original_value: Some("placeholder".to_string()),
                }],
            }],
        }
    }

    fn sequencer(dispatch: Arc<dyn Dispatch>) -> StepSequencer {
        let accounts = vec![
            Account::new("attacker").with_field("resource", "r-a"),
            Account::new("victim").with_field("resource", "r-v"),
        ];
        StepSequencer::new(
            Arc::new(ticket_workflow()),
            Arc::new(Environment::new("https://api.example.test").unwrap()),
            Arc::new(accounts),
            dispatch,
            None,
            Arc::new(AtomicBool::new(false)),
            "run-test".to_string(),
            1,
        )
    }

    fn victim_iteration() -> Iteration {
        Iteration {
            id: 0,
            values: [("resource".to_string(), "r-v".to_string())].into_iter().collect(),
            attacker_account_id: Some("attacker".to_string()),
            target_account_id: Some("victim".to_string()),
        }
    }

    #[tokio::test]
    async fn reuse_tickets_carries_the_baseline_ticket_into_the_mutated_run() {
        let dispatch = Arc::new(TicketCounter {
            issued: AtomicUsize::new(0),
            used: Mutex::new(Vec::new()),
        });
        let seq = sequencer(dispatch.clone());

        let profile = MutationProfile {
            reuse_tickets: true,
            ..MutationProfile::default()
        };
        let pair = run_baseline_pair(
            &seq,
            &victim_iteration(),
            Some(&profile),
            &BaselineConfig::default(),
        )
        .await;

        let used = dispatch.used.lock().unwrap().clone();
        assert_eq!(used.len(), 2);
        // Baseline spent the first ticket; the mutated run reused it
        // instead of spending the freshly issued second one.
        assert!(used[0].contains("T-1"));
        assert!(used[1].contains("T-1"));
        assert!(used[1].contains("r-v"));
        assert!(pair.report.is_some());
    }

    #[tokio::test]
    async fn without_reuse_each_run_resolves_its_own_ticket() {
        let dispatch = Arc::new(TicketCounter {
            issued: AtomicUsize::new(0),
            used: Mutex::new(Vec::new()),
        });
        let seq = sequencer(dispatch.clone());

        run_baseline_pair(
            &seq,
            &victim_iteration(),
            None,
            &BaselineConfig::default(),
        )
        .await;

        let used = dispatch.used.lock().unwrap().clone();
        assert_eq!(used.len(), 2);
        assert!(used[0].contains("T-1"));
        assert!(used[1].contains("T-2"));
    }

    #[tokio::test]
    async fn control_run_points_target_variables_at_the_attacker() {
        let dispatch = Arc::new(TicketCounter {
            issued: AtomicUsize::new(0),
            used: Mutex::new(Vec::new()),
        });
        let seq = sequencer(dispatch.clone());

        run_baseline_pair(
            &seq,
            &victim_iteration(),
            None,
            &BaselineConfig::default(),
        )
        .await;

        let used = dispatch.used.lock().unwrap().clone();
        assert!(used[0].contains("r-a"), "control run must use the attacker's resource");
        assert!(used[1].contains("r-v"), "mutated run must use the victim's resource");
    }
}
