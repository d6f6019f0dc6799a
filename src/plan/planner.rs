//! Expands variable configs + binding strategy into concrete iterations.

use crate::core::context::Account;
use crate::core::error::ConfigError;
use crate::payload::pools::ValuePools;
use crate::plan::iteration::Iteration;
use crate::workflow::definition::{AccountBindingStrategy, WorkflowDefinition};
use crate::workflow::variables::{DataSource, VariableConfig, VariableRole};
use std::collections::BTreeMap;

/// Build the full iteration plan. The workflow must already have passed
/// `WorkflowDefinition::validate`.
pub fn plan_iterations(
    workflow: &WorkflowDefinition,
    accounts: &[Account],
    pools: &ValuePools,
    max_iterations: usize,
) -> Result<Vec<Iteration>, ConfigError> {
    let iterations = match workflow.account_binding_strategy {
        AccountBindingStrategy::Independent => plan_independent(workflow, accounts, pools, max_iterations)?,
        AccountBindingStrategy::PerAccount => plan_per_account(workflow, accounts, pools, max_iterations)?,
        AccountBindingStrategy::AnchorAttacker => {
            plan_anchor_attacker(workflow, accounts, pools, max_iterations)?
        }
    };

    tracing::info!(
        workflow = %workflow.name,
        strategy = ?workflow.account_binding_strategy,
        iterations = iterations.len(),
        "iteration plan built"
    );
    Ok(iterations)
}

fn plan_independent(
    workflow: &WorkflowDefinition,
    accounts: &[Account],
    pools: &ValuePools,
    cap: usize,
) -> Result<Vec<Iteration>, ConfigError> {
    let mut named_pools = Vec::new();
    for var in &workflow.variable_configs {
        named_pools.push((var.name.clone(), pool_for(var, accounts, pools)?));
    }

    let assignments = cartesian(&named_pools, cap)?;
    Ok(assignments
        .into_iter()
        .enumerate()
        .map(|(id, values)| Iteration {
            id: id as u64,
            values,
            attacker_account_id: None,
            target_account_id: None,
        })
        .collect())
}

fn plan_per_account(
    workflow: &WorkflowDefinition,
    accounts: &[Account],
    pools: &ValuePools,
    cap: usize,
) -> Result<Vec<Iteration>, ConfigError> {
    let (account_vars, other_vars): (Vec<&VariableConfig>, Vec<&VariableConfig>) = workflow
        .variable_configs
        .iter()
        .partition(|v| v.data_source == DataSource::AccountField);

    let mut named_pools = Vec::new();
    for var in &other_vars {
        named_pools.push((var.name.clone(), pool_for(var, accounts, pools)?));
    }
    let other_assignments = cartesian(&named_pools, cap)?;

    if account_vars.is_empty() {
        return Ok(other_assignments
            .into_iter()
            .enumerate()
            .map(|(id, values)| Iteration {
                id: id as u64,
                values,
                attacker_account_id: None,
                target_account_id: None,
            })
            .collect());
    }

    // One iteration per account that carries every bound field; accounts
    // missing a field do not participate.
    let mut bound: Vec<(&Account, BTreeMap<String, String>)> = Vec::new();
    for account in accounts {
        let mut values = BTreeMap::new();
        let mut complete = true;
        for var in &account_vars {
            match account.field(var.field_name()) {
                Some(v) => {
                    values.insert(var.name.clone(), v.to_string());
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            bound.push((account, values));
        }
    }

    if bound.is_empty() {
        return Err(ConfigError::EmptyPool(account_vars[0].name.clone()));
    }

    let planned = bound
        .len()
        .checked_mul(other_assignments.len())
        .unwrap_or(usize::MAX);
    if planned > cap {
        return Err(ConfigError::PlanTooLarge { planned, cap });
    }

    let mut iterations = Vec::new();
    for (account, account_values) in &bound {
        for other in &other_assignments {
            let mut values = account_values.clone();
            values.extend(other.clone());
            iterations.push(Iteration {
                id: iterations.len() as u64,
                values,
                attacker_account_id: None,
                target_account_id: Some(account.id.clone()),
            });
        }
    }
    Ok(iterations)
}

fn plan_anchor_attacker(
    workflow: &WorkflowDefinition,
    accounts: &[Account],
    pools: &ValuePools,
    cap: usize,
) -> Result<Vec<Iteration>, ConfigError> {
    let attacker_id = workflow
        .attacker_account_id
        .as_deref()
        .ok_or(ConfigError::MissingAttackerAccount)?;
    let attacker = accounts
        .iter()
        .find(|a| a.id == attacker_id)
        .ok_or_else(|| ConfigError::UnknownAttackerAccount(attacker_id.to_string()))?;

    let victims: Vec<&Account> = accounts.iter().filter(|a| a.id != attacker_id).collect();
    if victims.is_empty() {
        return Err(ConfigError::NoVictimAccounts);
    }

    // Attacker identity fixed for every iteration.
    let mut attacker_values = BTreeMap::new();
    for var in &workflow.variable_configs {
        if var.role == VariableRole::Attacker {
            let value = attacker
                .field(var.field_name())
                .ok_or_else(|| ConfigError::EmptyPool(var.name.clone()))?;
            attacker_values.insert(var.name.clone(), value.to_string());
        }
    }

    let mut named_pools = Vec::new();
    for var in &workflow.variable_configs {
        if var.role == VariableRole::Neutral {
            named_pools.push((var.name.clone(), pool_for(var, accounts, pools)?));
        }
    }
    let neutral_assignments = cartesian(&named_pools, cap)?;

    let target_vars: Vec<&VariableConfig> = workflow
        .variable_configs
        .iter()
        .filter(|v| v.role == VariableRole::Target)
        .collect();

    let planned = victims
        .len()
        .checked_mul(neutral_assignments.len())
        .unwrap_or(usize::MAX);
    if planned > cap {
        return Err(ConfigError::PlanTooLarge { planned, cap });
    }

    let mut iterations = Vec::new();
    for victim in &victims {
        let mut victim_values = BTreeMap::new();
        let mut complete = true;
        for var in &target_vars {
            match victim.field(var.field_name()) {
                Some(v) => {
                    victim_values.insert(var.name.clone(), v.to_string());
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            tracing::debug!(victim = %victim.id, "victim account lacks a target field, skipped");
            continue;
        }

        for neutral in &neutral_assignments {
            let mut values = attacker_values.clone();
            values.extend(victim_values.clone());
            values.extend(neutral.clone());
            iterations.push(Iteration {
                id: iterations.len() as u64,
                values,
                attacker_account_id: Some(attacker.id.clone()),
                target_account_id: Some(victim.id.clone()),
            });
        }
    }

    if iterations.is_empty() {
        if let Some(var) = target_vars.first() {
            return Err(ConfigError::EmptyPool(var.name.clone()));
        }
    }
    Ok(iterations)
}

/// Value pool for one variable outside the role-bound cases.
fn pool_for(
    var: &VariableConfig,
    accounts: &[Account],
    pools: &ValuePools,
) -> Result<Vec<String>, ConfigError> {
    let values: Vec<String> = match var.data_source {
        DataSource::Checklist => pools
            .checklist(&var.name)
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        DataSource::SecurityRule => pools
            .security_rule(&var.name)
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        DataSource::AccountField => accounts
            .iter()
            .filter_map(|a| a.field(var.field_name()))
            .map(str::to_string)
            .collect(),
        // Produced at run time by an extractor; the plan carries the
        // placeholder and the resolver fills it from the session context.
        DataSource::WorkflowContext => vec![format!("{{{{{}}}}}", var.name)],
    };

    if values.is_empty() {
        return Err(ConfigError::EmptyPool(var.name.clone()));
    }
    Ok(values)
}

/// Cartesian product over named pools, capped. Empty input produces the
/// single empty assignment.
fn cartesian(
    named_pools: &[(String, Vec<String>)],
    cap: usize,
) -> Result<Vec<BTreeMap<String, String>>, ConfigError> {
    let planned = named_pools
        .iter()
        .try_fold(1usize, |acc, (_, pool)| acc.checked_mul(pool.len()))
        .unwrap_or(usize::MAX);
    if planned > cap {
        return Err(ConfigError::PlanTooLarge { planned, cap });
    }

    let mut out = Vec::with_capacity(planned);
    let mut indices = vec![0usize; named_pools.len()];
    loop {
        let assignment: BTreeMap<String, String> = named_pools
            .iter()
            .zip(&indices)
            .map(|((name, pool), &i)| (name.clone(), pool[i].clone()))
            .collect();
        out.push(assignment);

        // Odometer increment, most-significant pool last.
        let mut pos = named_pools.len();
        loop {
            if pos == 0 {
                return Ok(out);
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < named_pools[pos].1.len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{
        RequestTemplate, SessionJarConfig, StepDefinition,
    };
    use crate::workflow::variables::{StepVariableMapping, VariableType, WritePolicy};
    use std::collections::BTreeSet;

    fn variable(name: &str, source: DataSource, role: VariableRole) -> VariableConfig {
        VariableConfig {
            name: name.to_string(),
            data_source: source,
            role,
            var_type: VariableType::Generic,
            write_policy: WritePolicy::Overwrite,
            account_field: None,
            mappings: vec![StepVariableMapping {
                step_order: 1,
                json_path: format!("query.{name}"),
                original_value: None,
            }],
        }
    }

    fn workflow(strategy: AccountBindingStrategy, vars: Vec<VariableConfig>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "plan".to_string(),
            steps: vec![StepDefinition {
                order: 1,
                name: "fetch".to_string(),
                template: RequestTemplate::new("GET", "/items"),
            }],
            account_binding_strategy: strategy,
            attacker_account_id: None,
            enable_baseline: false,
            baseline_config: None,
            enable_extractor: false,
            extractor_rules: Vec::new(),
            enable_session_jar: false,
            session_jar_config: SessionJarConfig::default(),
            variable_configs: vars,
        }
    }

    fn pools(entries: &[(&str, &[&str])]) -> ValuePools {
        let mut pools = ValuePools::new();
        for (name, values) in entries {
            pools.insert_checklist(*name, values.iter().map(|v| v.to_string()).collect());
        }
        pools
    }

    #[test]
    fn independent_produces_full_cartesian_product() {
        let wf = workflow(
            AccountBindingStrategy::Independent,
            vec![
                variable("a", DataSource::Checklist, VariableRole::Neutral),
                variable("b", DataSource::Checklist, VariableRole::Neutral),
            ],
        );
        let pools = pools(&[("a", &["1", "2", "3"]), ("b", &["x", "y"])]);

        let plan = plan_iterations(&wf, &[], &pools, 100).unwrap();
        assert_eq!(plan.len(), 6);

        // Every iteration is a distinct full assignment.
        let distinct: BTreeSet<String> = plan
            .iter()
            .map(|it| format!("{}/{}", it.value("a").unwrap(), it.value("b").unwrap()))
            .collect();
        assert_eq!(distinct.len(), 6);
    }

    #[test]
    fn independent_over_cap_is_rejected() {
        let wf = workflow(
            AccountBindingStrategy::Independent,
            vec![
                variable("a", DataSource::Checklist, VariableRole::Neutral),
                variable("b", DataSource::Checklist, VariableRole::Neutral),
            ],
        );
        let pools = pools(&[("a", &["1", "2", "3"]), ("b", &["x", "y"])]);

        let err = plan_iterations(&wf, &[], &pools, 5).unwrap_err();
        assert!(matches!(err, ConfigError::PlanTooLarge { planned: 6, cap: 5 }));
    }

    #[test]
    fn empty_pool_names_the_variable() {
        let wf = workflow(
            AccountBindingStrategy::Independent,
            vec![variable("order_id", DataSource::Checklist, VariableRole::Neutral)],
        );
        let err = plan_iterations(&wf, &[], &ValuePools::new(), 100).unwrap_err();
        match err {
            ConfigError::EmptyPool(name) => assert_eq!(name, "order_id"),
            other => panic!("expected EmptyPool, got {other:?}"),
        }
    }

    #[test]
    fn per_account_binds_all_account_fields_from_one_account() {
        let wf = workflow(
            AccountBindingStrategy::PerAccount,
            vec![
                variable("user_id", DataSource::AccountField, VariableRole::Neutral),
                variable("token", DataSource::AccountField, VariableRole::Neutral),
                variable("item", DataSource::Checklist, VariableRole::Neutral),
            ],
        );
        let accounts = vec![
            Account::new("a1").with_field("user_id", "u1").with_field("token", "t1"),
            Account::new("a2").with_field("user_id", "u2").with_field("token", "t2"),
        ];
        let pools = pools(&[("item", &["i1", "i2"])]);

        let plan = plan_iterations(&wf, &accounts, &pools, 100).unwrap();
        assert_eq!(plan.len(), 4);
        for it in &plan {
            // Account fields never mix across accounts.
            let uid = it.value("user_id").unwrap();
            let tok = it.value("token").unwrap();
            assert_eq!(uid.trim_start_matches('u'), tok.trim_start_matches('t'));
        }
    }

    #[test]
    fn anchor_attacker_fixes_attacker_and_rotates_victims() {
        let mut vars = vec![
            variable("attacker_token", DataSource::AccountField, VariableRole::Attacker),
            variable("victim_resource", DataSource::AccountField, VariableRole::Target),
        ];
        vars[0].account_field = Some("token".to_string());
        vars[1].account_field = Some("resource".to_string());

        let mut wf = workflow(AccountBindingStrategy::AnchorAttacker, vars);
        wf.attacker_account_id = Some("attacker".to_string());

        let accounts = vec![
            Account::new("attacker").with_field("token", "tok-a").with_field("resource", "r-a"),
            Account::new("v1").with_field("token", "tok-1").with_field("resource", "r-1"),
            Account::new("v2").with_field("token", "tok-2").with_field("resource", "r-2"),
        ];

        let plan = plan_iterations(&wf, &accounts, &ValuePools::new(), 100).unwrap();
        assert_eq!(plan.len(), 2);
        for it in &plan {
            assert_eq!(it.value("attacker_token"), Some("tok-a"));
            assert_eq!(it.attacker_account_id.as_deref(), Some("attacker"));
        }
        let targets: BTreeSet<&str> = plan.iter().map(|it| it.value("victim_resource").unwrap()).collect();
        assert_eq!(targets, ["r-1", "r-2"].into_iter().collect());
    }

    #[test]
    fn anchor_attacker_requires_a_victim() {
        let mut wf = workflow(AccountBindingStrategy::AnchorAttacker, Vec::new());
        wf.attacker_account_id = Some("attacker".to_string());
        let accounts = vec![Account::new("attacker")];

        let err = plan_iterations(&wf, &accounts, &ValuePools::new(), 100).unwrap_err();
        assert!(matches!(err, ConfigError::NoVictimAccounts));
    }

    #[test]
    fn unknown_attacker_account_is_rejected() {
        let mut wf = workflow(AccountBindingStrategy::AnchorAttacker, Vec::new());
        wf.attacker_account_id = Some("ghost".to_string());
        let accounts = vec![Account::new("a1"), Account::new("a2")];

        let err = plan_iterations(&wf, &accounts, &ValuePools::new(), 100).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAttackerAccount(_)));
    }

    #[test]
    fn workflow_context_variables_plan_as_placeholders() {
        let wf = workflow(
            AccountBindingStrategy::Independent,
            vec![variable("csrf", DataSource::WorkflowContext, VariableRole::Neutral)],
        );
        let plan = plan_iterations(&wf, &[], &ValuePools::new(), 100).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].value("csrf"), Some("{{csrf}}"));
    }
}
