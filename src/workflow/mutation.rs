//! Mutation profiles: transformations applied to a baseline iteration plan
//! before the sequencer consumes it. Skips, repeats, account swaps, variable
//! locks, ticket reuse, and the two concurrency-testing modes.

use crate::core::error::ConfigError;
use crate::workflow::definition::{RequestTemplate, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Account referenced by a swap: a concrete id or one of the two
/// iteration-bound identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRef {
    Attacker,
    Victim,
    Concrete(String),
}

/// Which member's response is promoted to primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickPrimary {
    /// Earliest 2xx member.
    FirstSuccess,
    /// Earliest response regardless of status.
    First,
    /// Earliest 2xx if more than half the members are 2xx, else earliest overall.
    MajoritySuccess,
    /// The anchor if it returned 2xx, else the earliest 2xx extra, else the anchor.
    AnchorFirstSuccess,
    /// Always the anchor.
    AnchorFirst,
}

/// Session writeback behavior for a parallel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritebackPolicy {
    /// Only the primary member's response feeds the session context.
    PrimaryOnly,
    /// Group members never feed the session jar; the anchor's own
    /// extractor writes still apply.
    None,
}

pub const MIN_REPLAY_CONCURRENCY: u32 = 2;
pub const MAX_REPLAY_CONCURRENCY: u32 = 50;

/// Fire N copies of one step's materialized request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentReplaySpec {
    pub step_order: u32,
    pub concurrency: u32,
    /// Release all copies simultaneously once every copy is prepared.
    pub barrier: bool,
    pub timeout_ms: u64,
    pub pick_primary: PickPrimary,
}

/// A frozen request snapshot fired alongside an anchor step. Not a live
/// template reference: it is materialized verbatim, never resolved against
/// the iteration's account context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraRequest {
    pub name: String,
    pub template: RequestTemplate,
}

/// Fire an anchor step together with synthetic extra requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroupSpec {
    pub anchor_step_order: u32,
    pub barrier: bool,
    pub timeout_ms: u64,
    pub extras: Vec<ExtraRequest>,
    pub pick_primary: PickPrimary,
    pub writeback_policy: WritebackPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationProfile {
    #[serde(default)]
    pub skip_steps: BTreeSet<u32>,
    #[serde(default)]
    pub swap_account_at_steps: BTreeMap<u32, AccountRef>,
    #[serde(default)]
    pub lock_variables: BTreeSet<String>,
    #[serde(default)]
    pub reuse_tickets: bool,
    #[serde(default)]
    pub repeat_steps: BTreeMap<u32, u32>,
    #[serde(default)]
    pub concurrent_replay: Option<ConcurrentReplaySpec>,
    #[serde(default)]
    pub parallel_groups: Option<ParallelGroupSpec>,
}

impl MutationProfile {
    /// Fail-fast validation against the workflow this profile mutates.
    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<(), ConfigError> {
        if self.concurrent_replay.is_some() && self.parallel_groups.is_some() {
            return Err(ConfigError::InvalidMutation(
                "concurrent_replay and parallel_groups are mutually exclusive".to_string(),
            ));
        }

        for order in self
            .skip_steps
            .iter()
            .chain(self.swap_account_at_steps.keys())
            .chain(self.repeat_steps.keys())
        {
            if workflow.step(*order).is_none() {
                return Err(ConfigError::InvalidMutation(format!(
                    "profile references unknown step order {order}"
                )));
            }
        }

        if let Some(replay) = &self.concurrent_replay {
            if workflow.step(replay.step_order).is_none() {
                return Err(ConfigError::InvalidMutation(format!(
                    "concurrent_replay references unknown step order {}",
                    replay.step_order
                )));
            }
            if !(MIN_REPLAY_CONCURRENCY..=MAX_REPLAY_CONCURRENCY).contains(&replay.concurrency) {
                return Err(ConfigError::InvalidMutation(format!(
                    "concurrent_replay concurrency {} outside {}..={}",
                    replay.concurrency, MIN_REPLAY_CONCURRENCY, MAX_REPLAY_CONCURRENCY
                )));
            }
            if matches!(
                replay.pick_primary,
                PickPrimary::AnchorFirst | PickPrimary::AnchorFirstSuccess
            ) {
                return Err(ConfigError::InvalidMutation(
                    "anchor_* primary policies apply to parallel groups only".to_string(),
                ));
            }
        }

        if let Some(group) = &self.parallel_groups {
            if workflow.step(group.anchor_step_order).is_none() {
                return Err(ConfigError::InvalidMutation(format!(
                    "parallel_groups references unknown step order {}",
                    group.anchor_step_order
                )));
            }
            if !matches!(
                group.pick_primary,
                PickPrimary::AnchorFirst | PickPrimary::AnchorFirstSuccess
            ) {
                return Err(ConfigError::InvalidMutation(
                    "parallel groups require an anchor_* primary policy".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Concurrency mode anchored at this step, if any.
    pub fn replay_at(&self, step_order: u32) -> Option<&ConcurrentReplaySpec> {
        self.concurrent_replay
            .as_ref()
            .filter(|r| r.step_order == step_order)
    }

    pub fn group_at(&self, step_order: u32) -> Option<&ParallelGroupSpec> {
        self.parallel_groups
            .as_ref()
            .filter(|g| g.anchor_step_order == step_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{
        AccountBindingStrategy, SessionJarConfig, StepDefinition, WorkflowDefinition,
    };

    fn two_step_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "wf".to_string(),
            steps: vec![
                StepDefinition {
                    order: 1,
                    name: "login".to_string(),
                    template: RequestTemplate::new("POST", "/login"),
                },
                StepDefinition {
                    order: 2,
                    name: "purchase".to_string(),
                    template: RequestTemplate::new("POST", "/purchase"),
                },
            ],
            account_binding_strategy: AccountBindingStrategy::Independent,
            attacker_account_id: None,
            enable_baseline: false,
            baseline_config: None,
            enable_extractor: false,
            extractor_rules: Vec::new(),
            enable_session_jar: false,
            session_jar_config: SessionJarConfig::default(),
            variable_configs: Vec::new(),
        }
    }

    fn replay(step_order: u32, concurrency: u32) -> ConcurrentReplaySpec {
        ConcurrentReplaySpec {
            step_order,
            concurrency,
            barrier: true,
            timeout_ms: 5_000,
            pick_primary: PickPrimary::FirstSuccess,
        }
    }

    #[test]
    fn concurrency_modes_are_mutually_exclusive() {
        let profile = MutationProfile {
            concurrent_replay: Some(replay(2, 5)),
            parallel_groups: Some(ParallelGroupSpec {
                anchor_step_order: 2,
                barrier: false,
                timeout_ms: 5_000,
                extras: Vec::new(),
                pick_primary: PickPrimary::AnchorFirst,
                writeback_policy: WritebackPolicy::PrimaryOnly,
            }),
            ..MutationProfile::default()
        };
        assert!(profile.validate(&two_step_workflow()).is_err());
    }

    #[test]
    fn replay_concurrency_bounds_are_enforced() {
        for bad in [0, 1, 51] {
            let profile = MutationProfile {
                concurrent_replay: Some(replay(2, bad)),
                ..MutationProfile::default()
            };
            assert!(profile.validate(&two_step_workflow()).is_err(), "concurrency {bad}");
        }
        let ok = MutationProfile {
            concurrent_replay: Some(replay(2, 2)),
            ..MutationProfile::default()
        };
        assert!(ok.validate(&two_step_workflow()).is_ok());
    }

    #[test]
    fn unknown_step_references_are_rejected() {
        let profile = MutationProfile {
            skip_steps: [9].into_iter().collect(),
            ..MutationProfile::default()
        };
        assert!(profile.validate(&two_step_workflow()).is_err());
    }
}
