//! Workflow Definition Module
//!
//! Declarative description of a test workflow: ordered request-template
//! steps, variable bindings, account-binding strategy, and the mutation
//! profiles that transform a baseline plan into an attack plan.
//! Definitions are owned by external configuration storage and are
//! read-only for the duration of a run.

pub mod definition;
pub mod mutation;
pub mod variables;

pub use definition::{
    AccountBindingStrategy, FailureLogic, FailurePattern, PatternTarget, RequestTemplate,
    SessionJarConfig, StepDefinition, WorkflowDefinition,
};
pub use mutation::{AccountRef, ConcurrentReplaySpec, ExtraRequest, MutationProfile, ParallelGroupSpec, PickPrimary, WritebackPolicy};
pub use variables::{
    DataSource, StepVariableMapping, VariableConfig, VariableRole, VariableType, WritePolicy,
};
