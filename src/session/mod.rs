//! Session Module
//!
//! Per-iteration mutable state and the machinery that feeds it: the session
//! jar (cookie/header/body-path carryover), the extractor engine that derives
//! named context variables from responses, and the template resolver that
//! materializes each step's request from template + iteration + context.
//! A `SessionContext` is exclusively owned by one iteration and discarded
//! when the iteration ends.

pub mod context;
pub mod extractor;
pub mod template;

pub use context::{ContextVariable, SessionContext};
pub use extractor::{ExtractionFailure, ExtractorRule, ExtractorSource, Transform};
pub use template::{resolve_template, TemplateError};
