pub mod error;
pub mod evaluations;
pub mod evaluator;
pub mod events;
pub mod progressmark;
pub mod queue;
pub mod runner;
pub mod store;
pub mod tasks;
pub mod validation;

pub mod types;

pub use crate::error::ProgressMarkError;
pub use crate::evaluator::TaskEvaluator;
pub use crate::progressmark::{ProgressMark, RequestContext};
pub use crate::runner::EvaluationRunner;
pub use crate::store::{Store, StoreFactory};
