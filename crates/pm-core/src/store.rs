use crate::ProgressMarkError;
use crate::evaluations::{EvaluationRepository, EvaluationRunRepository};
use crate::events::EventRepository;
use crate::tasks::TaskRepository;

pub trait Store {
    type Tasks<'a>: TaskRepository
    where
        Self: 'a;
    type Evaluations<'a>: EvaluationRepository
    where
        Self: 'a;
    type Runs<'a>: EvaluationRunRepository
    where
        Self: 'a;
    type Events<'a>: EventRepository
    where
        Self: 'a;

    fn tasks(&self) -> Self::Tasks<'_>;
    fn evaluations(&self) -> Self::Evaluations<'_>;
    fn runs(&self) -> Self::Runs<'_>;
    fn events(&self) -> Self::Events<'_>;

    /// Runs `f` in one write transaction; any error rolls everything back.
    fn with_tx<F, T>(&self, f: F) -> Result<T, ProgressMarkError>
    where
        F: FnOnce(&Self) -> Result<T, ProgressMarkError>;
}

/// Opens independent store handles. Background work uses this so that no handle
/// is held while waiting on the model.
pub trait StoreFactory: Send + Sync {
    type Store: Store;

    fn open(&self) -> Result<Self::Store, ProgressMarkError>;
}
