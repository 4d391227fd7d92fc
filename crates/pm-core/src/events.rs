use crate::error::ProgressMarkError;
use pm_events::EventRecord;

pub trait EventRepository {
    /// Assigns `id` and `seq` and returns the stored record.
    fn append(&self, event: EventRecord) -> Result<EventRecord, ProgressMarkError>;
    fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, ProgressMarkError>;
}
