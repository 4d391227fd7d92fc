pub mod evaluation_repo;
pub mod event_repo;
pub mod schema;
pub mod store;
pub mod task_repo;
pub mod util;

pub use store::{DbStore, DbStoreFactory};

#[cfg(test)]
mod flow_tests;
