use pm_core::error::ProgressMarkError;
use pm_core::store::{Store, StoreFactory};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::evaluation_repo::{EvaluationRepo, RunRepo};
use crate::event_repo::EventRepo;
use crate::schema;
use crate::task_repo::TaskRepo;

pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Tasks<'a>
        = TaskRepo<'a>
    where
        Self: 'a;
    type Evaluations<'a>
        = EvaluationRepo<'a>
    where
        Self: 'a;
    type Runs<'a>
        = RunRepo<'a>
    where
        Self: 'a;
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;

    fn tasks(&self) -> Self::Tasks<'_> {
        TaskRepo::new(&self.conn)
    }

    fn evaluations(&self) -> Self::Evaluations<'_> {
        EvaluationRepo::new(&self.conn)
    }

    fn runs(&self) -> Self::Runs<'_> {
        RunRepo::new(&self.conn)
    }

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, ProgressMarkError>
    where
        F: FnOnce(&Self) -> Result<T, ProgressMarkError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(ProgressMarkError::internal)?;
        match f(self) {
            Ok(value) => {
                if let Err(err) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(ProgressMarkError::internal(err));
                }
                Ok(value)
            }
            Err(err) => {
                self.conn
                    .execute_batch("ROLLBACK")
                    .map_err(ProgressMarkError::internal)?;
                Err(err)
            }
        }
    }
}

/// Opens a fresh connection to one database file per call.
#[derive(Debug, Clone)]
pub struct DbStoreFactory {
    path: PathBuf,
}

impl DbStoreFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreFactory for DbStoreFactory {
    type Store = DbStore;

    fn open(&self) -> Result<DbStore, ProgressMarkError> {
        let conn = schema::open(&self.path).map_err(ProgressMarkError::internal)?;
        Ok(DbStore::new(conn))
    }
}
