use crate::util::{
    decode_enum, decode_id, decode_json, encode_enum, encode_json, from_rfc3339,
    is_unique_violation, now, to_rfc3339,
};
use pm_core::error::EvaluationError;
use pm_core::evaluations::{EvaluationRepository, EvaluationRunRepository};
use pm_core::types::enums::{EvaluationStatus, EvaluationType, RunStatus};
use pm_core::types::evaluation::{Assessment, Evaluation, EvaluationRun, NewEvaluation};
use pm_core::types::ids::{EvaluationId, RunId, TaskId};
use pm_core::types::io::EvaluationFilter;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;

const EVALUATION_COLUMNS: &str = "id, task_id, evaluator_id, type, status, score_percent, summary, verdict, context_payload, idempotency_key, created_at, updated_at";
const RUN_COLUMNS: &str =
    "id, evaluation_id, status, output_json, error_message, started_at, completed_at";

fn internal(err: impl std::fmt::Display) -> EvaluationError {
    EvaluationError::Internal {
        message: err.to_string(),
    }
}

pub struct EvaluationRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EvaluationRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, values: Vec<SqlValue>) -> Result<Vec<Evaluation>, EvaluationError> {
        let mut stmt = self.conn.prepare(sql).map_err(internal)?;
        let mut rows = stmt.query(params_from_iter(values)).map_err(internal)?;
        let mut evaluations = Vec::new();
        while let Some(row) = rows.next().map_err(internal)? {
            evaluations.push(map_evaluation_row(row)?);
        }
        Ok(evaluations)
    }

    /// Appends the type/status filter clauses shared by listing and counting.
    fn filter_clauses(
        task_id: &TaskId,
        filter: &EvaluationFilter,
    ) -> Result<(String, Vec<SqlValue>), EvaluationError> {
        let mut clauses = String::from("task_id = ?1");
        let mut values = vec![SqlValue::Text(task_id.to_string())];
        if let Some(evaluation_type) = &filter.evaluation_type {
            values.push(SqlValue::Text(encode_enum(evaluation_type).map_err(internal)?));
            clauses.push_str(&format!(" AND type = ?{}", values.len()));
        }
        if let Some(status) = &filter.status {
            values.push(SqlValue::Text(encode_enum(status).map_err(internal)?));
            clauses.push_str(&format!(" AND status = ?{}", values.len()));
        }
        Ok((clauses, values))
    }
}

impl EvaluationRepository for EvaluationRepo<'_> {
    fn create(&self, input: NewEvaluation) -> Result<Evaluation, EvaluationError> {
        let now = now();
        let (score_percent, summary, verdict) = match input.assessment {
            Some(assessment) => (
                Some(assessment.score_percent),
                Some(assessment.summary),
                Some(assessment.verdict),
            ),
            None => (None, None, None),
        };
        let evaluation = Evaluation {
            id: EvaluationId::generate(),
            task_id: input.task_id,
            evaluator_id: input.evaluator_id,
            evaluation_type: input.evaluation_type,
            status: input.status,
            score_percent,
            summary,
            verdict,
            context_payload: input.context_payload,
            idempotency_key: input.idempotency_key,
            created_at: now,
            updated_at: now,
        };

        let sql = format!(
            "INSERT INTO evaluations ({EVALUATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        );
        let result = self.conn.execute(
            &sql,
            params![
                evaluation.id.as_str(),
                evaluation.task_id.as_str(),
                evaluation.evaluator_id.as_ref().map(|id| id.as_str()),
                encode_enum(&evaluation.evaluation_type).map_err(internal)?,
                encode_enum(&evaluation.status).map_err(internal)?,
                evaluation.score_percent,
                evaluation.summary,
                evaluation
                    .verdict
                    .as_ref()
                    .map(encode_enum)
                    .transpose()
                    .map_err(internal)?,
                encode_json(&evaluation.context_payload).map_err(internal)?,
                evaluation.idempotency_key,
                to_rfc3339(&evaluation.created_at),
                to_rfc3339(&evaluation.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(evaluation),
            Err(err) if is_unique_violation(&err) => Err(EvaluationError::Conflict {
                message: "idempotency key already used for this task".to_string(),
            }),
            Err(err) => Err(internal(err)),
        }
    }

    fn get(&self, id: &EvaluationId) -> Result<Option<Evaluation>, EvaluationError> {
        let sql = format!("SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE id = ?1");
        Ok(self
            .query(&sql, vec![SqlValue::Text(id.to_string())])?
            .into_iter()
            .next())
    }

    fn find_by_idempotency_key(
        &self,
        task_id: &TaskId,
        evaluation_type: EvaluationType,
        key: &str,
    ) -> Result<Option<Evaluation>, EvaluationError> {
        let sql = format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE task_id = ?1 AND type = ?2 AND idempotency_key = ?3"
        );
        let values = vec![
            SqlValue::Text(task_id.to_string()),
            SqlValue::Text(encode_enum(&evaluation_type).map_err(internal)?),
            SqlValue::Text(key.to_string()),
        ];
        Ok(self.query(&sql, values)?.into_iter().next())
    }

    fn list_for_task(
        &self,
        task_id: &TaskId,
        filter: &EvaluationFilter,
        limit: u32,
    ) -> Result<Vec<Evaluation>, EvaluationError> {
        let (mut clauses, mut values) = Self::filter_clauses(task_id, filter)?;
        if let Some(cursor) = &filter.cursor {
            let known = self.get(cursor)?.is_some_and(|e| &e.task_id == task_id);
            if !known {
                return Err(EvaluationError::InvalidInput {
                    message: format!("unknown cursor: {cursor}"),
                });
            }
            values.push(SqlValue::Text(cursor.to_string()));
            clauses.push_str(&format!(
                " AND (created_at, id) < (SELECT created_at, id FROM evaluations WHERE id = ?{})",
                values.len()
            ));
        }
        values.push(SqlValue::Integer(i64::from(limit)));
        let sql = format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE {clauses} ORDER BY created_at DESC, id DESC LIMIT ?{}",
            values.len()
        );
        self.query(&sql, values)
    }

    fn count_for_task(
        &self,
        task_id: &TaskId,
        filter: &EvaluationFilter,
    ) -> Result<u64, EvaluationError> {
        let (clauses, values) = Self::filter_clauses(task_id, filter)?;
        let sql = format!("SELECT COUNT(*) FROM evaluations WHERE {clauses}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(internal)?;
        u64::try_from(count).map_err(internal)
    }

    fn list_by_status(&self, status: EvaluationStatus) -> Result<Vec<Evaluation>, EvaluationError> {
        let sql = format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE status = ?1 ORDER BY created_at ASC, id ASC"
        );
        self.query(
            &sql,
            vec![SqlValue::Text(encode_enum(&status).map_err(internal)?)],
        )
    }

    fn set_status(
        &self,
        id: &EvaluationId,
        status: EvaluationStatus,
    ) -> Result<Evaluation, EvaluationError> {
        let changed = self
            .conn
            .execute(
                "UPDATE evaluations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    encode_enum(&status).map_err(internal)?,
                    to_rfc3339(&now()),
                    id.as_str()
                ],
            )
            .map_err(internal)?;
        if changed == 0 {
            return Err(EvaluationError::NotFound);
        }
        self.get(id)?.ok_or(EvaluationError::NotFound)
    }

    fn set_result(
        &self,
        id: &EvaluationId,
        assessment: &Assessment,
    ) -> Result<Evaluation, EvaluationError> {
        let changed = self
            .conn
            .execute(
                "UPDATE evaluations SET status = ?1, score_percent = ?2, summary = ?3, verdict = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    encode_enum(&EvaluationStatus::Completed).map_err(internal)?,
                    assessment.score_percent,
                    assessment.summary,
                    encode_enum(&assessment.verdict).map_err(internal)?,
                    to_rfc3339(&now()),
                    id.as_str()
                ],
            )
            .map_err(internal)?;
        if changed == 0 {
            return Err(EvaluationError::NotFound);
        }
        self.get(id)?.ok_or(EvaluationError::NotFound)
    }
}

pub struct RunRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RunRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn require_running(&self, id: &RunId) -> Result<(), EvaluationError> {
        let run = self.get(id)?.ok_or_else(|| EvaluationError::InvalidState {
            message: format!("run {id} does not exist"),
        })?;
        if run.status != RunStatus::Running {
            return Err(EvaluationError::InvalidState {
                message: format!("run {id} is not running"),
            });
        }
        Ok(())
    }

    fn close(
        &self,
        id: &RunId,
        status: RunStatus,
        output: Option<&Value>,
        error_message: Option<&str>,
    ) -> Result<EvaluationRun, EvaluationError> {
        self.require_running(id)?;
        self.conn
            .execute(
                "UPDATE evaluation_runs SET status = ?1, output_json = ?2, error_message = ?3, completed_at = ?4 WHERE id = ?5",
                params![
                    encode_enum(&status).map_err(internal)?,
                    output.map(encode_json).transpose().map_err(internal)?,
                    error_message,
                    to_rfc3339(&now()),
                    id.as_str()
                ],
            )
            .map_err(internal)?;
        self.get(id)?.ok_or_else(|| internal(format!("run {id} vanished")))
    }
}

impl EvaluationRunRepository for RunRepo<'_> {
    fn start(&self, evaluation_id: &EvaluationId) -> Result<EvaluationRun, EvaluationError> {
        let run = EvaluationRun {
            id: RunId::generate(),
            evaluation_id: evaluation_id.clone(),
            status: RunStatus::Running,
            output_json: None,
            error_message: None,
            started_at: now(),
            completed_at: None,
        };
        let sql = format!("INSERT INTO evaluation_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, NULL, NULL, ?4, NULL)");
        self.conn
            .execute(
                &sql,
                params![
                    run.id.as_str(),
                    run.evaluation_id.as_str(),
                    encode_enum(&run.status).map_err(internal)?,
                    to_rfc3339(&run.started_at),
                ],
            )
            .map_err(internal)?;
        Ok(run)
    }

    fn get(&self, id: &RunId) -> Result<Option<EvaluationRun>, EvaluationError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM evaluation_runs WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(internal)?;
        let mut rows = stmt.query([id.as_str()]).map_err(internal)?;
        let Some(row) = rows.next().map_err(internal)? else {
            return Ok(None);
        };
        map_run_row(row).map(Some)
    }

    fn complete(&self, id: &RunId, output: &Value) -> Result<EvaluationRun, EvaluationError> {
        self.close(id, RunStatus::Completed, Some(output), None)
    }

    fn fail(&self, id: &RunId, error_message: &str) -> Result<EvaluationRun, EvaluationError> {
        self.close(id, RunStatus::Failed, None, Some(error_message))
    }

    fn list(&self, evaluation_id: &EvaluationId) -> Result<Vec<EvaluationRun>, EvaluationError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM evaluation_runs WHERE evaluation_id = ?1 ORDER BY started_at DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(internal)?;
        let mut rows = stmt.query([evaluation_id.as_str()]).map_err(internal)?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next().map_err(internal)? {
            runs.push(map_run_row(row)?);
        }
        Ok(runs)
    }
}

fn map_evaluation_row(row: &rusqlite::Row<'_>) -> Result<Evaluation, EvaluationError> {
    let id: String = row.get(0).map_err(internal)?;
    let task_id: String = row.get(1).map_err(internal)?;
    let evaluator_id: Option<String> = row.get(2).map_err(internal)?;
    let evaluation_type: String = row.get(3).map_err(internal)?;
    let status: String = row.get(4).map_err(internal)?;
    let verdict: Option<String> = row.get(7).map_err(internal)?;
    let context_payload: String = row.get(8).map_err(internal)?;
    let created_at: String = row.get(10).map_err(internal)?;
    let updated_at: String = row.get(11).map_err(internal)?;

    Ok(Evaluation {
        id: decode_id(&id).map_err(internal)?,
        task_id: decode_id(&task_id).map_err(internal)?,
        evaluator_id: evaluator_id
            .as_deref()
            .map(decode_id)
            .transpose()
            .map_err(internal)?,
        evaluation_type: decode_enum(&evaluation_type).map_err(internal)?,
        status: decode_enum(&status).map_err(internal)?,
        score_percent: row.get(5).map_err(internal)?,
        summary: row.get(6).map_err(internal)?,
        verdict: verdict
            .as_deref()
            .map(decode_enum)
            .transpose()
            .map_err(internal)?,
        context_payload: decode_json(&context_payload).map_err(internal)?,
        idempotency_key: row.get(9).map_err(internal)?,
        created_at: from_rfc3339(&created_at).map_err(internal)?,
        updated_at: from_rfc3339(&updated_at).map_err(internal)?,
    })
}

fn map_run_row(row: &rusqlite::Row<'_>) -> Result<EvaluationRun, EvaluationError> {
    let id: String = row.get(0).map_err(internal)?;
    let evaluation_id: String = row.get(1).map_err(internal)?;
    let status: String = row.get(2).map_err(internal)?;
    let output_json: Option<String> = row.get(3).map_err(internal)?;
    let started_at: String = row.get(5).map_err(internal)?;
    let completed_at: Option<String> = row.get(6).map_err(internal)?;

    Ok(EvaluationRun {
        id: decode_id(&id).map_err(internal)?,
        evaluation_id: decode_id(&evaluation_id).map_err(internal)?,
        status: decode_enum(&status).map_err(internal)?,
        output_json: output_json
            .as_deref()
            .map(decode_json)
            .transpose()
            .map_err(internal)?,
        error_message: row.get(4).map_err(internal)?,
        started_at: from_rfc3339(&started_at).map_err(internal)?,
        completed_at: completed_at
            .as_deref()
            .map(from_rfc3339)
            .transpose()
            .map_err(internal)?,
    })
}
