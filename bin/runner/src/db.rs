//! PostgreSQL collaborators: the execution store and the query runner used
//! by `database` nodes.

use async_trait::async_trait;
use autoflow_core::{ExecutionId, UserId, WorkflowId};
use autoflow_workflow::nodes::QueryRunner;
use autoflow_workflow::{
    Execution, ExecutionStore, ExecutionUpdate, ExecutorError, LogEntry, StoreError,
};
use rootcause::Report;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

/// Execution records and logs in the `executions` and `execution_logs`
/// tables.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations.
    pub async fn migrate(&self) -> Result<(), Report<StoreError>> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                details: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        input_data: JsonValue,
    ) -> Result<Execution, Report<StoreError>> {
        let execution = Execution::new(workflow_id, user_id, input_data);
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, user_id, status, input_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.user_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.input_data)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(execution)
    }

    async fn update_execution_status(
        &self,
        execution_id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, output_data = $3, context = $4, error = $5,
                started_at = $6, finished_at = $7, duration_ms = $8
            WHERE id = $1
            "#,
        )
        .bind(execution_id.to_string())
        .bind(update.status.as_str())
        .bind(&update.output_data)
        .bind(&update.context)
        .bind(&update.error)
        .bind(update.started_at)
        .bind(update.finished_at)
        .bind(update.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound { execution_id }.into());
        }
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), Report<StoreError>> {
        let sequence = i64::try_from(entry.sequence).map_err(|e| StoreError::Backend {
            details: format!("log sequence out of range: {e}"),
        })?;
        let data = (!entry.data.is_null()).then_some(&entry.data);
        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (execution_id, sequence, node_id, level, message, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.execution_id.to_string())
        .bind(sequence)
        .bind(entry.node_id.as_ref().map(ToString::to_string))
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(data)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

/// Runs `database` node queries against the configured pool.
///
/// Rows come back as JSON objects. Parameters are bound as text (`null`
/// stays NULL), so queries cast them where a column type needs it, e.g.
/// `WHERE id = $1::int`.
pub struct PgQueryRunner {
    pool: PgPool,
}

impl PgQueryRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Wraps a row-returning query so the whole result set arrives as one JSON
/// array.
fn aggregate_query(query: &str) -> String {
    let query = query.trim().trim_end_matches(';');
    format!("SELECT COALESCE(jsonb_agg(to_jsonb(q)), '[]'::jsonb) FROM ({query}) AS q")
}

fn text_param(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    async fn query(&self, query: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>, ExecutorError> {
        let sql = aggregate_query(query);
        let mut statement = sqlx::query_scalar::<_, JsonValue>(&sql);
        for param in params {
            statement = statement.bind(text_param(param));
        }
        let rows = statement
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ExecutorError::External {
                service: "database".to_string(),
                message: e.to_string(),
            })?;

        match rows {
            JsonValue::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_is_wrapped_for_aggregation() {
        assert_eq!(
            aggregate_query("SELECT id FROM users WHERE active = $1::bool;\n"),
            "SELECT COALESCE(jsonb_agg(to_jsonb(q)), '[]'::jsonb) \
             FROM (SELECT id FROM users WHERE active = $1::bool) AS q"
        );
    }

    #[test]
    fn params_bind_as_text() {
        assert_eq!(text_param(&json!("abc")), Some("abc".to_string()));
        assert_eq!(text_param(&json!(42)), Some("42".to_string()));
        assert_eq!(text_param(&json!(true)), Some("true".to_string()));
        assert_eq!(text_param(&json!({"a": 1})), Some(r#"{"a":1}"#.to_string()));
        assert_eq!(text_param(&JsonValue::Null), None);
    }
}
