//! SQLite-backed Task Store.
//!
//! Single-file durable storage. All access goes through one connection
//! behind a mutex, which serializes row mutations; the CAS guards remain in
//! the SQL (`WHERE id = ? AND version = ?` / `AND status = 'QUEUED'`) so the
//! same store file can be shared with other processes without losing the
//! compare-and-swap semantics.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use async_trait::async_trait;

use super::{
    ExecutionMetrics, Mutation, PageRequest, SortOrder, StatusCounts, StoreError, TaskFilter,
    TaskPage, TaskStore,
};
use crate::task::types::{now_ms, NewTask, Priority, Task, TaskId, TaskStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name             TEXT    NOT NULL,
    task_type             TEXT    NOT NULL,
    priority              INTEGER NOT NULL,
    status                TEXT    NOT NULL,
    payload               TEXT,
    description           TEXT,
    scheduled_time        INTEGER,
    next_execution_time   INTEGER NOT NULL,
    timeout_seconds       INTEGER NOT NULL,
    max_retries           INTEGER NOT NULL,
    retry_count           INTEGER NOT NULL DEFAULT 0,
    last_error            TEXT,
    last_executed_at      INTEGER,
    execution_duration_ms INTEGER,
    worker_id             TEXT,
    lease_until           INTEGER,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL,
    version               INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_tasks_ready
    ON tasks (status, priority DESC, created_at ASC)
    WHERE status IN ('PENDING', 'QUEUED');
CREATE INDEX IF NOT EXISTS idx_tasks_next_execution
    ON tasks (next_execution_time);
CREATE INDEX IF NOT EXISTS idx_tasks_running
    ON tasks (status, last_executed_at)
    WHERE status = 'RUNNING';
CREATE INDEX IF NOT EXISTS idx_tasks_completed
    ON tasks (status, updated_at)
    WHERE status = 'COMPLETED';
"#;

const COLUMNS: &str = "id, task_name, task_type, priority, status, payload, description, \
     scheduled_time, next_execution_time, timeout_seconds, max_retries, retry_count, \
     last_error, last_executed_at, execution_duration_ms, worker_id, lease_until, \
     created_at, updated_at, version";

pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn select_by_id(conn: &Connection, id: TaskId) -> Result<Option<Task>, StoreError> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.0 as i64],
            map_task,
        )
        .optional()
        .map_err(store_err)
    }

    fn insert_row(conn: &Connection, new: &NewTask, now: u64) -> Result<Task, StoreError> {
        conn.execute(
            "INSERT INTO tasks (task_name, task_type, priority, status, payload, description, \
             scheduled_time, next_execution_time, timeout_seconds, max_retries, retry_count, \
             created_at, updated_at, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11, 1)",
            params![
                new.task_name,
                new.task_type,
                new.priority.weight() as i64,
                new.status.as_str(),
                new.payload,
                new.description,
                new.scheduled_time.map(|t| t as i64),
                new.next_execution_time as i64,
                new.timeout_seconds as i64,
                new.max_retries as i64,
                now as i64,
            ],
        )
        .map_err(store_err)?;

        let id = conn.last_insert_rowid() as u64;
        Ok(Task {
            id: TaskId(id),
            task_name: new.task_name.clone(),
            task_type: new.task_type.clone(),
            priority: new.priority,
            status: new.status,
            payload: new.payload.clone(),
            description: new.description.clone(),
            scheduled_time: new.scheduled_time,
            next_execution_time: new.next_execution_time,
            timeout_seconds: new.timeout_seconds,
            max_retries: new.max_retries,
            retry_count: 0,
            last_error: None,
            last_executed_at: None,
            execution_duration_ms: None,
            worker_id: None,
            lease_until: None,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    fn scan(
        conn: &Connection,
        where_clause: &str,
        order_clause: &str,
        limit: Option<usize>,
        bound: u64,
    ) -> Result<Vec<Task>, StoreError> {
        let limit_clause = limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {COLUMNS} FROM tasks WHERE {where_clause} ORDER BY {order_clause}{limit_clause}"
        );

        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params![bound as i64], map_task)
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let weight = row.get::<_, i64>(3)? as u32;
    let status_text: String = row.get(4)?;

    Ok(Task {
        id: TaskId(row.get::<_, i64>(0)? as u64),
        task_name: row.get(1)?,
        task_type: row.get(2)?,
        priority: Priority::from_weight(weight).unwrap_or_default(),
        status: TaskStatus::parse(&status_text).unwrap_or(TaskStatus::Pending),
        payload: row.get(5)?,
        description: row.get(6)?,
        scheduled_time: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
        next_execution_time: row.get::<_, i64>(8)? as u64,
        timeout_seconds: row.get::<_, i64>(9)? as u32,
        max_retries: row.get::<_, i64>(10)? as u32,
        retry_count: row.get::<_, i64>(11)? as u32,
        last_error: row.get(12)?,
        last_executed_at: row.get::<_, Option<i64>>(13)?.map(|t| t as u64),
        execution_duration_ms: row.get::<_, Option<i64>>(14)?.map(|t| t as u64),
        worker_id: row.get(15)?,
        lease_until: row.get::<_, Option<i64>>(16)?.map(|t| t as u64),
        created_at: row.get::<_, i64>(17)? as u64,
        updated_at: row.get::<_, i64>(18)? as u64,
        version: row.get::<_, i64>(19)? as u64,
    })
}

fn order_sql(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::CreatedAtDesc => "created_at DESC, id DESC",
        SortOrder::CreatedAtAsc => "created_at ASC, id ASC",
        SortOrder::UpdatedAtDesc => "updated_at DESC, id DESC",
        SortOrder::UpdatedAtAsc => "updated_at ASC, id ASC",
        SortOrder::PriorityDesc => "priority DESC, created_at ASC, id ASC",
        SortOrder::PriorityAsc => "priority ASC, created_at ASC, id ASC",
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let conn = self.conn.lock();
        Self::insert_row(&conn, &task, now_ms())
    }

    async fn insert_batch(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_err)?;

        let now = now_ms();
        let mut inserted = Vec::with_capacity(tasks.len());
        for new in &tasks {
            inserted.push(Self::insert_row(&tx, new, now)?);
        }

        tx.commit().map_err(store_err)?;
        Ok(inserted)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock();
        Self::select_by_id(&conn, id)
    }

    async fn cas_update(
        &self,
        id: TaskId,
        expected_version: u64,
        mutation: Mutation,
    ) -> Result<Task, StoreError> {
        let conn = self.conn.lock();

        let Some(mut task) = Self::select_by_id(&conn, id)? else {
            return Err(StoreError::NotFound(id));
        };
        if task.version != expected_version {
            return Err(StoreError::Conflict(id));
        }

        let floor = task.next_execution_time;
        mutation(&mut task);
        // next_execution_time never moves backwards for a given task.
        task.next_execution_time = task.next_execution_time.max(floor);
        task.version += 1;
        task.updated_at = now_ms();

        let changed = conn
            .execute(
                "UPDATE tasks SET task_name = ?1, task_type = ?2, priority = ?3, status = ?4, \
                 payload = ?5, description = ?6, scheduled_time = ?7, next_execution_time = ?8, \
                 timeout_seconds = ?9, max_retries = ?10, retry_count = ?11, last_error = ?12, \
                 last_executed_at = ?13, execution_duration_ms = ?14, worker_id = ?15, \
                 lease_until = ?16, updated_at = ?17, version = ?18 \
                 WHERE id = ?19 AND version = ?20",
                params![
                    task.task_name,
                    task.task_type,
                    task.priority.weight() as i64,
                    task.status.as_str(),
                    task.payload,
                    task.description,
                    task.scheduled_time.map(|t| t as i64),
                    task.next_execution_time as i64,
                    task.timeout_seconds as i64,
                    task.max_retries as i64,
                    task.retry_count as i64,
                    task.last_error,
                    task.last_executed_at.map(|t| t as i64),
                    task.execution_duration_ms.map(|t| t as i64),
                    task.worker_id,
                    task.lease_until.map(|t| t as i64),
                    task.updated_at as i64,
                    task.version as i64,
                    id.0 as i64,
                    expected_version as i64,
                ],
            )
            .map_err(store_err)?;

        if changed == 0 {
            return Err(StoreError::Conflict(id));
        }
        Ok(task)
    }

    async fn claim(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_ms: Option<u64>,
        now: u64,
    ) -> Result<Task, StoreError> {
        let conn = self.conn.lock();

        let changed = conn
            .execute(
                "UPDATE tasks SET status = 'RUNNING', worker_id = ?1, \
                 lease_until = ?2 + COALESCE(?3, timeout_seconds * 1000), \
                 last_executed_at = ?2, updated_at = ?2, version = version + 1 \
                 WHERE id = ?4 AND status = 'QUEUED'",
                params![worker_id, now as i64, lease_ms.map(|t| t as i64), id.0 as i64],
            )
            .map_err(store_err)?;

        if changed == 0 {
            return match Self::select_by_id(&conn, id)? {
                Some(_) => Err(StoreError::Conflict(id)),
                None => Err(StoreError::NotFound(id)),
            };
        }

        Self::select_by_id(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    async fn scan_ready(&self, limit: usize, now: u64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        Self::scan(
            &conn,
            "status IN ('PENDING', 'QUEUED') AND next_execution_time <= ?1",
            "priority DESC, created_at ASC, id ASC",
            Some(limit),
            now,
        )
    }

    async fn scan_scheduled(&self, now: u64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        Self::scan(
            &conn,
            "status = 'SCHEDULED' AND (scheduled_time IS NULL OR scheduled_time <= ?1)",
            "priority DESC, created_at ASC, id ASC",
            None,
            now,
        )
    }

    async fn scan_retrying(&self, now: u64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        Self::scan(
            &conn,
            "status = 'RETRYING' AND next_execution_time <= ?1",
            "priority DESC, created_at ASC, id ASC",
            None,
            now,
        )
    }

    async fn scan_stuck(&self, cutoff: u64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        Self::scan(
            &conn,
            "status = 'RUNNING' AND (lease_until IS NULL OR lease_until <= ?1)",
            "last_executed_at ASC, id ASC",
            None,
            cutoff,
        )
    }

    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage, StoreError> {
        let conn = self.conn.lock();

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            args.push(Box::new(status.as_str()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        if let Some(priority) = filter.priority {
            args.push(Box::new(priority.weight() as i64));
            clauses.push(format!("priority = ?{}", args.len()));
        }
        if let Some(ref task_type) = filter.task_type {
            args.push(Box::new(task_type.clone()));
            clauses.push(format!("task_type = ?{}", args.len()));
        }

        let where_sql = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM tasks WHERE {where_sql}"),
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| row.get(0),
            )
            .map_err(store_err)?;

        let sql = format!(
            "SELECT {COLUMNS} FROM tasks WHERE {where_sql} ORDER BY {} LIMIT {} OFFSET {}",
            order_sql(page.sort),
            page.size,
            page.offset()
        );
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                map_task,
            )
            .map_err(store_err)?;
        let tasks = rows.collect::<Result<Vec<_>, _>>().map_err(store_err)?;

        Ok(TaskPage {
            tasks,
            total: total as u64,
        })
    }

    async fn scheduled_before(
        &self,
        before: u64,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError> {
        let conn = self.conn.lock();

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE status IN ('SCHEDULED', 'PENDING') \
                 AND next_execution_time <= ?1",
                params![before as i64],
                |row| row.get(0),
            )
            .map_err(store_err)?;

        let sql = format!(
            "SELECT {COLUMNS} FROM tasks WHERE status IN ('SCHEDULED', 'PENDING') \
             AND next_execution_time <= ?1 \
             ORDER BY priority DESC, next_execution_time ASC, id ASC LIMIT {} OFFSET {}",
            page.size,
            page.offset()
        );
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params![before as i64], map_task)
            .map_err(store_err)?;
        let tasks = rows.collect::<Result<Vec<_>, _>>().map_err(store_err)?;

        Ok(TaskPage {
            tasks,
            total: total as u64,
        })
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(store_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status_text, count) = row.map_err(store_err)?;
            if let Some(status) = TaskStatus::parse(&status_text) {
                counts.record(status, count as u64);
            }
        }
        Ok(counts)
    }

    async fn execution_metrics(&self, from: u64) -> Result<Option<ExecutionMetrics>, StoreError> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT AVG(execution_duration_ms), MIN(execution_duration_ms), \
                 MAX(execution_duration_ms), COUNT(*) FROM tasks \
                 WHERE status = 'COMPLETED' AND execution_duration_ms IS NOT NULL \
                 AND last_executed_at >= ?1",
                params![from as i64],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .map_err(store_err)?;

        match row {
            (Some(avg), Some(min), Some(max), count) if count > 0 => Ok(Some(ExecutionMetrics {
                average_ms: avg,
                min_ms: min as u64,
                max_ms: max as u64,
                completed: count as u64,
            })),
            _ => Ok(None),
        }
    }

    async fn delete_completed_before(&self, cutoff: u64) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM tasks WHERE status = 'COMPLETED' AND updated_at < ?1",
                params![cutoff as i64],
            )
            .map_err(store_err)?;
        Ok(deleted as u64)
    }
}
