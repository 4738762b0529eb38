// ==========================================
// 教学班分配引擎 - 分配运行记录仓储
// ==========================================
// 职责: 记录批量运行的范围、游标与计数,支持中断后续跑
// 约束: 进度与对应批次在同一事务提交（save_progress_tx）
// ==========================================

use crate::domain::allocation::{AllocationCounters, AllocationRun, RunCursor, RunKind, RunStatus};
use crate::domain::catalog::Bucket;
use crate::repository::error::RepositoryResult;
use crate::repository::transaction::lock_conn;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// scope_json 的存储结构
#[derive(Debug, Serialize, Deserialize)]
struct RunScopeRecord {
    buckets: Vec<Bucket>,
    #[serde(default)]
    student_id: Option<i64>,
}

const RUN_COLUMNS: &str = "run_id, school_year_id, run_kind, scope_json, status, cursor_json, counters_json, started_at, finished_at, error_message";

// ==========================================
// AllocationRunRepository - 运行记录仓储
// ==========================================
pub struct AllocationRunRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AllocationRunRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(AllocationRun, String, Option<String>, String)> {
        let run = AllocationRun {
            run_id: row.get(0)?,
            school_year_id: row.get(1)?,
            run_kind: RunKind::from_str(&row.get::<_, String>(2)?),
            buckets: Vec::new(),
            student_id: None,
            status: RunStatus::from_str(&row.get::<_, String>(4)?),
            cursor: None,
            counters: AllocationCounters::default(),
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
            error_message: row.get(9)?,
        };
        Ok((run, row.get(3)?, row.get(5)?, row.get(6)?))
    }

    fn decode(
        (mut run, scope_json, cursor_json, counters_json): (AllocationRun, String, Option<String>, String),
    ) -> RepositoryResult<AllocationRun> {
        let scope: RunScopeRecord = serde_json::from_str(&scope_json)?;
        run.buckets = scope.buckets;
        run.student_id = scope.student_id;
        run.cursor = cursor_json
            .as_deref()
            .map(serde_json::from_str::<RunCursor>)
            .transpose()?;
        run.counters = serde_json::from_str(&counters_json)?;
        Ok(run)
    }

    /// 新增运行记录
    pub fn insert(&self, run: &AllocationRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let scope_json = serde_json::to_string(&RunScopeRecord {
            buckets: run.buckets.clone(),
            student_id: run.student_id,
        })?;
        let cursor_json = run.cursor.as_ref().map(serde_json::to_string).transpose()?;
        let counters_json = serde_json::to_string(&run.counters)?;

        conn.execute(
            r#"
            INSERT INTO allocation_run (
                run_id, school_year_id, run_kind, scope_json, status,
                cursor_json, counters_json, started_at, finished_at, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                run.run_id,
                run.school_year_id,
                run.run_kind.to_db_str(),
                scope_json,
                run.status.to_db_str(),
                cursor_json,
                counters_json,
                run.started_at,
                run.finished_at,
                run.error_message,
            ],
        )?;
        Ok(())
    }

    /// 按ID查询运行记录
    pub fn find_by_id(&self, run_id: &str) -> RepositoryResult<Option<AllocationRun>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM allocation_run WHERE run_id = ?1", RUN_COLUMNS);
        let raw = conn.query_row(&sql, params![run_id], Self::map_row).optional()?;
        raw.map(Self::decode).transpose()
    }

    /// 查询学年的运行记录（新 → 旧）
    pub fn list_by_school_year(&self, school_year_id: i64) -> RepositoryResult<Vec<AllocationRun>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM allocation_run WHERE school_year_id = ?1 ORDER BY started_at DESC, rowid DESC",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![school_year_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(Self::decode).collect()
    }

    /// 事务内保存进度（与该批次写入一起提交）
    pub fn save_progress_tx(
        tx: &Transaction<'_>,
        run_id: &str,
        cursor: &RunCursor,
        counters: &AllocationCounters,
    ) -> RepositoryResult<usize> {
        let rows = tx.execute(
            "UPDATE allocation_run SET cursor_json = ?2, counters_json = ?3 WHERE run_id = ?1",
            params![
                run_id,
                serde_json::to_string(cursor)?,
                serde_json::to_string(counters)?,
            ],
        )?;
        Ok(rows)
    }

    /// 更新运行状态
    ///
    /// # 参数
    /// - finished_at: 结束时间；RUNNING 时传 None
    pub fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        counters: &AllocationCounters,
        finished_at: Option<&str>,
        error_message: Option<&str>,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE allocation_run
            SET status = ?2, counters_json = ?3, finished_at = ?4, error_message = ?5
            WHERE run_id = ?1
            "#,
            params![
                run_id,
                status.to_db_str(),
                serde_json::to_string(counters)?,
                finished_at,
                error_message,
            ],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Semester;
    use crate::repository::transaction::run_in_transaction;
    use crate::repository::RepositoryError;

    fn setup() -> (Arc<Mutex<Connection>>, AllocationRunRepository) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::run_migrations(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (conn.clone(), AllocationRunRepository::new(conn))
    }

    fn make_run(run_id: &str) -> AllocationRun {
        AllocationRun {
            run_id: run_id.to_string(),
            school_year_id: 1,
            run_kind: RunKind::ActiveYear,
            buckets: vec![Bucket {
                program_id: 1,
                year_level: 2,
                semester: Semester::Second,
            }],
            student_id: None,
            status: RunStatus::Running,
            cursor: None,
            counters: AllocationCounters::default(),
            started_at: "2026-08-01T08:00:00Z".to_string(),
            finished_at: None,
            error_message: None,
        }
    }

    #[test]
    fn test_insert_and_find_round_trip_scope() {
        let (_conn, repo) = setup();
        repo.insert(&make_run("run-1")).unwrap();

        let found = repo.find_by_id("run-1").unwrap().unwrap();
        assert_eq!(found.buckets.len(), 1);
        assert_eq!(found.buckets[0].semester, Semester::Second);
        assert_eq!(found.status, RunStatus::Running);
        assert!(found.cursor.is_none());
    }

    #[test]
    fn test_progress_and_status_updates() {
        let (conn, repo) = setup();
        repo.insert(&make_run("run-2")).unwrap();

        let cursor = RunCursor {
            bucket_index: 0,
            course_id: Some(11),
            last_student_id: Some(42),
        };
        let counters = AllocationCounters {
            inserted: 5,
            ..Default::default()
        };
        let saved: Result<usize, RepositoryError> = run_in_transaction(&conn, |tx| {
            AllocationRunRepository::save_progress_tx(tx, "run-2", &cursor, &counters)
        });
        assert_eq!(saved.unwrap(), 1);

        repo.update_status("run-2", RunStatus::Cancelled, &counters, Some("2026-08-01T09:00:00Z"), None)
            .unwrap();

        let found = repo.find_by_id("run-2").unwrap().unwrap();
        assert_eq!(found.cursor, Some(cursor));
        assert_eq!(found.counters.inserted, 5);
        assert_eq!(found.status, RunStatus::Cancelled);
        assert_eq!(repo.list_by_school_year(1).unwrap().len(), 1);
    }
}
