// ==========================================
// 教学班分配引擎 - 学生名册仓储
// ==========================================
// 职责: 名册提供者（按 专业+年级 列出在读学生）
// 约束: 学生按 student_id 排序,保证重复运行结果一致
// ==========================================

use crate::domain::catalog::Student;
use crate::domain::types::StudentStatus;
use crate::repository::error::RepositoryResult;
use crate::repository::transaction::lock_conn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const STUDENT_COLUMNS: &str = "student_id, program_id, year_level, status, first_name, last_name, email";

/// 新建学生所需字段（来自批量导入协作方,已校验非空）
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub program_id: i64,
    pub year_level: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

// ==========================================
// StudentRepository - 学生仓储
// ==========================================
pub struct StudentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StudentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Student> {
        Ok(Student {
            student_id: row.get(0)?,
            program_id: row.get(1)?,
            year_level: row.get(2)?,
            status: StudentStatus::from_str(&row.get::<_, String>(3)?),
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            email: row.get(6)?,
        })
    }

    /// 新增学生（ACTIVE）
    pub fn insert(&self, student: &NewStudent) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO student (program_id, year_level, status, first_name, last_name, email)
            VALUES (?1, ?2, 'ACTIVE', ?3, ?4, ?5)
            "#,
            params![
                student.program_id,
                student.year_level,
                student.first_name,
                student.last_name,
                student.email,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 修改学生状态
    pub fn set_status(&self, student_id: i64, status: StudentStatus) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE student SET status = ?2 WHERE student_id = ?1",
            params![student_id, status.to_db_str()],
        )?;
        Ok(rows)
    }

    /// 按ID查询学生
    pub fn find_by_id(&self, student_id: i64) -> RepositoryResult<Option<Student>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM student WHERE student_id = ?1", STUDENT_COLUMNS);
        let student = conn
            .query_row(&sql, params![student_id], Self::map_row)
            .optional()?;
        Ok(student)
    }

    /// 查询 专业+年级 的在读学生（按ID升序）
    ///
    /// # 参数
    /// - after_student_id: 续跑游标,只返回ID更大的学生
    pub fn list_active_for(
        &self,
        program_id: i64,
        year_level: i32,
        after_student_id: Option<i64>,
    ) -> RepositoryResult<Vec<Student>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM student
            WHERE program_id = ?1 AND year_level = ?2 AND status = 'ACTIVE' AND student_id > ?3
            ORDER BY student_id
            "#,
            STUDENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(
                params![program_id, year_level, after_student_id.unwrap_or(0)],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    /// 统计 专业+年级 的在读学生数（需求）
    pub fn count_active_for(&self, program_id: i64, year_level: i32) -> RepositoryResult<u32> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM student WHERE program_id = ?1 AND year_level = ?2 AND status = 'ACTIVE'",
            params![program_id, year_level],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }
}
