// ==========================================
// 教学班分配引擎 - 专业与课程目录仓储
// ==========================================
// 职责: 课程目录提供者（按分配桶列出课程）
// 约束: 课程按 code, course_id 排序,保证批量运行顺序稳定
// ==========================================

use crate::domain::catalog::{Bucket, Course, Program};
use crate::domain::types::Semester;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::transaction::lock_conn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ProgramRepository - 专业仓储
// ==========================================
pub struct ProgramRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProgramRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    /// 新增专业
    pub fn insert(&self, code: &str, name: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO program (code, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 查询全部专业（按ID）
    pub fn list_all(&self) -> RepositoryResult<Vec<Program>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT program_id, code, name FROM program ORDER BY program_id")?;
        let list = stmt
            .query_map([], |row| {
                Ok(Program {
                    program_id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }
}

// ==========================================
// CourseRepository - 课程仓储
// ==========================================
pub struct CourseRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CourseRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(Course, String)> {
        let semester_raw: String = row.get(5)?;
        let course = Course {
            course_id: row.get(0)?,
            program_id: row.get(1)?,
            code: row.get(2)?,
            title: row.get(3)?,
            year_level: row.get(4)?,
            semester: Semester::from_db_str(&semester_raw).unwrap_or(Semester::First),
        };
        Ok((course, semester_raw))
    }

    fn check_semester((course, raw): (Course, String)) -> RepositoryResult<Course> {
        if Semester::from_db_str(&raw).is_none() {
            return Err(RepositoryError::FieldValueError {
                field: "course.semester".to_string(),
                message: format!("course_id={} 学期值无效: {}", course.course_id, raw),
            });
        }
        Ok(course)
    }

    /// 新增课程
    pub fn insert(
        &self,
        program_id: i64,
        code: &str,
        title: &str,
        year_level: i32,
        semester: Semester,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO course (program_id, code, title, year_level, semester)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![program_id, code, title, year_level, semester.to_db_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按ID查询课程
    pub fn find_by_id(&self, course_id: i64) -> RepositoryResult<Option<Course>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT course_id, program_id, code, title, year_level, semester
                FROM course WHERE course_id = ?1
                "#,
                params![course_id],
                Self::map_row,
            )
            .optional()?;
        row.map(Self::check_semester).transpose()
    }

    /// 查询分配桶下的全部课程（按 code, course_id）
    pub fn list_for_bucket(&self, bucket: &Bucket) -> RepositoryResult<Vec<Course>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT course_id, program_id, code, title, year_level, semester
            FROM course
            WHERE program_id = ?1 AND year_level = ?2 AND semester = ?3
            ORDER BY code, course_id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![bucket.program_id, bucket.year_level, bucket.semester.to_db_str()],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::check_semester).collect()
    }
}
