// ==========================================
// 教学班分配引擎 - 选课记录数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: (student_id, course_id, school_year_id) 唯一
// 约束: 挂班/迁班均带条件更新,0 行即视为并发冲突
// ==========================================

use crate::domain::section::Enrollment;
use crate::repository::error::RepositoryResult;
use crate::repository::{in_placeholders, in_placeholders_from, parse_db_datetime, transaction::lock_conn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

const ENROLLMENT_COLUMNS: &str =
    "enrollment_id, student_id, course_id, section_id, school_year_id, enrolled_at";

// ==========================================
// EnrollmentRepository - 选课记录仓储
// ==========================================
pub struct EnrollmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EnrollmentRepository {
    /// 创建新的选课记录仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
        Ok(Enrollment {
            enrollment_id: row.get(0)?,
            student_id: row.get(1)?,
            course_id: row.get(2)?,
            section_id: row.get(3)?,
            school_year_id: row.get(4)?,
            enrolled_at: parse_db_datetime(&row.get::<_, String>(5)?),
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按唯一键查询
    pub fn find(
        &self,
        student_id: i64,
        course_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Option<Enrollment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM enrollment WHERE student_id = ?1 AND course_id = ?2 AND school_year_id = ?3",
            ENROLLMENT_COLUMNS
        );
        let found = conn
            .query_row(&sql, params![student_id, course_id, school_year_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    /// 事务内按唯一键查询
    pub fn find_tx(
        tx: &Transaction<'_>,
        student_id: i64,
        course_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Option<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollment WHERE student_id = ?1 AND course_id = ?2 AND school_year_id = ?3",
            ENROLLMENT_COLUMNS
        );
        let found = tx
            .query_row(&sql, params![student_id, course_id, school_year_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    /// 查询课程在某学年的全部选课记录（按学生ID）
    pub fn list_by_course_year(
        &self,
        course_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Vec<Enrollment>> {
        let conn = self.get_conn()?;
        Self::query_by_course_year(&conn, course_id, school_year_id)
    }

    /// 事务内查询课程在某学年的全部选课记录
    pub fn list_by_course_year_tx(
        tx: &Transaction<'_>,
        course_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Vec<Enrollment>> {
        Self::query_by_course_year(tx, course_id, school_year_id)
    }

    fn query_by_course_year(
        conn: &Connection,
        course_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Vec<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollment WHERE course_id = ?1 AND school_year_id = ?2 ORDER BY student_id",
            ENROLLMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(params![course_id, school_year_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    /// 事务内查询某教学班在某学年的选课记录（新 → 旧）
    pub fn list_by_section_year_newest_first_tx(
        tx: &Transaction<'_>,
        section_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<Vec<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollment WHERE section_id = ?1 AND school_year_id = ?2 ORDER BY enrollment_id DESC",
            ENROLLMENT_COLUMNS
        );
        let mut stmt = tx.prepare(&sql)?;
        let list = stmt
            .query_map(params![section_id, school_year_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    /// 查询某学年有选课记录的课程（按课程ID）
    pub fn list_course_ids_with_enrollments(&self, school_year_id: i64) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT course_id FROM enrollment WHERE school_year_id = ?1 ORDER BY course_id",
        )?;
        let ids = stmt
            .query_map(params![school_year_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// 查询未分班的选课记录（异常清单）
    pub fn list_unsectioned(&self, school_year_id: i64) -> RepositoryResult<Vec<Enrollment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM enrollment WHERE school_year_id = ?1 AND section_id IS NULL ORDER BY course_id, student_id",
            ENROLLMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(params![school_year_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    /// 统计引用某教学班的选课记录数
    pub fn count_by_section(&self, section_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM enrollment WHERE section_id = ?1",
            params![section_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// 统计选课记录总数
    pub fn count_all(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row("SELECT COUNT(*) FROM enrollment", [], |row| row.get(0))?;
        Ok(n)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 事务内插入选课记录（冲突时不插入）
    ///
    /// # 返回
    /// - Ok(Some(enrollment_id)): 插入成功
    /// - Ok(None): 唯一键已存在（并发写入）
    pub fn insert_tx(
        tx: &Transaction<'_>,
        student_id: i64,
        course_id: i64,
        section_id: Option<i64>,
        school_year_id: i64,
    ) -> RepositoryResult<Option<i64>> {
        let rows = tx.execute(
            r#"
            INSERT INTO enrollment (student_id, course_id, section_id, school_year_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (student_id, course_id, school_year_id) DO NOTHING
            "#,
            params![student_id, course_id, section_id, school_year_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(tx.last_insert_rowid()))
    }

    /// 事务内为未分班记录挂班
    ///
    /// # 返回
    /// - Ok(true): 挂班成功
    /// - Ok(false): 记录已被其他写入者挂班
    pub fn attach_section_tx(
        tx: &Transaction<'_>,
        enrollment_id: i64,
        section_id: i64,
    ) -> RepositoryResult<bool> {
        let rows = tx.execute(
            "UPDATE enrollment SET section_id = ?2 WHERE enrollment_id = ?1 AND section_id IS NULL",
            params![enrollment_id, section_id],
        )?;
        Ok(rows == 1)
    }

    /// 事务内把记录从一个教学班迁到另一个教学班
    pub fn move_section_tx(
        tx: &Transaction<'_>,
        enrollment_id: i64,
        from_section_id: i64,
        to_section_id: i64,
    ) -> RepositoryResult<bool> {
        let rows = tx.execute(
            "UPDATE enrollment SET section_id = ?3 WHERE enrollment_id = ?1 AND section_id = ?2",
            params![enrollment_id, from_section_id, to_section_id],
        )?;
        Ok(rows == 1)
    }

    /// 事务内把引用 from 教学班的记录全部改指向保留教学班
    pub fn reassign_sections_tx(
        tx: &Transaction<'_>,
        from_section_ids: &[i64],
        to_section_id: i64,
    ) -> RepositoryResult<usize> {
        if from_section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE enrollment SET section_id = ?1 WHERE section_id IN ({})",
            in_placeholders_from(2, from_section_ids.len())
        );
        let mut values: Vec<i64> = Vec::with_capacity(from_section_ids.len() + 1);
        values.push(to_section_id);
        values.extend_from_slice(from_section_ids);
        let rows = tx.execute(&sql, params_from_iter(values.iter()))?;
        Ok(rows)
    }

    /// 事务内把引用这些教学班的记录置为未分班
    pub fn detach_sections_tx(tx: &Transaction<'_>, section_ids: &[i64]) -> RepositoryResult<usize> {
        if section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE enrollment SET section_id = NULL WHERE section_id IN ({})",
            in_placeholders(section_ids.len())
        );
        let rows = tx.execute(&sql, params_from_iter(section_ids.iter()))?;
        Ok(rows)
    }

    /// 事务内删除引用这些教学班的记录
    pub fn delete_by_sections_tx(tx: &Transaction<'_>, section_ids: &[i64]) -> RepositoryResult<usize> {
        if section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM enrollment WHERE section_id IN ({})",
            in_placeholders(section_ids.len())
        );
        let rows = tx.execute(&sql, params_from_iter(section_ids.iter()))?;
        Ok(rows)
    }
}
