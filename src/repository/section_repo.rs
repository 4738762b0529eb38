// ==========================================
// 教学班分配引擎 - 教学班数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: 引擎事务内只调用 *_tx 关联函数
// ==========================================


use crate::domain::allocation::ResetFilter;
use crate::domain::catalog::InstructorAssignment;
use crate::domain::section::{normalize_section_code, NewSection, Section};
use crate::domain::types::SectionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{in_placeholders, in_placeholders_from, parse_db_datetime, transaction::lock_conn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const SECTION_COLUMNS: &str =
    "section_id, course_id, code, normalized_code, capacity, enrolled_count, status, created_at";

/// 按重新计算的规范编码分组后的重复教学班
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSectionGroup {
    pub course_id: i64,
    pub normalized_code: String,
    pub section_ids: Vec<i64>, // 升序,第一个为保留行
}

// ==========================================
// SectionRepository - 教学班仓储
// ==========================================
pub struct SectionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SectionRepository {
    /// 创建新的教学班仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Section> {
        Ok(Section {
            section_id: row.get(0)?,
            course_id: row.get(1)?,
            code: row.get(2)?,
            normalized_code: row.get(3)?,
            capacity: row.get(4)?,
            enrolled_count: row.get(5)?,
            status: SectionStatus::from_str(&row.get::<_, String>(6)?),
            created_at: parse_db_datetime(&row.get::<_, String>(7)?),
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按 section_id 查询
    pub fn find_by_id(&self, section_id: i64) -> RepositoryResult<Option<Section>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM section WHERE section_id = ?1", SECTION_COLUMNS);
        let section = conn
            .query_row(&sql, params![section_id], Self::map_row)
            .optional()?;
        Ok(section)
    }

    /// 查询课程下全部教学班（含停用）
    pub fn list_by_course(&self, course_id: i64) -> RepositoryResult<Vec<Section>> {
        let conn = self.get_conn()?;
        Self::query_by_course(&conn, course_id)
    }

    /// 事务内查询课程下全部教学班（含停用）
    pub fn list_by_course_tx(tx: &Transaction<'_>, course_id: i64) -> RepositoryResult<Vec<Section>> {
        Self::query_by_course(tx, course_id)
    }

    fn query_by_course(conn: &Connection, course_id: i64) -> RepositoryResult<Vec<Section>> {
        let sql = format!(
            "SELECT {} FROM section WHERE course_id = ?1 ORDER BY section_id",
            SECTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sections = stmt
            .query_map(params![course_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<Section>>>()?;
        Ok(sections)
    }

    /// 统计教学班总数（含停用）
    pub fn count_all(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row("SELECT COUNT(*) FROM section", [], |row| row.get(0))?;
        Ok(n)
    }

    /// 按重新计算的规范编码 UPPER(TRIM(code)) 查找重复组
    ///
    /// 说明：
    /// - 不使用存储的 normalized_code：库外写入可能留下未规范化的值
    pub fn find_duplicate_groups(&self) -> RepositoryResult<Vec<DuplicateSectionGroup>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.course_id, UPPER(TRIM(s.code)) AS norm, s.section_id
            FROM section s
            WHERE (s.course_id, UPPER(TRIM(s.code))) IN (
                SELECT course_id, UPPER(TRIM(code))
                FROM section
                GROUP BY course_id, UPPER(TRIM(code))
                HAVING COUNT(*) > 1
            )
            ORDER BY s.course_id, norm, s.section_id
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: Vec<DuplicateSectionGroup> = Vec::new();
        for (course_id, normalized_code, section_id) in rows {
            match groups.last_mut() {
                Some(g) if g.course_id == course_id && g.normalized_code == normalized_code => {
                    g.section_ids.push(section_id);
                }
                _ => groups.push(DuplicateSectionGroup {
                    course_id,
                    normalized_code,
                    section_ids: vec![section_id],
                }),
            }
        }
        Ok(groups)
    }

    /// 事务内按重置范围查询教学班ID
    pub fn list_ids_by_filter_tx(
        tx: &Transaction<'_>,
        filter: &ResetFilter,
    ) -> RepositoryResult<Vec<i64>> {
        let mut sql = String::from(
            "SELECT s.section_id FROM section s JOIN course c ON c.course_id = s.course_id WHERE 1 = 1",
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(program_id) = filter.program_id {
            values.push(Box::new(program_id));
            sql.push_str(&format!(" AND c.program_id = ?{}", values.len()));
        }
        if let Some(year_level) = filter.year_level {
            values.push(Box::new(year_level));
            sql.push_str(&format!(" AND c.year_level = ?{}", values.len()));
        }
        if let Some(semester) = filter.semester {
            values.push(Box::new(semester.to_db_str()));
            sql.push_str(&format!(" AND c.semester = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY s.section_id");

        let mut stmt = tx.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// 事务内统计每个教学班的真实选课人数（来自 enrollment 表）
    pub fn real_occupancy_by_course_tx(
        tx: &Transaction<'_>,
        course_id: i64,
    ) -> RepositoryResult<HashMap<i64, i32>> {
        let mut stmt = tx.prepare(
            r#"
            SELECT s.section_id, COUNT(e.enrollment_id)
            FROM section s
            LEFT JOIN enrollment e ON e.section_id = s.section_id
            WHERE s.course_id = ?1
            GROUP BY s.section_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![course_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)))?
            .collect::<rusqlite::Result<HashMap<i64, i32>>>()?;
        Ok(rows)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 插入教学班（status=ACTIVE, enrolled_count=0）
    pub fn insert(&self, section: &NewSection) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_on(&conn, section)
    }

    /// 事务内插入教学班
    ///
    /// # 返回
    /// - Ok(section_id)
    /// - Err(UniqueConstraintViolation): (course_id, normalized_code) 已存在
    pub fn insert_tx(tx: &Transaction<'_>, section: &NewSection) -> RepositoryResult<i64> {
        Self::insert_on(tx, section)
    }

    fn insert_on(conn: &Connection, section: &NewSection) -> RepositoryResult<i64> {
        if section.capacity <= 0 {
            return Err(RepositoryError::FieldValueError {
                field: "capacity".to_string(),
                message: format!("必须为正数: {}", section.capacity),
            });
        }

        conn.execute(
            r#"
            INSERT INTO section (course_id, code, normalized_code, capacity, enrolled_count, status)
            VALUES (?1, ?2, ?3, ?4, 0, 'ACTIVE')
            "#,
            params![
                section.course_id,
                section.code,
                normalize_section_code(&section.code),
                section.capacity,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 修改教学班状态
    pub fn set_status(&self, section_id: i64, status: SectionStatus) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE section SET status = ?2 WHERE section_id = ?1",
            params![section_id, status.to_db_str()],
        )?;
        Ok(rows)
    }

    /// 事务内按增量调整缓存计数（相对更新,避免读-改-写竞争）
    pub fn apply_occupancy_delta_tx(
        tx: &Transaction<'_>,
        section_id: i64,
        delta: i32,
    ) -> RepositoryResult<usize> {
        let rows = tx.execute(
            "UPDATE section SET enrolled_count = MAX(enrolled_count + ?2, 0) WHERE section_id = ?1",
            params![section_id, delta],
        )?;
        Ok(rows)
    }

    /// 事务内按 enrollment 表重算单个教学班的缓存计数
    pub fn recount_tx(tx: &Transaction<'_>, section_id: i64) -> RepositoryResult<i32> {
        tx.execute(
            r#"
            UPDATE section
            SET enrolled_count = (SELECT COUNT(*) FROM enrollment e WHERE e.section_id = section.section_id)
            WHERE section_id = ?1
            "#,
            params![section_id],
        )?;
        let count = tx.query_row(
            "SELECT enrolled_count FROM section WHERE section_id = ?1",
            params![section_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 事务内重算全部漂移的缓存计数
    ///
    /// # 返回
    /// - Ok(rows): 被修正的教学班数量
    pub fn recount_all_tx(tx: &Transaction<'_>) -> RepositoryResult<usize> {
        let rows = tx.execute(
            r#"
            UPDATE section
            SET enrolled_count = (SELECT COUNT(*) FROM enrollment e WHERE e.section_id = section.section_id)
            WHERE enrolled_count != (SELECT COUNT(*) FROM enrollment e WHERE e.section_id = section.section_id)
            "#,
            [],
        )?;
        Ok(rows)
    }

    /// 事务内回写规范编码
    pub fn renormalize_tx(
        tx: &Transaction<'_>,
        section_id: i64,
        normalized_code: &str,
    ) -> RepositoryResult<usize> {
        let rows = tx.execute(
            "UPDATE section SET normalized_code = ?2 WHERE section_id = ?1",
            params![section_id, normalized_code],
        )?;
        Ok(rows)
    }

    /// 事务内按ID批量删除教学班
    pub fn delete_by_ids_tx(tx: &Transaction<'_>, section_ids: &[i64]) -> RepositoryResult<usize> {
        if section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM section WHERE section_id IN ({})",
            in_placeholders(section_ids.len())
        );
        let rows = tx.execute(&sql, params_from_iter(section_ids.iter()))?;
        Ok(rows)
    }

    // ==========================================
    // 任课记录
    // ==========================================

    /// 新增任课记录
    pub fn assign_instructor(
        &self,
        section_id: i64,
        instructor_ref: &str,
        school_year_id: Option<i64>,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO section_instructor (section_id, instructor_ref, school_year_id) VALUES (?1, ?2, ?3)",
            params![section_id, instructor_ref, school_year_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 查询教学班的任课记录
    pub fn list_instructors(&self, section_id: i64) -> RepositoryResult<Vec<InstructorAssignment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT assignment_id, section_id, instructor_ref, school_year_id
            FROM section_instructor
            WHERE section_id = ?1
            ORDER BY assignment_id
            "#,
        )?;
        let list = stmt
            .query_map(params![section_id], |row| {
                Ok(InstructorAssignment {
                    assignment_id: row.get(0)?,
                    section_id: row.get(1)?,
                    instructor_ref: row.get(2)?,
                    school_year_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    /// 事务内把任课记录迁移到保留教学班
    pub fn reassign_instructors_tx(
        tx: &Transaction<'_>,
        from_section_ids: &[i64],
        to_section_id: i64,
    ) -> RepositoryResult<usize> {
        if from_section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE section_instructor SET section_id = ?1 WHERE section_id IN ({})",
            in_placeholders_from(2, from_section_ids.len())
        );
        let mut values: Vec<i64> = Vec::with_capacity(from_section_ids.len() + 1);
        values.push(to_section_id);
        values.extend_from_slice(from_section_ids);
        let rows = tx.execute(&sql, params_from_iter(values.iter()))?;
        Ok(rows)
    }

    /// 事务内删除教学班的任课记录
    pub fn delete_instructors_tx(tx: &Transaction<'_>, section_ids: &[i64]) -> RepositoryResult<usize> {
        if section_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM section_instructor WHERE section_id IN ({})",
            in_placeholders(section_ids.len())
        );
        let rows = tx.execute(&sql, params_from_iter(section_ids.iter()))?;
        Ok(rows)
    }
}
