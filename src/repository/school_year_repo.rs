// ==========================================
// 教学班分配引擎 - 学年数据仓储
// ==========================================
// 红线: 同一时刻只有一个 active 学年（由部分唯一索引保证）
// ==========================================

use crate::domain::catalog::SchoolYear;
use crate::domain::types::Semester;
use crate::repository::error::RepositoryResult;
use crate::repository::transaction::lock_conn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// SchoolYearRepository - 学年仓储
// ==========================================
pub struct SchoolYearRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SchoolYearRepository {
    /// 创建新的学年仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<SchoolYear> {
        let semester: Option<String> = row.get(3)?;
        Ok(SchoolYear {
            school_year_id: row.get(0)?,
            label: row.get(1)?,
            is_active: row.get::<_, i64>(2)? == 1,
            semester: semester.as_deref().and_then(Semester::from_db_str),
        })
    }

    /// 查询当前 active 学年
    pub fn find_active(&self) -> RepositoryResult<Option<SchoolYear>> {
        let conn = self.get_conn()?;
        let year = conn
            .query_row(
                "SELECT school_year_id, label, is_active, semester FROM school_year WHERE is_active = 1 LIMIT 1",
                [],
                Self::map_row,
            )
            .optional()?;
        Ok(year)
    }

    /// 按ID查询学年
    pub fn find_by_id(&self, school_year_id: i64) -> RepositoryResult<Option<SchoolYear>> {
        let conn = self.get_conn()?;
        let year = conn
            .query_row(
                "SELECT school_year_id, label, is_active, semester FROM school_year WHERE school_year_id = ?1",
                params![school_year_id],
                Self::map_row,
            )
            .optional()?;
        Ok(year)
    }

    /// 新增学年（非 active）
    pub fn insert(&self, label: &str, semester: Option<Semester>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO school_year (label, is_active, semester) VALUES (?1, 0, ?2)",
            params![label, semester.map(|s| s.to_db_str())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 切换 active 学年（同一事务内先清后设）
    pub fn activate(&self, school_year_id: i64) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE school_year SET is_active = 0 WHERE is_active = 1", [])?;
        tx.execute(
            "UPDATE school_year SET is_active = 1 WHERE school_year_id = ?1",
            params![school_year_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// 设置学年的当前学期
    pub fn set_semester(&self, school_year_id: i64, semester: Option<Semester>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE school_year SET semester = ?2 WHERE school_year_id = ?1",
            params![school_year_id, semester.map(|s| s.to_db_str())],
        )?;
        Ok(rows)
    }
}
