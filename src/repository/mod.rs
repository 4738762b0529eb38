// ==========================================
// 教学班分配引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod allocation_lock_repo;
pub mod allocation_run_repo;
pub mod catalog_repo;
pub mod enrollment_repo;
pub mod error;
pub mod school_year_repo;
pub mod section_repo;
pub mod student_repo;
pub mod transaction;

// 重导出核心仓储
pub use allocation_lock_repo::{AllocationLockRepository, LockRecord};
pub use allocation_run_repo::AllocationRunRepository;
pub use catalog_repo::{CourseRepository, ProgramRepository};
pub use enrollment_repo::EnrollmentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use school_year_repo::SchoolYearRepository;
pub use section_repo::{DuplicateSectionGroup, SectionRepository};
pub use student_repo::{NewStudent, StudentRepository};
pub use transaction::{lock_conn, run_in_transaction};

use chrono::NaiveDateTime;

/// 解析 SQLite datetime('now') 格式的时间（无法解析时回退到 1970-01-01）
pub(crate) fn parse_db_datetime(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_default()
}

/// 生成 `?1, ?2, ..., ?n`
pub(crate) fn in_placeholders(n: usize) -> String {
    in_placeholders_from(1, n)
}

/// 从第 start 个参数开始生成 `?start, ?start+1, ...`
pub(crate) fn in_placeholders_from(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
