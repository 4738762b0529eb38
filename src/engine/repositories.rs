// ==========================================
// 教学班分配引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合分配引擎所需的所有 Repository
// 约束: 所有仓储共享同一个连接（事务只能在该连接上开启）
// ==========================================

use crate::repository::{
    AllocationLockRepository, AllocationRunRepository, CourseRepository, EnrollmentRepository,
    ProgramRepository, SchoolYearRepository, SectionRepository, StudentRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// 分配引擎仓储集合
///
/// # 包含的仓储
/// - 目录/名册/学年: `program_repo`, `course_repo`, `student_repo`, `school_year_repo`
/// - 教学班与选课: `section_repo`, `enrollment_repo`
/// - 运行控制: `run_repo`, `lock_repo`
#[derive(Clone)]
pub struct AllocationRepositories {
    /// 共享连接（run_in_transaction 使用）
    pub conn: Arc<Mutex<Connection>>,
    pub program_repo: Arc<ProgramRepository>,
    pub course_repo: Arc<CourseRepository>,
    pub student_repo: Arc<StudentRepository>,
    pub school_year_repo: Arc<SchoolYearRepository>,
    pub section_repo: Arc<SectionRepository>,
    pub enrollment_repo: Arc<EnrollmentRepository>,
    pub run_repo: Arc<AllocationRunRepository>,
    pub lock_repo: Arc<AllocationLockRepository>,
}

impl AllocationRepositories {
    /// 基于共享连接创建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            program_repo: Arc::new(ProgramRepository::new(conn.clone())),
            course_repo: Arc::new(CourseRepository::new(conn.clone())),
            student_repo: Arc::new(StudentRepository::new(conn.clone())),
            school_year_repo: Arc::new(SchoolYearRepository::new(conn.clone())),
            section_repo: Arc::new(SectionRepository::new(conn.clone())),
            enrollment_repo: Arc::new(EnrollmentRepository::new(conn.clone())),
            run_repo: Arc::new(AllocationRunRepository::new(conn.clone())),
            lock_repo: Arc::new(AllocationLockRepository::new(conn.clone())),
            conn,
        }
    }
}
