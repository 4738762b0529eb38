// ==========================================
// 教学班分配引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、容量判定接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod allocation;
pub mod catalog;
pub mod section;
pub mod types;

// 重导出核心类型
pub use allocation::{
    AllocationCounters, AllocationRun, DedupeSummary, ProvisionSummary, RebalanceSummary,
    ResetFilter, ResetSummary, RunCursor, RunKind, RunStatus, RunSummary,
};
pub use catalog::{Bucket, Course, InstructorAssignment, Program, SchoolYear, Student};
pub use section::{normalize_section_code, Enrollment, NewSection, SeatCapacity, Section};
pub use types::{ResetEnrollmentPolicy, SectionStatus, Semester, StudentStatus};
