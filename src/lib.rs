// ==========================================
// 教学班分配引擎 - 核心库
// ==========================================
// 职责: 按需求开设教学班,把学生放入有空位的教学班,修复容量与重复问题
// 技术栈: Rust + SQLite
// 系统定位: 单写者批处理引擎（按学年加咨询锁）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分配规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/迁移）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ResetEnrollmentPolicy, SectionStatus, Semester, StudentStatus};

// 领域实体
pub use domain::{
    AllocationCounters, Bucket, Course, Enrollment, Program, SchoolYear, Section, Student,
};

// 引擎
pub use engine::{
    AllocationError, BulkOrchestrator, CancelToken, DemandEstimator, RepairOperations,
    SectionProvisioner,
};

// API
pub use api::{AllocationApi, ApiError, ApiResult};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "教学班分配引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
