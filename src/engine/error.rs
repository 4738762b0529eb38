// ==========================================
// 教学班分配引擎 - 引擎层错误类型
// ==========================================
// 约束: 输入错误在任何写入之前返回
// 约束: 单元内的唯一约束冲突在单元内消化（计入 conflicts）,不经由此类型传播
// ==========================================

use crate::domain::allocation::RunStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum AllocationError {
    // ===== 输入错误（不产生任何写入） =====
    #[error("输入参数无效: {0}")]
    InvalidInput(String),

    #[error("未找到 active 学年")]
    NoActiveSchoolYear,

    #[error("学年未配置当前学期: school_year_id={0}")]
    SemesterNotConfigured(i64),

    #[error("{entity}不存在: id={id}")]
    NotFound { entity: &'static str, id: i64 },

    // ===== 运行控制 =====
    #[error("分配锁已被占用: lock_key={lock_key}")]
    LockHeld { lock_key: String },

    #[error("运行记录不存在: run_id={0}")]
    RunNotFound(String),

    #[error("运行不可续跑: run_id={run_id}, status={status}")]
    RunNotResumable { run_id: String, status: RunStatus },

    // ===== 数据访问 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    Config(String),
}

impl AllocationError {
    /// 是否为唯一约束冲突
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, AllocationError::Repository(e) if e.is_unique_violation())
    }
}

/// Result 类型别名
pub type AllocationResult<T> = Result<T, AllocationError>;
