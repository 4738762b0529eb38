// ==========================================
// 教学班分配引擎 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供维护工具与批量导入协作方调用
// ==========================================

pub mod allocation_api;
pub mod error;

// 重导出核心类型
pub use allocation_api::AllocationApi;
pub use error::{ApiError, ApiResult};
