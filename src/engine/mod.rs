// ==========================================
// 教学班分配引擎 - 引擎层
// ==========================================
// 职责: 编码生成 / 需求估算 / 开班 / 放置 / 批量编排 / 一致性修复
// 红线: Engine 不拼 SQL,数据访问全部经由 repository
// ==========================================

pub mod demand;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod placement;
pub mod placement_writer;
pub mod provisioner;
pub mod repair;
pub mod repositories;
pub mod run_guard;
pub mod section_code;

// 重导出核心引擎
pub use demand::{DemandEstimator, SectionFloor};
pub use error::{AllocationError, AllocationResult};
pub use events::{
    AllocationEvent, AllocationEventPublisher, AllocationEventType, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use orchestrator::BulkOrchestrator;
pub use placement::{OccupancySnapshot, SeatSlot};
pub use placement_writer::{PlacementOutcome, PlacementWriter};
pub use provisioner::{ProvisionOutcome, SectionProvisioner};
pub use repair::RepairOperations;
pub use repositories::AllocationRepositories;
pub use run_guard::{CancelToken, RunGuard};
