// ==========================================
// 教学班分配引擎 - 分配 API
// ==========================================
// 职责: 对外暴露开班/分配/修复操作,入口处读取配置快照
// 约束: 对外只返回聚合汇总；引擎为同步实现,async 仅因配置读取为 async
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{AllocationConfigReader, AllocationSettings};
use crate::domain::allocation::{
    AllocationRun, DedupeSummary, ProvisionSummary, RebalanceSummary, ResetFilter, ResetSummary,
    RunSummary,
};
use crate::domain::catalog::Bucket;
use crate::domain::section::Enrollment;
use crate::domain::types::{ResetEnrollmentPolicy, Semester};
use crate::engine::{
    AllocationRepositories, BulkOrchestrator, CancelToken, OptionalEventPublisher, RepairOperations,
};

// ==========================================
// AllocationApi - 分配 API
// ==========================================

/// 分配API
///
/// 职责：
/// 1. 显式开班、单桶分配、当前学年批量分配、续跑
/// 2. 新建学生的即时放置（供批量导入协作方逐个调用）
/// 3. 修复：超容重平衡、重复教学班合并、教学班重置、缓存计数重算
pub struct AllocationApi<C: AllocationConfigReader> {
    repos: AllocationRepositories,
    config: Arc<C>,
    cancel: CancelToken,
    events: OptionalEventPublisher,
}

impl<C: AllocationConfigReader> AllocationApi<C> {
    /// 创建新的AllocationApi实例
    ///
    /// # 参数
    /// - conn: 共享连接（已执行迁移）
    /// - config: 配置读取器
    pub fn new(conn: Arc<Mutex<Connection>>, config: Arc<C>) -> Self {
        Self {
            repos: AllocationRepositories::from_connection(conn),
            config,
            cancel: CancelToken::new(),
            events: OptionalEventPublisher::none(),
        }
    }

    /// 设置事件发布者（运行进度/修复完成）
    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    /// 取消信号（可在其他线程调用 cancel(),运行在下一个批次边界停止）
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    async fn settings(&self) -> ApiResult<AllocationSettings> {
        AllocationSettings::load(self.config.as_ref())
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))
    }

    fn orchestrator(&self, settings: AllocationSettings) -> BulkOrchestrator {
        BulkOrchestrator::new(self.repos.clone(), settings, self.cancel.clone())
            .with_events(self.events.clone())
    }

    fn repair(&self, settings: AllocationSettings) -> RepairOperations {
        RepairOperations::new(self.repos.clone(), settings).with_events(self.events.clone())
    }

    // ==========================================
    // 开班与分配
    // ==========================================

    /// 为课程补齐教学班
    ///
    /// # 参数
    /// - target_capacity: 每班目标容量（必须为正数）
    ///
    /// # 返回
    /// - Ok(ProvisionSummary): created 为本次新建数量
    pub async fn provision_sections(
        &self,
        course_id: i64,
        target_capacity: i32,
    ) -> ApiResult<ProvisionSummary> {
        let settings = self.settings().await?;
        Ok(self.orchestrator(settings).provision_course(course_id, target_capacity)?)
    }

    /// 分配单个桶
    ///
    /// # 参数
    /// - program_id / year_level: 必须为正数
    /// - semester: 1 / 2 / 3(SUMMER)
    pub async fn allocate_bucket(
        &self,
        program_id: i64,
        year_level: i32,
        semester: i32,
    ) -> ApiResult<RunSummary> {
        let semester = Semester::from_selector(semester)
            .ok_or_else(|| ApiError::InvalidInput(format!("缺少学期选择器: semester={}", semester)))?;
        let settings = self.settings().await?;
        let bucket = Bucket {
            program_id,
            year_level,
            semester,
        };
        Ok(self.orchestrator(settings).allocate_bucket(bucket)?)
    }

    /// 当前学年当前学期的全量分配
    pub async fn run_bulk_for_active_year(&self) -> ApiResult<RunSummary> {
        let settings = self.settings().await?;
        Ok(self.orchestrator(settings).run_for_active_year()?)
    }

    /// 续跑
    pub async fn resume_run(&self, run_id: &str) -> ApiResult<RunSummary> {
        if run_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("运行ID不能为空".to_string()));
        }
        let settings = self.settings().await?;
        Ok(self.orchestrator(settings).resume_run(run_id.trim())?)
    }

    /// 为新建学生开班并放入其所在桶的全部课程
    pub async fn place_new_student(&self, student_id: i64) -> ApiResult<RunSummary> {
        let settings = self.settings().await?;
        Ok(self.orchestrator(settings).place_new_student(student_id)?)
    }

    // ==========================================
    // 修复
    // ==========================================

    pub async fn rebalance_overcapacity(&self, school_year_id: i64) -> ApiResult<RebalanceSummary> {
        let settings = self.settings().await?;
        Ok(self.repair(settings).rebalance_overcapacity(school_year_id)?)
    }

    pub async fn dedupe_sections(&self) -> ApiResult<DedupeSummary> {
        let settings = self.settings().await?;
        Ok(self.repair(settings).dedupe_sections()?)
    }

    /// 重置教学班,选课记录按配置的 reset_enrollment_policy 处理
    pub async fn reset_sections(&self, filter: ResetFilter) -> ApiResult<ResetSummary> {
        let settings = self.settings().await?;
        let policy = settings.reset_enrollment_policy;
        self.reset_sections_with_policy(filter, policy, settings)
    }

    /// 按数字选择器重置教学班（0 表示全部）
    ///
    /// # 返回
    /// - Err(InvalidInput): 选择器越界,未开启事务
    pub async fn reset_sections_by_selectors(
        &self,
        program_id: i64,
        year_level: i32,
        semester: i32,
    ) -> ApiResult<ResetSummary> {
        let filter =
            ResetFilter::from_selectors(program_id, year_level, semester).map_err(ApiError::InvalidInput)?;
        self.reset_sections(filter).await
    }

    /// 重置教学班（显式指定选课记录处理策略）
    pub async fn reset_sections_using(
        &self,
        filter: ResetFilter,
        policy: ResetEnrollmentPolicy,
    ) -> ApiResult<ResetSummary> {
        let settings = self.settings().await?;
        self.reset_sections_with_policy(filter, policy, settings)
    }

    fn reset_sections_with_policy(
        &self,
        filter: ResetFilter,
        policy: ResetEnrollmentPolicy,
        settings: AllocationSettings,
    ) -> ApiResult<ResetSummary> {
        info!(filter = ?filter, policy = %policy, "请求重置教学班");
        Ok(self.repair(settings).reset_sections(filter, policy)?)
    }

    /// 按选课记录重算全部缓存计数,返回被修正的教学班数量
    pub async fn recount_section_counters(&self) -> ApiResult<usize> {
        let settings = self.settings().await?;
        Ok(self.repair(settings).recount_section_counters()?)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 未分班的选课记录（容量不足时留下的异常清单）
    pub async fn list_unsectioned(&self, school_year_id: i64) -> ApiResult<Vec<Enrollment>> {
        Ok(self.repos.enrollment_repo.list_unsectioned(school_year_id)?)
    }

    /// 学年的运行记录（新 → 旧）
    pub async fn list_runs(&self, school_year_id: i64) -> ApiResult<Vec<AllocationRun>> {
        Ok(self.repos.run_repo.list_by_school_year(school_year_id)?)
    }
}
