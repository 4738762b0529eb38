// ==========================================
// 教学班分配引擎 - 分配配置读取 Trait
// ==========================================
// 职责: 定义分配引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::ResetEnrollmentPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

// ==========================================
// AllocationConfigReader Trait
// ==========================================
// 用途: 引擎入口一次性读取的配置项
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait AllocationConfigReader: Send + Sync {
    // ===== 开班 =====

    /// 获取每个教学班的目标容量
    ///
    /// # 默认值
    /// - 30
    async fn get_default_target_capacity(&self) -> Result<i32, Box<dyn Error>>;

    /// 显式开班（provision_sections）时,零需求是否仍保留一个教学班
    ///
    /// # 默认值
    /// - true
    async fn get_explicit_provision_floor(&self) -> Result<bool, Box<dyn Error>>;

    /// 批量补班时,零需求是否仍保留一个教学班
    ///
    /// # 默认值
    /// - false
    async fn get_bulk_provision_floor(&self) -> Result<bool, Box<dyn Error>>;

    // ===== 批量运行 =====

    /// 获取批量运行覆盖的最高年级（1..=n）
    ///
    /// # 默认值
    /// - 3
    async fn get_max_year_level(&self) -> Result<i32, Box<dyn Error>>;

    /// 获取每个提交批次的学生数
    ///
    /// # 默认值
    /// - 200
    async fn get_allocation_batch_size(&self) -> Result<usize, Box<dyn Error>>;

    /// 获取咨询锁的失效秒数（超过即可被接管）
    ///
    /// # 默认值
    /// - 900
    async fn get_allocation_lock_ttl_secs(&self) -> Result<i64, Box<dyn Error>>;

    // ===== 修复 =====

    /// 获取重置教学班时的选课记录处理策略
    ///
    /// # 默认值
    /// - DELETE
    async fn get_reset_enrollment_policy(&self) -> Result<ResetEnrollmentPolicy, Box<dyn Error>>;
}

// ==========================================
// AllocationSettings - 引擎配置快照
// ==========================================
// 入口处读取一次,引擎内部只使用快照（同步）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSettings {
    pub default_target_capacity: i32,
    pub max_year_level: i32,
    pub batch_size: usize,
    pub explicit_provision_floor: bool,
    pub bulk_provision_floor: bool,
    pub reset_enrollment_policy: ResetEnrollmentPolicy,
    pub lock_ttl_secs: i64,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            default_target_capacity: 30,
            max_year_level: 3,
            batch_size: 200,
            explicit_provision_floor: true,
            bulk_provision_floor: false,
            reset_enrollment_policy: ResetEnrollmentPolicy::Delete,
            lock_ttl_secs: 900,
        }
    }
}

impl AllocationSettings {
    /// 从配置读取器加载全部配置项
    pub async fn load(reader: &dyn AllocationConfigReader) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            default_target_capacity: reader.get_default_target_capacity().await?,
            max_year_level: reader.get_max_year_level().await?,
            batch_size: reader.get_allocation_batch_size().await?,
            explicit_provision_floor: reader.get_explicit_provision_floor().await?,
            bulk_provision_floor: reader.get_bulk_provision_floor().await?,
            reset_enrollment_policy: reader.get_reset_enrollment_policy().await?,
            lock_ttl_secs: reader.get_allocation_lock_ttl_secs().await?,
        })
    }
}
