// ==========================================
// Mock 配置实现 - 用于集成测试
// ==========================================

use async_trait::async_trait;
use section_allocator::config::AllocationConfigReader;
use section_allocator::domain::types::ResetEnrollmentPolicy;
use std::error::Error;

/// Mock 配置结构
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub default_target_capacity: i32,
    pub explicit_provision_floor: bool,
    pub bulk_provision_floor: bool,
    pub max_year_level: i32,
    pub batch_size: usize,
    pub lock_ttl_secs: i64,
    pub reset_enrollment_policy: ResetEnrollmentPolicy,
}

impl MockConfig {
    /// 创建默认配置
    pub fn default() -> Self {
        Self {
            default_target_capacity: 30,
            explicit_provision_floor: true,
            bulk_provision_floor: false,
            max_year_level: 3,
            batch_size: 200,
            lock_ttl_secs: 900,
            reset_enrollment_policy: ResetEnrollmentPolicy::Delete,
        }
    }

    /// 小批次（便于在批次边界取消）
    pub fn with_batch_size(batch_size: usize) -> Self {
        let mut config = Self::default();
        config.batch_size = batch_size;
        config
    }

    /// 重置时保留选课记录
    pub fn detach_on_reset() -> Self {
        let mut config = Self::default();
        config.reset_enrollment_policy = ResetEnrollmentPolicy::Detach;
        config
    }
}

#[async_trait]
impl AllocationConfigReader for MockConfig {
    async fn get_default_target_capacity(&self) -> Result<i32, Box<dyn Error>> {
        Ok(self.default_target_capacity)
    }

    async fn get_explicit_provision_floor(&self) -> Result<bool, Box<dyn Error>> {
        Ok(self.explicit_provision_floor)
    }

    async fn get_bulk_provision_floor(&self) -> Result<bool, Box<dyn Error>> {
        Ok(self.bulk_provision_floor)
    }

    async fn get_max_year_level(&self) -> Result<i32, Box<dyn Error>> {
        Ok(self.max_year_level)
    }

    async fn get_allocation_batch_size(&self) -> Result<usize, Box<dyn Error>> {
        Ok(self.batch_size)
    }

    async fn get_allocation_lock_ttl_secs(&self) -> Result<i64, Box<dyn Error>> {
        Ok(self.lock_ttl_secs)
    }

    async fn get_reset_enrollment_policy(&self) -> Result<ResetEnrollmentPolicy, Box<dyn Error>> {
        Ok(self.reset_enrollment_policy)
    }
}
