// ==========================================
// 教学班分配引擎 - 需求估算
// ==========================================
// 公式: sections_needed = ceil(active_count / target_capacity)
// 约束: 零需求时是否保留一个教学班由调用路径决定（SectionFloor）
// ==========================================

use crate::engine::error::{AllocationError, AllocationResult};
use serde::{Deserialize, Serialize};

/// 零需求时的教学班下限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionFloor {
    AtLeastOne, // 至少一个（显式开班）
    Zero,       // 允许为零（批量补班）
}

impl SectionFloor {
    pub fn from_flag(at_least_one: bool) -> Self {
        if at_least_one {
            SectionFloor::AtLeastOne
        } else {
            SectionFloor::Zero
        }
    }
}

// ==========================================
// DemandEstimator - 需求估算器
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandEstimator {
    target_capacity: u32,
    floor: SectionFloor,
}

impl DemandEstimator {
    /// 创建估算器
    ///
    /// # 返回
    /// - Err(InvalidInput): target_capacity <= 0
    pub fn new(target_capacity: i32, floor: SectionFloor) -> AllocationResult<Self> {
        let target_capacity = u32::try_from(target_capacity)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| {
                AllocationError::InvalidInput(format!(
                    "目标容量必须为正数: {}",
                    target_capacity
                ))
            })?;
        Ok(Self {
            target_capacity,
            floor,
        })
    }

    /// 每个教学班的目标容量
    pub fn target_capacity(&self) -> i32 {
        i32::try_from(self.target_capacity).unwrap_or(i32::MAX)
    }

    pub fn floor(&self) -> SectionFloor {
        self.floor
    }

    /// 计算所需教学班数
    pub fn sections_needed(&self, active_count: u32) -> u32 {
        let needed = active_count.div_ceil(self.target_capacity);
        match self.floor {
            SectionFloor::AtLeastOne => needed.max(1),
            SectionFloor::Zero => needed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_division() {
        let estimator = DemandEstimator::new(30, SectionFloor::Zero).unwrap();
        assert_eq!(estimator.sections_needed(61), 3);
        assert_eq!(estimator.sections_needed(60), 2);
        assert_eq!(estimator.sections_needed(45), 2);
        assert_eq!(estimator.sections_needed(1), 1);
    }

    #[test]
    fn test_zero_demand_depends_on_floor() {
        let explicit = DemandEstimator::new(30, SectionFloor::AtLeastOne).unwrap();
        let top_up = DemandEstimator::new(30, SectionFloor::Zero).unwrap();
        assert_eq!(explicit.sections_needed(0), 1);
        assert_eq!(top_up.sections_needed(0), 0);
        assert_eq!(explicit.sections_needed(61), 3);
    }

    #[test]
    fn test_non_positive_capacity_rejected() {
        assert!(matches!(
            DemandEstimator::new(0, SectionFloor::Zero),
            Err(AllocationError::InvalidInput(_))
        ));
        assert!(DemandEstimator::new(-5, SectionFloor::AtLeastOne).is_err());
    }
}
