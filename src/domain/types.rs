// ==========================================
// 教学班分配引擎 - 领域类型定义
// ==========================================
// 红线: 数据库存储值与枚举一一对应,不接受自由文本
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 学期 (Semester)
// ==========================================
// 数据库存储: '1' / '2' / 'SUMMER'
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Semester {
    First,  // 第一学期
    Second, // 第二学期
    Summer, // 夏季学期
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl Semester {
    /// 从数据库字符串解析学期
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "1" | "FIRST" => Some(Semester::First),
            "2" | "SECOND" => Some(Semester::Second),
            "SUMMER" | "S" | "3" => Some(Semester::Summer),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Semester::First => "1",
            Semester::Second => "2",
            Semester::Summer => "SUMMER",
        }
    }

    /// 从数字选择器解析（1/2/3，0 表示“全部”）
    pub fn from_selector(selector: i32) -> Option<Self> {
        match selector {
            1 => Some(Semester::First),
            2 => Some(Semester::Second),
            3 => Some(Semester::Summer),
            _ => None,
        }
    }
}

// ==========================================
// 教学班状态 (Section Status)
// ==========================================
// 分配时只考虑 ACTIVE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    Active,   // 启用
    Inactive, // 停用
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SectionStatus {
    /// 从字符串解析状态（未知值视为停用）
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => SectionStatus::Active,
            _ => SectionStatus::Inactive,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SectionStatus::Active => "ACTIVE",
            SectionStatus::Inactive => "INACTIVE",
        }
    }
}

// ==========================================
// 学生状态 (Student Status)
// ==========================================
// 只有 ACTIVE 学生计入需求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentStatus {
    Active,   // 在读
    Inactive, // 休学/离校
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl StudentStatus {
    /// 从字符串解析状态（未知值视为非在读）
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => StudentStatus::Active,
            _ => StudentStatus::Inactive,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "ACTIVE",
            StudentStatus::Inactive => "INACTIVE",
        }
    }
}

// ==========================================
// 重置时的选课记录处理策略
// ==========================================
// Delete: 连同选课记录一起删除（不可恢复）
// Detach: 保留选课记录,置为未分班,等待重新分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetEnrollmentPolicy {
    Delete,
    Detach,
}

impl fmt::Display for ResetEnrollmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetEnrollmentPolicy::Delete => write!(f, "DELETE"),
            ResetEnrollmentPolicy::Detach => write!(f, "DETACH"),
        }
    }
}

impl ResetEnrollmentPolicy {
    /// 从配置值解析
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DELETE" => Some(ResetEnrollmentPolicy::Delete),
            "DETACH" => Some(ResetEnrollmentPolicy::Detach),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semester_db_round_trip() {
        for s in [Semester::First, Semester::Second, Semester::Summer] {
            assert_eq!(Semester::from_db_str(s.to_db_str()), Some(s));
        }
        assert_eq!(Semester::from_db_str(" summer "), Some(Semester::Summer));
        assert_eq!(Semester::from_db_str("4"), None);
    }

    #[test]
    fn test_semester_selector_zero_means_all() {
        assert_eq!(Semester::from_selector(0), None);
        assert_eq!(Semester::from_selector(3), Some(Semester::Summer));
    }

    #[test]
    fn test_reset_policy_parse() {
        assert_eq!(
            ResetEnrollmentPolicy::from_config_str("detach"),
            Some(ResetEnrollmentPolicy::Detach)
        );
        assert_eq!(ResetEnrollmentPolicy::from_config_str("archive"), None);
    }
}
