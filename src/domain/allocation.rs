// ==========================================
// 教学班分配引擎 - 分配运行与汇总模型
// ==========================================
// 职责: 批量运行的范围、游标、计数器与各操作的汇总结果
// 红线: 对外只返回聚合汇总,逐行明细只进日志
// ==========================================

use crate::domain::catalog::Bucket;
use crate::domain::types::{ResetEnrollmentPolicy, Semester};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// AllocationCounters - 分配计数器
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationCounters {
    pub sections_created: u32, // 新建教学班数
    pub inserted: u32,         // 新增选课记录（含未分班插入）
    pub updated: u32,          // 未分班 → 已分班
    pub skipped: u32,          // 已分班,不做处理
    pub unsectioned: u32,      // 运行结束时仍未分班的学生
    pub courses_touched: u32,
    pub buckets_touched: u32,
    pub failed_units: u32, // 回滚的单元（课程/批次）
    pub conflicts: u32,    // 被唯一约束拦下的并发写入
}

impl AllocationCounters {
    /// 累加另一组计数
    pub fn merge(&mut self, other: &AllocationCounters) {
        self.sections_created += other.sections_created;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.unsectioned += other.unsectioned;
        self.courses_touched += other.courses_touched;
        self.buckets_touched += other.buckets_touched;
        self.failed_units += other.failed_units;
        self.conflicts += other.conflicts;
    }
}

// ==========================================
// 运行类型与状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    Bucket,     // 单个分配桶
    ActiveYear, // 当前学年全部桶
    Student,    // 单个新建学生
}

impl RunKind {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RunKind::Bucket => "BUCKET",
            RunKind::ActiveYear => "ACTIVE_YEAR",
            RunKind::Student => "STUDENT",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ACTIVE_YEAR" => RunKind::ActiveYear,
            "STUDENT" => RunKind::Student,
            _ => RunKind::Bucket,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl RunStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            "CANCELLED" => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }

    /// 可从游标继续执行
    pub fn is_resumable(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

// ==========================================
// RunCursor - 运行游标
// ==========================================
// 最后一次提交的位置: 桶序号 + 课程 + 学生ID
// 续跑时跳过游标之前（含）的所有学生
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCursor {
    pub bucket_index: usize,
    pub course_id: Option<i64>,
    pub last_student_id: Option<i64>,
}

// ==========================================
// AllocationRun - 分配运行记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRun {
    pub run_id: String,
    pub school_year_id: i64,
    pub run_kind: RunKind,
    pub buckets: Vec<Bucket>,      // 本次运行覆盖的桶（按处理顺序）
    pub student_id: Option<i64>,   // 仅 RunKind::Student
    pub status: RunStatus,
    pub cursor: Option<RunCursor>,
    pub counters: AllocationCounters,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
}

// ==========================================
// 各操作的汇总结果
// ==========================================

/// 批量/单桶分配汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub school_year_id: i64,
    pub counters: AllocationCounters,
    pub cancelled: bool,
}

/// 单课程开班汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionSummary {
    pub course_id: i64,
    pub sections_needed: u32,
    pub existing: u32,
    pub created: u32,
    pub created_codes: Vec<String>,
    pub conflict: bool, // 并发开班被唯一约束拦下,本课程已回滚
}

/// 超容重平衡汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceSummary {
    pub touched: u32, // 处理的课程数
    pub created: u32, // 新建教学班数
    pub moved: u32,   // 迁移的选课记录数
    pub failed_units: u32,
}

/// 重复教学班合并汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeSummary {
    pub groups: u32,
    pub removed: u32,
    pub reassigned: u32,             // 迁移的选课记录
    pub reassigned_assignments: u32, // 迁移的任课记录
    pub failed_units: u32,
}

/// 教学班重置汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    pub deleted: u32,
    pub enrollments_deleted: u32,
    pub enrollments_detached: u32,
    pub assignments_deleted: u32,
    pub policy: ResetEnrollmentPolicy,
}

// ==========================================
// ResetFilter - 重置范围
// ==========================================
// 三个维度任意组合,None 表示不限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetFilter {
    pub program_id: Option<i64>,
    pub year_level: Option<i32>,
    pub semester: Option<Semester>,
}

impl ResetFilter {
    /// 从数字选择器构造
    ///
    /// # 参数
    /// - program_id / year_level: 0 表示全部,其余必须为正数
    /// - semester: 0 表示全部,1 / 2 / 3(SUMMER)
    ///
    /// # 返回
    /// - Err: 选择器越界（重置不可逆,越界值不得放宽范围）
    pub fn from_selectors(program_id: i64, year_level: i32, semester: i32) -> Result<Self, String> {
        if program_id < 0 {
            return Err(format!("专业选择器无效: program_id={}", program_id));
        }
        if year_level < 0 {
            return Err(format!("年级选择器无效: year_level={}", year_level));
        }
        let semester = match semester {
            0 => None,
            n => Some(
                Semester::from_selector(n).ok_or_else(|| format!("学期选择器无效: semester={}", n))?,
            ),
        };
        Ok(Self {
            program_id: (program_id > 0).then_some(program_id),
            year_level: (year_level > 0).then_some(year_level),
            semester,
        })
    }

    /// 校验直接构造的过滤条件（Some 的专业/年级必须为正数）
    pub fn validate(&self) -> Result<(), String> {
        if let Some(program_id) = self.program_id.filter(|id| *id <= 0) {
            return Err(format!("专业选择器无效: program_id={}", program_id));
        }
        if let Some(year_level) = self.year_level.filter(|y| *y <= 0) {
            return Err(format!("年级选择器无效: year_level={}", year_level));
        }
        Ok(())
    }

    pub fn is_unrestricted(&self) -> bool {
        self.program_id.is_none() && self.year_level.is_none() && self.semester.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_filter_zero_selectors() {
        let filter = ResetFilter::from_selectors(7, 0, 0).unwrap();
        assert_eq!(filter.program_id, Some(7));
        assert_eq!(filter.year_level, None);
        assert_eq!(filter.semester, None);
        assert!(!filter.is_unrestricted());
        assert!(ResetFilter::from_selectors(0, 0, 0).unwrap().is_unrestricted());
        assert_eq!(
            ResetFilter::from_selectors(1, 2, 3).unwrap().semester,
            Some(Semester::Summer)
        );
    }

    #[test]
    fn test_reset_filter_rejects_out_of_range_selectors() {
        assert!(ResetFilter::from_selectors(1, 1, 4).is_err());
        assert!(ResetFilter::from_selectors(1, 1, -1).is_err());
        assert!(ResetFilter::from_selectors(-1, 0, 0).is_err());
        assert!(ResetFilter::from_selectors(0, -2, 0).is_err());

        let direct = ResetFilter {
            program_id: Some(0),
            ..Default::default()
        };
        assert!(direct.validate().is_err());
        assert!(ResetFilter::default().validate().is_ok());
    }

    #[test]
    fn test_counters_merge() {
        let mut total = AllocationCounters::default();
        let part = AllocationCounters {
            inserted: 3,
            unsectioned: 1,
            failed_units: 1,
            ..Default::default()
        };
        total.merge(&part);
        total.merge(&part);
        assert_eq!(total.inserted, 6);
        assert_eq!(total.unsectioned, 2);
        assert_eq!(total.failed_units, 2);
    }
}
