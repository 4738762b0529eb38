// ==========================================
// 教学班分配引擎 - 教学班与选课领域模型
// ==========================================
// 红线: enrolled_count <= capacity 是目标而非硬约束
// 用途: 越界由修复操作收敛,分配时不得继续放入已满教学班
// ==========================================

use crate::domain::types::SectionStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Section - 教学班
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    // ===== 主键 =====
    pub section_id: i64,
    pub course_id: i64, // 所属课程（课程删除时级联删除）

    // ===== 编码 =====
    pub code: String,            // 原始编码
    pub normalized_code: String, // 大写+去空白,(course_id, normalized_code) 唯一

    // ===== 容量 =====
    pub capacity: i32,       // 容量
    pub enrolled_count: i32, // 已选人数（缓存计数）

    pub status: SectionStatus,
    pub created_at: NaiveDateTime,
}

impl Section {
    pub fn is_active(&self) -> bool {
        self.status == SectionStatus::Active
    }
}

/// 教学班编码规范化: 去首尾空白 + 大写
pub fn normalize_section_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// 待创建的教学班
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSection {
    pub course_id: i64,
    pub code: String,
    pub capacity: i32,
}

// ==========================================
// Enrollment - 选课记录
// ==========================================
// (student_id, course_id, school_year_id) 唯一
// section_id 为空即“未分班”
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub section_id: Option<i64>,
    pub school_year_id: i64,
    pub enrolled_at: NaiveDateTime,
}

impl Enrollment {
    pub fn is_sectioned(&self) -> bool {
        self.section_id.is_some()
    }
}

// ==========================================
// Trait: SeatCapacity
// ==========================================
// 用途: 分配器与修复操作共用的容量判定接口
pub trait SeatCapacity {
    fn capacity(&self) -> i32;

    fn occupancy(&self) -> i32;

    /// 是否还有空位
    fn has_room(&self) -> bool {
        self.occupancy() < self.capacity()
    }

    /// 剩余座位（不小于 0）
    fn remaining_seats(&self) -> i32 {
        (self.capacity() - self.occupancy()).max(0)
    }

    /// 超出容量的人数（不小于 0）
    fn excess_seats(&self) -> i32 {
        (self.occupancy() - self.capacity()).max(0)
    }

    fn is_over_capacity(&self) -> bool {
        self.occupancy() > self.capacity()
    }
}

impl SeatCapacity for Section {
    fn capacity(&self) -> i32 {
        self.capacity
    }

    fn occupancy(&self) -> i32 {
        self.enrolled_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_section(capacity: i32, enrolled_count: i32) -> Section {
        Section {
            section_id: 1,
            course_id: 1,
            code: "A".to_string(),
            normalized_code: "A".to_string(),
            capacity,
            enrolled_count,
            status: SectionStatus::Active,
            created_at: NaiveDate::from_ymd_opt(2026, 8, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_seat_capacity_on_full_and_overfull_sections() {
        let full = make_section(30, 30);
        assert!(!full.has_room());
        assert_eq!(full.remaining_seats(), 0);
        assert!(!full.is_over_capacity());

        let over = make_section(30, 34);
        assert_eq!(over.excess_seats(), 4);
        assert_eq!(over.remaining_seats(), 0);
        assert!(over.is_over_capacity());
    }
}
