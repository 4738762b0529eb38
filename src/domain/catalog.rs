// ==========================================
// 教学班分配引擎 - 学籍与课程目录模型
// ==========================================
// 职责: 专业、课程、学生、学年等外部提供的主数据
// 红线: 引擎只读这些实体,不负责其维护
// ==========================================

use crate::domain::types::{Semester, StudentStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Program - 专业
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub program_id: i64,
    pub code: String,
    pub name: String,
}

// ==========================================
// Course - 课程
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub course_id: i64,
    pub program_id: i64,
    pub code: String,
    pub title: String,
    pub year_level: i32,
    pub semester: Semester,
}

impl Course {
    /// 课程所属的分配桶
    pub fn bucket(&self) -> Bucket {
        Bucket {
            program_id: self.program_id,
            year_level: self.year_level,
            semester: self.semester,
        }
    }
}

// ==========================================
// Student - 学生
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: i64,
    pub program_id: i64,
    pub year_level: i32,
    pub status: StudentStatus,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

impl Student {
    pub fn is_active(&self) -> bool {
        self.status == StudentStatus::Active
    }
}

// ==========================================
// SchoolYear - 学年
// ==========================================
// 同一时刻只有一个 active 学年
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolYear {
    pub school_year_id: i64,
    pub label: String,
    pub is_active: bool,
    pub semester: Option<Semester>, // 当前学期（未配置时批量分配不可执行）
}

// ==========================================
// Bucket - 分配桶 (专业, 年级, 学期)
// ==========================================
// 需求估算与批量处理的基本单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub program_id: i64,
    pub year_level: i32,
    pub semester: Semester,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "program={}/year={}/semester={}",
            self.program_id, self.year_level, self.semester
        )
    }
}

// ==========================================
// InstructorAssignment - 教师任课记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructorAssignment {
    pub assignment_id: i64,
    pub section_id: i64,
    pub instructor_ref: String,
    pub school_year_id: Option<i64>,
}
