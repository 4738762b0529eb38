// ==========================================
// 教学班分配引擎 - 选课记录写入
// ==========================================
// 职责: 在一个批次事务内按学生写入/挂班,并提交占用增量
// 红线: 每条选课记录最多挂班一次,enrolled_count 每次成功挂班只 +1
// ==========================================
// 写入语义:
// - 无记录: 插入（无空位时 section 为空,计入 inserted + unsectioned）
// - 未分班且有空位: 条件更新 WHERE section_id IS NULL,0 行视为并发已挂班 → skipped
// - 已分班: skipped
// ==========================================

use crate::domain::allocation::AllocationCounters;
use crate::engine::placement::OccupancySnapshot;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::error::RepositoryResult;
use crate::repository::section_repo::SectionRepository;
use rusqlite::Transaction;
use tracing::debug;

/// 单个学生的写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Inserted { section_id: Option<i64> },
    Attached { section_id: i64 },
    AlreadySectioned,
    StillUnsectioned,
    Conflict, // 插入/挂班时被其他写入者抢先
}

impl PlacementOutcome {
    /// 累加到计数器
    pub fn record(&self, counters: &mut AllocationCounters) {
        match self {
            PlacementOutcome::Inserted { section_id } => {
                counters.inserted += 1;
                if section_id.is_none() {
                    counters.unsectioned += 1;
                }
            }
            PlacementOutcome::Attached { .. } => counters.updated += 1,
            PlacementOutcome::AlreadySectioned => counters.skipped += 1,
            PlacementOutcome::StillUnsectioned => counters.unsectioned += 1,
            PlacementOutcome::Conflict => {
                counters.skipped += 1;
                counters.conflicts += 1;
            }
        }
    }
}

// ==========================================
// PlacementWriter - 选课记录写入器
// ==========================================
pub struct PlacementWriter;

impl PlacementWriter {
    /// 事务内放置一个学生
    pub fn place_student_tx(
        tx: &Transaction<'_>,
        snapshot: &mut OccupancySnapshot,
        student_id: i64,
        school_year_id: i64,
    ) -> RepositoryResult<PlacementOutcome> {
        let course_id = snapshot.course_id();
        let existing = EnrollmentRepository::find_tx(tx, student_id, course_id, school_year_id)?;

        let outcome = match existing {
            None => {
                let section_id = snapshot.reserve();
                match EnrollmentRepository::insert_tx(tx, student_id, course_id, section_id, school_year_id)? {
                    Some(_) => PlacementOutcome::Inserted { section_id },
                    None => {
                        if let Some(id) = section_id {
                            snapshot.vacate(id);
                        }
                        PlacementOutcome::Conflict
                    }
                }
            }
            Some(enrollment) if enrollment.is_sectioned() => PlacementOutcome::AlreadySectioned,
            Some(enrollment) => match snapshot.reserve() {
                Some(section_id) => {
                    if EnrollmentRepository::attach_section_tx(tx, enrollment.enrollment_id, section_id)? {
                        PlacementOutcome::Attached { section_id }
                    } else {
                        snapshot.vacate(section_id);
                        PlacementOutcome::Conflict
                    }
                }
                None => PlacementOutcome::StillUnsectioned,
            },
        };

        debug!(student_id, course_id, outcome = ?outcome, "学生放置结果");
        Ok(outcome)
    }

    /// 事务内放置一个批次的学生,并提交占用增量
    ///
    /// # 参数
    /// - snapshot: 课程占用快照（跨批次复用,增量在本批次末尾提交）
    /// - student_ids: 本批次学生（按ID升序）
    ///
    /// # 返回
    /// 本批次的计数
    pub fn place_chunk_tx(
        tx: &Transaction<'_>,
        snapshot: &mut OccupancySnapshot,
        student_ids: &[i64],
        school_year_id: i64,
    ) -> RepositoryResult<AllocationCounters> {
        let mut counters = AllocationCounters::default();
        for &student_id in student_ids {
            Self::place_student_tx(tx, snapshot, student_id, school_year_id)?.record(&mut counters);
        }

        for (section_id, delta) in snapshot.take_deltas() {
            SectionRepository::apply_occupancy_delta_tx(tx, section_id, delta)?;
        }
        Ok(counters)
    }
}
