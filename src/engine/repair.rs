// ==========================================
// 教学班分配引擎 - 一致性修复操作
// ==========================================
// 职责: 超容重平衡 / 重复教学班合并 / 教学班重置 / 缓存计数重算
// 红线: 修复操作不删除也不复制任何一条学生的选课事实（重置按策略处理除外）
// 红线: 原子单元 = 一个课程（重平衡）/ 一个重复组（合并）/ 一次重置调用
// 约束: 与批量运行共用学年咨询锁
// ==========================================

use crate::config::AllocationSettings;
use crate::domain::allocation::{DedupeSummary, RebalanceSummary, ResetFilter, ResetSummary};
use crate::domain::types::ResetEnrollmentPolicy;
use crate::engine::demand::{DemandEstimator, SectionFloor};
use crate::engine::error::{AllocationError, AllocationResult};
use crate::engine::events::{AllocationEvent, OptionalEventPublisher};
use crate::engine::placement::OccupancySnapshot;
use crate::engine::provisioner::SectionProvisioner;
use crate::engine::repositories::AllocationRepositories;
use crate::engine::run_guard::RunGuard;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::error::RepositoryResult;
use crate::repository::section_repo::{DuplicateSectionGroup, SectionRepository};
use crate::repository::transaction::run_in_transaction;
use rusqlite::Transaction;
use tracing::{debug, info, instrument, warn};

/// 单个课程的重平衡结果
#[derive(Debug, Clone, Copy, Default)]
struct CourseRebalance {
    created: u32,
    moved: u32,
    still_over: u32, // 无空位可迁,仍超容的人数
}

/// 单个重复组的合并结果
#[derive(Debug, Clone, Copy, Default)]
struct GroupMerge {
    removed: u32,
    reassigned: u32,
    reassigned_assignments: u32,
}

// ==========================================
// RepairOperations - 修复操作
// ==========================================
pub struct RepairOperations {
    repos: AllocationRepositories,
    settings: AllocationSettings,
    events: OptionalEventPublisher,
}

impl RepairOperations {
    pub fn new(repos: AllocationRepositories, settings: AllocationSettings) -> Self {
        Self {
            repos,
            settings,
            events: OptionalEventPublisher::none(),
        }
    }

    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    // ==========================================
    // 超容重平衡
    // ==========================================

    /// 把超容教学班中该学年最新的选课记录迁到有空位的教学班
    ///
    /// 每个有选课记录的课程一个事务：
    /// 1) 以选课人数为需求补齐教学班
    /// 2) 以真实人数构造占用快照
    /// 3) 按放置规则迁出超出部分（新 → 旧）
    /// 4) 以真实人数重写 enrolled_count
    #[instrument(skip(self))]
    pub fn rebalance_overcapacity(&self, school_year_id: i64) -> AllocationResult<RebalanceSummary> {
        if self.repos.school_year_repo.find_by_id(school_year_id)?.is_none() {
            return Err(AllocationError::NotFound {
                entity: "学年",
                id: school_year_id,
            });
        }
        let estimator = DemandEstimator::new(self.settings.default_target_capacity, SectionFloor::Zero)?;
        let _guard = RunGuard::acquire(
            self.repos.lock_repo.clone(),
            school_year_id,
            self.settings.lock_ttl_secs,
        )?;

        let course_ids = self
            .repos
            .enrollment_repo
            .list_course_ids_with_enrollments(school_year_id)?;
        let mut summary = RebalanceSummary::default();

        for course_id in course_ids {
            let result: RepositoryResult<CourseRebalance> = run_in_transaction(&self.repos.conn, |tx| {
                Self::rebalance_course_tx(tx, course_id, school_year_id, &estimator)
            });
            match result {
                Ok(r) => {
                    summary.touched += 1;
                    summary.created += r.created;
                    summary.moved += r.moved;
                    if r.still_over > 0 {
                        warn!(course_id, still_over = r.still_over, "课程无空位可迁,仍有教学班超容");
                    }
                }
                Err(e) => {
                    warn!(course_id, error = %e, "课程重平衡失败,已回滚");
                    summary.failed_units += 1;
                }
            }
        }

        info!(
            school_year_id,
            touched = summary.touched,
            created = summary.created,
            moved = summary.moved,
            failed_units = summary.failed_units,
            "超容重平衡完成"
        );
        self.events
            .publish(AllocationEvent::repair("rebalance_overcapacity", Some(school_year_id)));
        Ok(summary)
    }

    fn rebalance_course_tx(
        tx: &Transaction<'_>,
        course_id: i64,
        school_year_id: i64,
        estimator: &DemandEstimator,
    ) -> RepositoryResult<CourseRebalance> {
        let enrolled = EnrollmentRepository::list_by_course_year_tx(tx, course_id, school_year_id)?;
        let demand = u32::try_from(enrolled.len()).unwrap_or(u32::MAX);
        let provisioned = SectionProvisioner::provision_tx(
            tx,
            course_id,
            estimator.sections_needed(demand),
            estimator.target_capacity(),
        )?;
        let mut result = CourseRebalance {
            created: provisioned.created,
            ..Default::default()
        };

        let mut snapshot = Self::real_snapshot_tx(tx, course_id)?;

        // 只迁本学年的记录：每个超容班可迁人数 = min(超出人数, 本学年记录数)
        let mut plans = Vec::new();
        for (from_section_id, excess) in snapshot.over_capacity() {
            let victims = EnrollmentRepository::list_by_section_year_newest_first_tx(
                tx,
                from_section_id,
                school_year_id,
            )?;
            let movable = excess.min(i32::try_from(victims.len()).unwrap_or(i32::MAX));
            result.still_over += u32::try_from(excess - movable).unwrap_or(0);
            plans.push((from_section_id, movable, victims));
        }

        // 现有空位不足以接收可迁人数时,按目标容量追加教学班
        let movable_total: i32 = plans.iter().map(|(_, movable, _)| *movable).sum();
        let shortfall = movable_total - snapshot.free_seats();
        if shortfall > 0 {
            let target = estimator.target_capacity();
            let extra = u32::try_from((shortfall + target - 1) / target).unwrap_or(0);
            let active = u32::try_from(snapshot.slots().len()).unwrap_or(u32::MAX);
            let topped_up = SectionProvisioner::provision_tx(tx, course_id, active + extra, target)?;
            result.created += topped_up.created;
            debug!(course_id, shortfall, created = topped_up.created, "空位不足,已追加教学班");
            snapshot = Self::real_snapshot_tx(tx, course_id)?;
        }

        for (from_section_id, movable, victims) in &plans {
            let from_section_id = *from_section_id;
            let mut left = *movable;
            for victim in victims.iter().take(usize::try_from(*movable).unwrap_or(0)) {
                let Some(to_section_id) = snapshot.reserve() else {
                    break;
                };
                if EnrollmentRepository::move_section_tx(tx, victim.enrollment_id, from_section_id, to_section_id)? {
                    snapshot.vacate(from_section_id);
                    result.moved += 1;
                    left -= 1;
                    debug!(
                        enrollment_id = victim.enrollment_id,
                        from_section_id,
                        to_section_id,
                        "选课记录已迁班"
                    );
                } else {
                    snapshot.vacate(to_section_id);
                }
            }
            result.still_over += u32::try_from(left.max(0)).unwrap_or(0);
        }

        // 以 enrollment 表为准重写全部缓存计数（含停用教学班）
        for section in SectionRepository::list_by_course_tx(tx, course_id)? {
            SectionRepository::recount_tx(tx, section.section_id)?;
        }
        Ok(result)
    }

    fn real_snapshot_tx(tx: &Transaction<'_>, course_id: i64) -> RepositoryResult<OccupancySnapshot> {
        let sections = SectionRepository::list_by_course_tx(tx, course_id)?;
        let real = SectionRepository::real_occupancy_by_course_tx(tx, course_id)?;
        Ok(OccupancySnapshot::from_real_counts(course_id, &sections, &real))
    }

    // ==========================================
    // 重复教学班合并
    // ==========================================

    /// 按 (course_id, UPPER(TRIM(code))) 合并重复教学班,保留最小ID
    #[instrument(skip(self))]
    pub fn dedupe_sections(&self) -> AllocationResult<DedupeSummary> {
        let _guard = self.active_year_guard()?;
        let groups = self.repos.section_repo.find_duplicate_groups()?;
        let mut summary = DedupeSummary::default();

        for group in &groups {
            let result: RepositoryResult<GroupMerge> =
                run_in_transaction(&self.repos.conn, |tx| Self::merge_group_tx(tx, group));
            match result {
                Ok(merge) => {
                    summary.groups += 1;
                    summary.removed += merge.removed;
                    summary.reassigned += merge.reassigned;
                    summary.reassigned_assignments += merge.reassigned_assignments;
                    debug!(
                        course_id = group.course_id,
                        code = %group.normalized_code,
                        removed = merge.removed,
                        reassigned = merge.reassigned,
                        "重复组已合并"
                    );
                }
                Err(e) => {
                    warn!(
                        course_id = group.course_id,
                        code = %group.normalized_code,
                        error = %e,
                        "重复组合并失败,已回滚"
                    );
                    summary.failed_units += 1;
                }
            }
        }

        info!(
            groups = summary.groups,
            removed = summary.removed,
            reassigned = summary.reassigned,
            reassigned_assignments = summary.reassigned_assignments,
            failed_units = summary.failed_units,
            "重复教学班合并完成"
        );
        self.events.publish(AllocationEvent::repair("dedupe_sections", None));
        Ok(summary)
    }

    fn merge_group_tx(tx: &Transaction<'_>, group: &DuplicateSectionGroup) -> RepositoryResult<GroupMerge> {
        let Some((&keep, rest)) = group.section_ids.split_first() else {
            return Ok(GroupMerge::default());
        };

        let reassigned = EnrollmentRepository::reassign_sections_tx(tx, rest, keep)?;
        let reassigned_assignments = SectionRepository::reassign_instructors_tx(tx, rest, keep)?;
        // 先删除再回写规范编码,避免与被删行的 normalized_code 冲突
        let removed = SectionRepository::delete_by_ids_tx(tx, rest)?;
        SectionRepository::renormalize_tx(tx, keep, &group.normalized_code)?;
        SectionRepository::recount_tx(tx, keep)?;

        Ok(GroupMerge {
            removed: count_u32(removed),
            reassigned: count_u32(reassigned),
            reassigned_assignments: count_u32(reassigned_assignments),
        })
    }

    // ==========================================
    // 教学班重置
    // ==========================================

    /// 删除范围内的教学班（单个事务）
    ///
    /// # 参数
    /// - filter: 专业/年级/学期,None 表示不限
    /// - policy: 引用这些教学班的选课记录删除或置为未分班
    #[instrument(skip(self))]
    pub fn reset_sections(
        &self,
        filter: ResetFilter,
        policy: ResetEnrollmentPolicy,
    ) -> AllocationResult<ResetSummary> {
        filter.validate().map_err(AllocationError::InvalidInput)?;
        if filter.is_unrestricted() {
            warn!("重置范围未限定,将删除全部教学班");
        }
        let _guard = self.active_year_guard()?;

        let summary = run_in_transaction(&self.repos.conn, |tx| -> RepositoryResult<ResetSummary> {
            let section_ids = SectionRepository::list_ids_by_filter_tx(tx, &filter)?;
            let assignments_deleted = SectionRepository::delete_instructors_tx(tx, &section_ids)?;
            let (enrollments_deleted, enrollments_detached) = match policy {
                ResetEnrollmentPolicy::Delete => (EnrollmentRepository::delete_by_sections_tx(tx, &section_ids)?, 0),
                ResetEnrollmentPolicy::Detach => (0, EnrollmentRepository::detach_sections_tx(tx, &section_ids)?),
            };
            let deleted = SectionRepository::delete_by_ids_tx(tx, &section_ids)?;

            Ok(ResetSummary {
                deleted: count_u32(deleted),
                enrollments_deleted: count_u32(enrollments_deleted),
                enrollments_detached: count_u32(enrollments_detached),
                assignments_deleted: count_u32(assignments_deleted),
                policy,
            })
        })?;

        info!(
            filter = ?filter,
            policy = %policy,
            deleted = summary.deleted,
            enrollments_deleted = summary.enrollments_deleted,
            enrollments_detached = summary.enrollments_detached,
            assignments_deleted = summary.assignments_deleted,
            "教学班重置完成"
        );
        self.events.publish(AllocationEvent::repair("reset_sections", None));
        Ok(summary)
    }

    // ==========================================
    // 缓存计数重算
    // ==========================================

    /// 按 enrollment 表重算全部 enrolled_count
    ///
    /// # 返回
    /// - 被修正的教学班数量
    #[instrument(skip(self))]
    pub fn recount_section_counters(&self) -> AllocationResult<usize> {
        let corrected = run_in_transaction(&self.repos.conn, |tx| SectionRepository::recount_all_tx(tx))?;
        if corrected > 0 {
            warn!(corrected, "缓存计数存在漂移,已按选课记录修正");
        } else {
            info!("缓存计数一致");
        }
        self.events.publish(AllocationEvent::repair("recount_section_counters", None));
        Ok(corrected)
    }

    /// 存在 active 学年时持有其咨询锁
    fn active_year_guard(&self) -> AllocationResult<Option<RunGuard>> {
        match self.repos.school_year_repo.find_active()? {
            Some(year) => Ok(Some(RunGuard::acquire(
                self.repos.lock_repo.clone(),
                year.school_year_id,
                self.settings.lock_ttl_secs,
            )?)),
            None => Ok(None),
        }
    }
}

fn count_u32(rows: usize) -> u32 {
    u32::try_from(rows).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection};
    use std::sync::{Arc, Mutex};

    fn setup() -> (Arc<Mutex<Connection>>, RepairOperations) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::run_migrations(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO program (program_id, code) VALUES (1, 'BSCS'), (2, 'BSIT');
            INSERT INTO school_year (school_year_id, label, is_active, semester) VALUES (1, '2026-2027', 1, '1');
            INSERT INTO course (course_id, program_id, code, year_level, semester) VALUES
                (10, 1, 'CS101', 1, '1'),
                (20, 2, 'IT101', 1, '1');
            "#,
        )
        .unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let ops = RepairOperations::new(
            AllocationRepositories::from_connection(conn.clone()),
            AllocationSettings::default(),
        );
        (conn, ops)
    }

    fn add_section(conn: &Arc<Mutex<Connection>>, section_id: i64, course_id: i64, code: &str, capacity: i32) {
        let c = conn.lock().unwrap();
        c.execute(
            "INSERT INTO section (section_id, course_id, code, normalized_code, capacity) VALUES (?1, ?2, ?3, ?3, ?4)",
            params![section_id, course_id, code, capacity],
        )
        .unwrap();
    }

    /// 直接写入 n 个学生及其选课（绕过放置器）
    fn enroll(conn: &Arc<Mutex<Connection>>, first_student: i64, n: i64, course_id: i64, section_id: Option<i64>) {
        let c = conn.lock().unwrap();
        for student_id in first_student..first_student + n {
            c.execute(
                "INSERT OR IGNORE INTO student (student_id, program_id, year_level) VALUES (?1, 1, 1)",
                params![student_id],
            )
            .unwrap();
            c.execute(
                "INSERT INTO enrollment (student_id, course_id, section_id, school_year_id) VALUES (?1, ?2, ?3, 1)",
                params![student_id, course_id, section_id],
            )
            .unwrap();
        }
    }

    fn scalar(conn: &Arc<Mutex<Connection>>, sql: &str) -> i64 {
        conn.lock().unwrap().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_rebalance_moves_newest_excess_into_new_section() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 30);
        enroll(&conn, 1, 40, 10, Some(1));

        let summary = ops.rebalance_overcapacity(1).unwrap();

        assert_eq!(summary.touched, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.moved, 10);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM enrollment"), 40);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 1"), 30);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE code = 'B'"), 10);
        // 最新的 10 条被迁出
        assert_eq!(
            scalar(&conn, "SELECT MIN(student_id) FROM enrollment WHERE section_id != 1"),
            31
        );
    }

    #[test]
    fn test_rebalance_tops_up_when_existing_seats_fall_short() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 5);
        add_section(&conn, 2, 10, "B", 30);
        enroll(&conn, 1, 8, 10, Some(1));
        {
            let c = conn.lock().unwrap();
            c.execute("UPDATE section SET status = 'INACTIVE' WHERE section_id = 2", [])
                .unwrap();
        }

        // ceil(8/30)=1 已满足,但 A 只有 5 个座位 → 追加 1 个班接收 3 人；停用班不接收迁入
        let summary = ops.rebalance_overcapacity(1).unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.moved, 3);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 1"), 5);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 2"), 0);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE code = 'C'"), 3);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM enrollment"), 8);

        // 再次执行无事可做
        let again = ops.rebalance_overcapacity(1).unwrap();
        assert_eq!((again.created, again.moved), (0, 0));
    }

    #[test]
    fn test_rebalance_only_moves_rows_of_the_given_year() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 5);
        {
            let c = conn.lock().unwrap();
            c.execute_batch(
                r#"
                INSERT INTO school_year (school_year_id, label, is_active, semester) VALUES (2, '2025-2026', 0, '2');
                INSERT INTO student (student_id, program_id, year_level) VALUES (101, 1, 1), (102, 1, 1), (103, 1, 1), (104, 1, 1), (105, 1, 1), (106, 1, 1);
                INSERT INTO enrollment (student_id, course_id, section_id, school_year_id)
                    SELECT student_id, 10, 1, 2 FROM student WHERE student_id > 100;
                "#,
            )
            .unwrap();
        }
        enroll(&conn, 1, 1, 10, Some(1));

        // 占用 7/5,但本学年只有 1 条可迁,往年记录留在原班
        let summary = ops.rebalance_overcapacity(1).unwrap();
        assert_eq!(summary.moved, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(
            scalar(&conn, "SELECT COUNT(*) FROM enrollment WHERE school_year_id = 2 AND section_id = 1"),
            6
        );
        assert_ne!(scalar(&conn, "SELECT section_id FROM enrollment WHERE student_id = 1"), 1);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 1"), 6);
    }

    #[test]
    fn test_rebalance_unknown_year() {
        let (_conn, ops) = setup();
        assert!(matches!(
            ops.rebalance_overcapacity(99),
            Err(AllocationError::NotFound { .. })
        ));
    }

    #[test]
    fn test_dedupe_keeps_lowest_id_and_moves_references() {
        let (conn, ops) = setup();
        {
            let c = conn.lock().unwrap();
            // 库外写入的未规范化编码
            c.execute_batch(
                r#"
                INSERT INTO section (section_id, course_id, code, normalized_code, capacity) VALUES
                    (5, 10, 'a ', 'a ', 30),
                    (6, 10, 'A', 'A', 30),
                    (7, 10, ' a', 'x', 30),
                    (8, 20, 'A', 'A', 30);
                INSERT INTO section_instructor (section_id, instructor_ref) VALUES (6, 'prof-1'), (7, 'prof-2');
                "#,
            )
            .unwrap();
        }
        enroll(&conn, 1, 2, 10, Some(6));
        enroll(&conn, 3, 1, 10, Some(7));

        let summary = ops.dedupe_sections().unwrap();

        assert_eq!(summary.groups, 1);
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.reassigned, 3);
        assert_eq!(summary.reassigned_assignments, 2);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM section WHERE course_id = 10"), 1);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM section WHERE course_id = 20"), 1);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 5"), 3);
        assert_eq!(
            scalar(&conn, "SELECT COUNT(*) FROM section WHERE section_id = 5 AND normalized_code = 'A'"),
            1
        );
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM section_instructor WHERE section_id = 5"), 2);

        // 再次执行无事可做
        assert_eq!(ops.dedupe_sections().unwrap().groups, 0);
    }

    #[test]
    fn test_reset_delete_policy_scoped_to_program() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 30);
        add_section(&conn, 2, 20, "A", 30);
        enroll(&conn, 1, 3, 10, Some(1));
        enroll(&conn, 4, 2, 20, Some(2));
        ops.repos.section_repo.assign_instructor(1, "prof-1", Some(1)).unwrap();

        let summary = ops
            .reset_sections(ResetFilter::from_selectors(1, 0, 0).unwrap(), ResetEnrollmentPolicy::Delete)
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.enrollments_deleted, 3);
        assert_eq!(summary.assignments_deleted, 1);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM section WHERE section_id = 2"), 1);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM enrollment"), 2);
    }

    #[test]
    fn test_reset_detach_policy_keeps_enrollments_unsectioned() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 30);
        enroll(&conn, 1, 3, 10, Some(1));

        let summary = ops
            .reset_sections(ResetFilter::default(), ResetEnrollmentPolicy::Detach)
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.enrollments_detached, 3);
        assert_eq!(summary.enrollments_deleted, 0);
        assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM enrollment WHERE section_id IS NULL"), 3);
    }

    #[test]
    fn test_recount_fixes_drift() {
        let (conn, ops) = setup();
        add_section(&conn, 1, 10, "A", 30);
        add_section(&conn, 2, 10, "B", 30);
        enroll(&conn, 1, 4, 10, Some(1));
        {
            let c = conn.lock().unwrap();
            c.execute("UPDATE section SET enrolled_count = 9 WHERE section_id = 1", [])
                .unwrap();
        }

        assert_eq!(ops.recount_section_counters().unwrap(), 1);
        assert_eq!(scalar(&conn, "SELECT enrolled_count FROM section WHERE section_id = 1"), 4);
        assert_eq!(ops.recount_section_counters().unwrap(), 0);
    }

    #[test]
    fn test_repairs_respect_year_lock() {
        let (_conn, ops) = setup();
        let _held = RunGuard::acquire(ops.repos.lock_repo.clone(), 1, 900).unwrap();
        assert!(matches!(ops.dedupe_sections(), Err(AllocationError::LockHeld { .. })));
        assert!(matches!(
            ops.rebalance_overcapacity(1),
            Err(AllocationError::LockHeld { .. })
        ));
    }
}
