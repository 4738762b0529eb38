// ==========================================
// 教学班分配引擎 - 批量编排器
// ==========================================
// 流程: 分配桶 → 需求估算 → 逐课程开班 → 逐课程分批放置学生
// 红线: 输入错误（缺少选择器/无 active 学年/学期未配置）在任何写入前返回
// 红线: 单元（课程开班/学生批次）失败只回滚自身,计入 failed_units,运行继续
// 约束: 课程按 code, course_id 排序,学生按 student_id 排序
// 约束: 每个批次提交时同一事务写入游标,运行可从游标续跑
// ==========================================

use crate::config::AllocationSettings;
use crate::domain::allocation::{
    AllocationCounters, AllocationRun, ProvisionSummary, RunCursor, RunKind, RunStatus, RunSummary,
};
use crate::domain::catalog::{Bucket, Course, SchoolYear};
use crate::engine::demand::{DemandEstimator, SectionFloor};
use crate::engine::error::{AllocationError, AllocationResult};
use crate::engine::events::{AllocationEvent, AllocationEventType, OptionalEventPublisher};
use crate::engine::placement::OccupancySnapshot;
use crate::engine::placement_writer::PlacementWriter;
use crate::engine::provisioner::{ProvisionOutcome, SectionProvisioner};
use crate::engine::repositories::AllocationRepositories;
use crate::engine::run_guard::{CancelToken, RunGuard};
use crate::repository::allocation_run_repo::AllocationRunRepository;
use crate::repository::transaction::run_in_transaction;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 运行结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Cancelled,
}

// ==========================================
// BulkOrchestrator - 批量编排器
// ==========================================
pub struct BulkOrchestrator {
    repos: AllocationRepositories,
    settings: AllocationSettings,
    provisioner: SectionProvisioner,
    cancel: CancelToken,
    events: OptionalEventPublisher,
}

impl BulkOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - settings: 入口处读取的配置快照
    /// - cancel: 取消信号（与调用方共享）
    pub fn new(repos: AllocationRepositories, settings: AllocationSettings, cancel: CancelToken) -> Self {
        Self {
            provisioner: SectionProvisioner::new(repos.conn.clone()),
            repos,
            settings,
            cancel,
            events: OptionalEventPublisher::none(),
        }
    }

    /// 设置事件发布者
    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    // ==========================================
    // 入口
    // ==========================================

    /// 显式为单个课程开班（零需求时是否保底一个班由 explicit_provision_floor 决定）
    #[instrument(skip(self))]
    pub fn provision_course(&self, course_id: i64, target_capacity: i32) -> AllocationResult<ProvisionSummary> {
        let estimator = DemandEstimator::new(
            target_capacity,
            SectionFloor::from_flag(self.settings.explicit_provision_floor),
        )?;
        let course = self.find_course(course_id)?;
        let active_count = self
            .repos
            .student_repo
            .count_active_for(course.program_id, course.year_level)?;
        let needed = estimator.sections_needed(active_count);

        match self.provisioner.provision(course_id, needed, estimator.target_capacity())? {
            ProvisionOutcome::Provisioned(summary) => Ok(summary),
            ProvisionOutcome::Conflict { course_id } => Ok(ProvisionSummary {
                course_id,
                sections_needed: needed,
                conflict: true,
                ..Default::default()
            }),
        }
    }

    /// 分配单个桶（专业, 年级, 学期）
    #[instrument(skip(self, bucket), fields(bucket = %bucket))]
    pub fn allocate_bucket(&self, bucket: Bucket) -> AllocationResult<RunSummary> {
        validate_bucket(&bucket)?;
        let year = self.active_school_year()?;
        self.start_run(year.school_year_id, RunKind::Bucket, vec![bucket], None)
    }

    /// 分配当前学年当前学期的全部桶（全部专业 × 年级 1..=max_year_level）
    #[instrument(skip(self))]
    pub fn run_for_active_year(&self) -> AllocationResult<RunSummary> {
        let year = self.active_school_year()?;
        let semester = year
            .semester
            .ok_or(AllocationError::SemesterNotConfigured(year.school_year_id))?;

        let programs = self.repos.program_repo.list_all()?;
        let buckets: Vec<Bucket> = programs
            .iter()
            .flat_map(|p| {
                (1..=self.settings.max_year_level).map(move |year_level| Bucket {
                    program_id: p.program_id,
                    year_level,
                    semester,
                })
            })
            .collect();

        info!(
            school_year_id = year.school_year_id,
            semester = %semester,
            programs = programs.len(),
            buckets = buckets.len(),
            "当前学年批量分配"
        );
        self.start_run(year.school_year_id, RunKind::ActiveYear, buckets, None)
    }

    /// 为新建学生开班并放入其所在桶的全部课程
    #[instrument(skip(self))]
    pub fn place_new_student(&self, student_id: i64) -> AllocationResult<RunSummary> {
        let student = self
            .repos
            .student_repo
            .find_by_id(student_id)?
            .ok_or(AllocationError::NotFound {
                entity: "学生",
                id: student_id,
            })?;
        if !student.is_active() {
            return Err(AllocationError::InvalidInput(format!(
                "学生非在读状态: student_id={}",
                student_id
            )));
        }

        let year = self.active_school_year()?;
        let semester = year
            .semester
            .ok_or(AllocationError::SemesterNotConfigured(year.school_year_id))?;
        let bucket = Bucket {
            program_id: student.program_id,
            year_level: student.year_level,
            semester,
        };
        self.start_run(year.school_year_id, RunKind::Student, vec![bucket], Some(student_id))
    }

    /// 从游标继续一次中断/失败/取消的运行
    #[instrument(skip(self))]
    pub fn resume_run(&self, run_id: &str) -> AllocationResult<RunSummary> {
        let run = self
            .repos
            .run_repo
            .find_by_id(run_id)?
            .ok_or_else(|| AllocationError::RunNotFound(run_id.to_string()))?;
        if !run.status.is_resumable() {
            return Err(AllocationError::RunNotResumable {
                run_id: run.run_id,
                status: run.status,
            });
        }

        let guard = RunGuard::acquire(
            self.repos.lock_repo.clone(),
            run.school_year_id,
            self.settings.lock_ttl_secs,
        )?;
        self.cancel.reset();
        self.repos
            .run_repo
            .update_status(&run.run_id, RunStatus::Running, &run.counters, None, None)?;

        info!(
            run_id = %run.run_id,
            previous_status = %run.status,
            cursor = ?run.cursor,
            "续跑分配运行"
        );
        self.execute(run, &guard)
    }

    // ==========================================
    // 运行
    // ==========================================

    fn start_run(
        &self,
        school_year_id: i64,
        run_kind: RunKind,
        buckets: Vec<Bucket>,
        student_id: Option<i64>,
    ) -> AllocationResult<RunSummary> {
        let guard = RunGuard::acquire(
            self.repos.lock_repo.clone(),
            school_year_id,
            self.settings.lock_ttl_secs,
        )?;
        self.cancel.reset();

        let run = AllocationRun {
            run_id: Uuid::new_v4().to_string(),
            school_year_id,
            run_kind,
            buckets,
            student_id,
            status: RunStatus::Running,
            cursor: None,
            counters: AllocationCounters::default(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            error_message: None,
        };
        self.repos.run_repo.insert(&run)?;

        info!(
            run_id = %run.run_id,
            school_year_id,
            run_kind = run_kind.to_db_str(),
            buckets = run.buckets.len(),
            batch_size = self.settings.batch_size,
            "分配运行开始"
        );
        self.execute(run, &guard)
    }

    fn execute(&self, run: AllocationRun, guard: &RunGuard) -> AllocationResult<RunSummary> {
        self.events.publish(AllocationEvent::run_progress(
            &run.run_id,
            run.school_year_id,
            AllocationEventType::RunStarted,
            run.cursor,
            run.counters,
        ));

        let mut counters = run.counters;
        let outcome = self.drive(&run, guard, &mut counters);
        let finished_at = Utc::now().to_rfc3339();

        let result = match outcome {
            Ok(end) => {
                let status = match end {
                    RunEnd::Completed => RunStatus::Completed,
                    RunEnd::Cancelled => RunStatus::Cancelled,
                };
                self.repos
                    .run_repo
                    .update_status(&run.run_id, status, &counters, Some(&finished_at), None)?;
                info!(
                    run_id = %run.run_id,
                    status = %status,
                    sections_created = counters.sections_created,
                    inserted = counters.inserted,
                    updated = counters.updated,
                    skipped = counters.skipped,
                    unsectioned = counters.unsectioned,
                    failed_units = counters.failed_units,
                    conflicts = counters.conflicts,
                    "分配运行结束"
                );
                Ok(RunSummary {
                    run_id: run.run_id.clone(),
                    school_year_id: run.school_year_id,
                    counters,
                    cancelled: end == RunEnd::Cancelled,
                })
            }
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "分配运行失败");
                let message = e.to_string();
                if let Err(status_err) = self.repos.run_repo.update_status(
                    &run.run_id,
                    RunStatus::Failed,
                    &counters,
                    Some(&finished_at),
                    Some(&message),
                ) {
                    warn!(run_id = %run.run_id, error = %status_err, "运行状态回写失败");
                }
                Err(e)
            }
        };

        self.events.publish(AllocationEvent::run_progress(
            &run.run_id,
            run.school_year_id,
            AllocationEventType::RunFinished,
            None,
            counters,
        ));
        result
    }

    /// 逐桶执行（从游标所在桶开始）
    fn drive(
        &self,
        run: &AllocationRun,
        guard: &RunGuard,
        counters: &mut AllocationCounters,
    ) -> AllocationResult<RunEnd> {
        for (bucket_index, bucket) in run.buckets.iter().enumerate() {
            let resume = match run.cursor {
                Some(c) if bucket_index < c.bucket_index => continue,
                Some(c) if bucket_index == c.bucket_index => Some(c),
                _ => None,
            };
            if self.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            if resume.is_none() {
                counters.buckets_touched += 1;
            }

            match self.allocate_one_bucket(run, bucket_index, bucket, resume, guard, counters) {
                Ok(RunEnd::Cancelled) => return Ok(RunEnd::Cancelled),
                Ok(RunEnd::Completed) => {}
                Err(e @ AllocationError::LockHeld { .. }) => return Err(e),
                Err(e) => {
                    warn!(run_id = %run.run_id, bucket = %bucket, error = %e, "分配桶失败,继续下一个桶");
                    counters.failed_units += 1;
                }
            }
        }
        Ok(RunEnd::Completed)
    }

    fn allocate_one_bucket(
        &self,
        run: &AllocationRun,
        bucket_index: usize,
        bucket: &Bucket,
        resume: Option<RunCursor>,
        guard: &RunGuard,
        counters: &mut AllocationCounters,
    ) -> AllocationResult<RunEnd> {
        let courses = self.repos.course_repo.list_for_bucket(bucket)?;
        let roster = self.roster_for(run, bucket)?;
        let active_count = self
            .repos
            .student_repo
            .count_active_for(bucket.program_id, bucket.year_level)?;

        let estimator = DemandEstimator::new(
            self.settings.default_target_capacity,
            SectionFloor::from_flag(self.settings.bulk_provision_floor),
        )?;
        let needed = estimator.sections_needed(active_count);

        debug!(
            bucket = %bucket,
            courses = courses.len(),
            roster = roster.len(),
            active_count,
            sections_needed = needed,
            "处理分配桶"
        );

        let resume_course = resume.and_then(|c| c.course_id);
        let start = resume_course
            .and_then(|cid| courses.iter().position(|c| c.course_id == cid))
            .unwrap_or(0);

        for course in courses.iter().skip(start) {
            let last_student = match resume {
                Some(c) if c.course_id == Some(course.course_id) => c.last_student_id,
                _ => None,
            };
            if resume_course != Some(course.course_id) {
                counters.courses_touched += 1;
            }

            // 1) 开班（独立事务）
            match self
                .provisioner
                .provision(course.course_id, needed, estimator.target_capacity())
            {
                Ok(ProvisionOutcome::Provisioned(summary)) => {
                    counters.sections_created += summary.created;
                }
                Ok(ProvisionOutcome::Conflict { .. }) => counters.conflicts += 1,
                Err(e) => {
                    warn!(course_id = course.course_id, error = %e, "课程开班失败,已回滚");
                    counters.failed_units += 1;
                }
            }
            guard.refresh()?;

            // 2) 分批放置
            let pending: Vec<i64> = roster
                .iter()
                .copied()
                .filter(|id| last_student.map_or(true, |last| *id > last))
                .collect();
            if self.place_course(run, bucket_index, course, &pending, guard, counters)? == RunEnd::Cancelled {
                return Ok(RunEnd::Cancelled);
            }
        }
        Ok(RunEnd::Completed)
    }

    /// 分批放置一个课程的学生
    fn place_course(
        &self,
        run: &AllocationRun,
        bucket_index: usize,
        course: &Course,
        student_ids: &[i64],
        guard: &RunGuard,
        counters: &mut AllocationCounters,
    ) -> AllocationResult<RunEnd> {
        if student_ids.is_empty() {
            return Ok(RunEnd::Completed);
        }

        let mut snapshot = match self.load_snapshot(course.course_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(course_id = course.course_id, error = %e, "读取教学班快照失败,跳过课程");
                counters.failed_units += 1;
                return Ok(RunEnd::Completed);
            }
        };

        for chunk in student_ids.chunks(self.settings.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            guard.refresh()?;

            let cursor = RunCursor {
                bucket_index,
                course_id: Some(course.course_id),
                last_student_id: chunk.last().copied(),
            };
            let base = *counters;
            let result: AllocationResult<AllocationCounters> = run_in_transaction(&self.repos.conn, |tx| {
                let chunk_counters =
                    PlacementWriter::place_chunk_tx(tx, &mut snapshot, chunk, run.school_year_id)?;
                let mut next = base;
                next.merge(&chunk_counters);
                AllocationRunRepository::save_progress_tx(tx, &run.run_id, &cursor, &next)?;
                Ok(chunk_counters)
            });

            match result {
                Ok(chunk_counters) => {
                    counters.merge(&chunk_counters);
                    debug!(
                        course_id = course.course_id,
                        last_student_id = ?cursor.last_student_id,
                        inserted = chunk_counters.inserted,
                        updated = chunk_counters.updated,
                        unsectioned = chunk_counters.unsectioned,
                        "批次已提交"
                    );
                    self.events.publish(AllocationEvent::run_progress(
                        &run.run_id,
                        run.school_year_id,
                        AllocationEventType::ChunkCommitted,
                        Some(cursor),
                        *counters,
                    ));
                }
                Err(e) => {
                    warn!(
                        course_id = course.course_id,
                        first_student_id = ?chunk.first(),
                        last_student_id = ?chunk.last(),
                        error = %e,
                        "批次失败,已回滚"
                    );
                    counters.failed_units += 1;
                    // 回滚后内存快照与数据库不一致,重新读取
                    snapshot = match self.load_snapshot(course.course_id) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(course_id = course.course_id, error = %e, "重新读取教学班快照失败,跳过课程剩余学生");
                            counters.failed_units += 1;
                            break;
                        }
                    };
                }
            }
        }
        Ok(RunEnd::Completed)
    }

    // ==========================================
    // 辅助
    // ==========================================

    /// 本次运行在某个桶要放置的学生（按ID升序）
    fn roster_for(&self, run: &AllocationRun, bucket: &Bucket) -> AllocationResult<Vec<i64>> {
        match run.student_id {
            Some(student_id) => {
                let student = self.repos.student_repo.find_by_id(student_id)?;
                Ok(student
                    .filter(|s| {
                        s.is_active()
                            && s.program_id == bucket.program_id
                            && s.year_level == bucket.year_level
                    })
                    .map(|s| vec![s.student_id])
                    .unwrap_or_default())
            }
            None => Ok(self
                .repos
                .student_repo
                .list_active_for(bucket.program_id, bucket.year_level, None)?
                .into_iter()
                .map(|s| s.student_id)
                .collect()),
        }
    }

    fn load_snapshot(&self, course_id: i64) -> AllocationResult<OccupancySnapshot> {
        let sections = self.repos.section_repo.list_by_course(course_id)?;
        Ok(OccupancySnapshot::from_sections(course_id, &sections))
    }

    fn find_course(&self, course_id: i64) -> AllocationResult<Course> {
        self.repos
            .course_repo
            .find_by_id(course_id)?
            .ok_or(AllocationError::NotFound {
                entity: "课程",
                id: course_id,
            })
    }

    fn active_school_year(&self) -> AllocationResult<SchoolYear> {
        self.repos
            .school_year_repo
            .find_active()?
            .ok_or(AllocationError::NoActiveSchoolYear)
    }
}

/// 校验分配桶选择器
fn validate_bucket(bucket: &Bucket) -> AllocationResult<()> {
    if bucket.program_id <= 0 {
        return Err(AllocationError::InvalidInput(format!(
            "缺少专业选择器: program_id={}",
            bucket.program_id
        )));
    }
    if bucket.year_level < 1 {
        return Err(AllocationError::InvalidInput(format!(
            "缺少年级选择器: year_level={}",
            bucket.year_level
        )));
    }
    Ok(())
}
