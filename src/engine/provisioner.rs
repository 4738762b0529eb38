// ==========================================
// 教学班分配引擎 - 开班器
// ==========================================
// 职责: 为课程补齐缺少的教学班,不改动已有教学班
// 规则: to_create = max(0, sections_needed - 当前 ACTIVE 教学班数)
// 规则: 第 i 个新班以 (ACTIVE 数 + i) 为起始序号生成编码,跳过课程下全部已用编码
// 红线: 一个课程的开班在一个事务内完成；唯一约束冲突回滚本课程,不影响其他课程
// ==========================================

use crate::domain::allocation::ProvisionSummary;
use crate::domain::section::NewSection;
use crate::engine::error::AllocationResult;
use crate::engine::section_code::{next_available_code, normalize_code};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::section_repo::SectionRepository;
use crate::repository::transaction::run_in_transaction;
use rusqlite::{Connection, Transaction};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// 单课程开班结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Provisioned(ProvisionSummary),
    Conflict { course_id: i64 }, // 并发开班,本课程已回滚
}

// ==========================================
// SectionProvisioner - 开班器
// ==========================================
pub struct SectionProvisioner {
    conn: Arc<Mutex<Connection>>,
}

impl SectionProvisioner {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 为课程补齐教学班（独立事务）
    ///
    /// # 参数
    /// - sections_needed: 需求估算结果
    /// - capacity: 新建教学班的容量
    ///
    /// # 返回
    /// - Ok(Provisioned): 已提交（可能创建 0 个）
    /// - Ok(Conflict): 唯一约束冲突,已回滚
    /// - Err: 其他数据库错误,已回滚
    #[instrument(skip(self))]
    pub fn provision(
        &self,
        course_id: i64,
        sections_needed: u32,
        capacity: i32,
    ) -> AllocationResult<ProvisionOutcome> {
        let result: RepositoryResult<ProvisionSummary> = run_in_transaction(&self.conn, |tx| {
            Self::provision_tx(tx, course_id, sections_needed, capacity)
        });

        match result {
            Ok(summary) => {
                if summary.created > 0 {
                    info!(
                        course_id,
                        created = summary.created,
                        codes = ?summary.created_codes,
                        "教学班已补齐"
                    );
                }
                Ok(ProvisionOutcome::Provisioned(summary))
            }
            Err(e) if e.is_unique_violation() => {
                warn!(course_id, error = %e, "开班遇到并发写入,本课程已回滚");
                Ok(ProvisionOutcome::Conflict { course_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 事务内为课程补齐教学班
    ///
    /// 说明：已用编码取课程下全部教学班（含停用）重新规范化后的值
    pub fn provision_tx(
        tx: &Transaction<'_>,
        course_id: i64,
        sections_needed: u32,
        capacity: i32,
    ) -> RepositoryResult<ProvisionSummary> {
        if capacity <= 0 {
            return Err(RepositoryError::FieldValueError {
                field: "capacity".to_string(),
                message: format!("必须为正数: {}", capacity),
            });
        }

        let sections = SectionRepository::list_by_course_tx(tx, course_id)?;
        let active = sections.iter().filter(|s| s.is_active()).count();
        let active = u32::try_from(active).unwrap_or(u32::MAX);

        let mut used: HashSet<String> = sections
            .iter()
            .flat_map(|s| [normalize_code(&s.code), s.normalized_code.clone()])
            .collect();

        let to_create = sections_needed.saturating_sub(active);
        let mut created_codes = Vec::with_capacity(to_create as usize);
        for i in 0..to_create {
            let seed = (active + i) as usize;
            let (code, _) = next_available_code(&used, seed);
            SectionRepository::insert_tx(
                tx,
                &NewSection {
                    course_id,
                    code: code.clone(),
                    capacity,
                },
            )?;
            used.insert(code.clone());
            created_codes.push(code);
        }

        Ok(ProvisionSummary {
            course_id,
            sections_needed,
            existing: active,
            created: to_create,
            created_codes,
            conflict: false,
        })
    }
}
