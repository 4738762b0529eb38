// ==========================================
// 教学班分配引擎 - 分配咨询锁仓储
// ==========================================
// 职责: 以 lock_key 为粒度的单写者锁（跨进程,基于 allocation_lock 表）
// 约束: 获取/续占在一条 UPSERT 中完成,不做读后写
// ==========================================

use crate::repository::error::RepositoryResult;
use crate::repository::transaction::lock_conn;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 锁时间戳格式（字典序即时间序）
const LOCK_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// 锁记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub lock_key: String,
    pub owner_token: String,
    pub acquired_at: String,
}

// ==========================================
// AllocationLockRepository - 咨询锁仓储
// ==========================================
pub struct AllocationLockRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AllocationLockRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    /// 尝试获取锁
    ///
    /// 规则：
    /// 1) 无人持有 → 获取
    /// 2) 同一 owner 重入 → 刷新时间
    /// 3) 持有时间早于 stale_before → 视为失效,接管
    ///
    /// # 返回
    /// - Ok(true): 获取成功
    /// - Ok(false): 锁被其他 owner 持有
    pub fn try_acquire(
        &self,
        lock_key: &str,
        owner_token: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            INSERT INTO allocation_lock (lock_key, owner_token, acquired_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (lock_key) DO UPDATE
                SET owner_token = excluded.owner_token,
                    acquired_at = excluded.acquired_at
                WHERE allocation_lock.owner_token = excluded.owner_token
                   OR allocation_lock.acquired_at < ?4
            "#,
            params![
                lock_key,
                owner_token,
                now.format(LOCK_TS_FORMAT).to_string(),
                stale_before.format(LOCK_TS_FORMAT).to_string(),
            ],
        )?;
        Ok(rows == 1)
    }

    /// 释放锁（仅持有者可释放）
    pub fn release(&self, lock_key: &str, owner_token: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM allocation_lock WHERE lock_key = ?1 AND owner_token = ?2",
            params![lock_key, owner_token],
        )?;
        Ok(rows == 1)
    }

    /// 查询锁记录
    pub fn find(&self, lock_key: &str) -> RepositoryResult<Option<LockRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                "SELECT lock_key, owner_token, acquired_at FROM allocation_lock WHERE lock_key = ?1",
                params![lock_key],
                |row| {
                    Ok(LockRecord {
                        lock_key: row.get(0)?,
                        owner_token: row.get(1)?,
                        acquired_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
