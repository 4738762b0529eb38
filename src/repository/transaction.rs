// ==========================================
// 教学班分配引擎 - 事务管理
// ==========================================
// 职责: 在共享连接上执行一个原子单元（课程/批次/合并组）
// 红线: 闭包内只能调用 *_tx 关联函数，不得再次 lock 同一连接（std Mutex 不可重入）
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

/// 获取共享连接
pub fn lock_conn(conn: &Arc<Mutex<Connection>>) -> RepositoryResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| RepositoryError::LockError(e.to_string()))
}

/// 在一个写事务中执行闭包
///
/// 说明：
/// - 使用 IMMEDIATE 事务，开始即占写锁，避免读后写升级时的 busy 冲突
/// - 闭包返回 Err 时事务随 drop 回滚
pub fn run_in_transaction<T, E, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = lock_conn(conn)?;
    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(RepositoryError::from)?;

    let value = f(&tx)?;

    tx.commit().map_err(RepositoryError::from)?;
    Ok(value)
}
