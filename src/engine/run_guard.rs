// ==========================================
// 教学班分配引擎 - 运行守卫
// ==========================================
// 职责: 按学年的单写者咨询锁 + 批次边界的取消信号
// 红线: 同一学年同一时刻只有一个写入运行；第二个运行立即失败（LockHeld）
// 约束: 锁超过 TTL 未刷新视为失效,可被接管；运行在每个批次边界刷新
// ==========================================

use crate::engine::error::{AllocationError, AllocationResult};
use crate::repository::allocation_lock_repo::AllocationLockRepository;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 学年锁键
pub fn school_year_lock_key(school_year_id: i64) -> String {
    format!("school_year:{}", school_year_id)
}

// ==========================================
// RunGuard - 咨询锁守卫（drop 时释放）
// ==========================================
pub struct RunGuard {
    lock_repo: Arc<AllocationLockRepository>,
    lock_key: String,
    owner_token: String,
    ttl: Duration,
    released: bool,
}

impl RunGuard {
    /// 获取学年锁
    ///
    /// # 返回
    /// - Err(LockHeld): 锁被其他运行持有且未失效
    pub fn acquire(
        lock_repo: Arc<AllocationLockRepository>,
        school_year_id: i64,
        ttl_secs: i64,
    ) -> AllocationResult<Self> {
        let mut guard = Self {
            lock_repo,
            lock_key: school_year_lock_key(school_year_id),
            owner_token: Uuid::new_v4().to_string(),
            ttl: Duration::seconds(ttl_secs.max(1)),
            released: false,
        };
        if let Err(e) = guard.refresh() {
            // 未持有,drop 时无需释放
            guard.released = true;
            return Err(e);
        }
        debug!(lock_key = %guard.lock_key, owner = %guard.owner_token, "已获取分配锁");
        Ok(guard)
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    /// 刷新持有时间；锁已被接管时返回 LockHeld
    pub fn refresh(&self) -> AllocationResult<()> {
        let now = Utc::now();
        let acquired = self
            .lock_repo
            .try_acquire(&self.lock_key, &self.owner_token, now, now - self.ttl)?;
        if !acquired {
            return Err(AllocationError::LockHeld {
                lock_key: self.lock_key.clone(),
            });
        }
        Ok(())
    }

    /// 显式释放
    pub fn release(mut self) -> AllocationResult<()> {
        self.released = true;
        self.lock_repo.release(&self.lock_key, &self.owner_token)?;
        Ok(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock_repo.release(&self.lock_key, &self.owner_token) {
            warn!(lock_key = %self.lock_key, error = %e, "释放分配锁失败,等待 TTL 失效");
        }
    }
}

// ==========================================
// CancelToken - 取消信号
// ==========================================
// 只在批次边界检查,取消点与提交点一致
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 清除取消标记（续跑前调用）
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
