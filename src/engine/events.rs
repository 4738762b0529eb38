// ==========================================
// 教学班分配引擎 - 引擎层事件发布
// ==========================================
// 职责: 定义分配事件发布 trait,供外层（通知/监控/测试）订阅运行进度
// 约束: 发布失败只记日志,不影响已提交的数据
// ==========================================

use crate::domain::allocation::{AllocationCounters, RunCursor};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 分配事件类型
// ==========================================

/// 分配事件触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEventType {
    /// 运行开始（含续跑）
    RunStarted,
    /// 一个批次已提交
    ChunkCommitted,
    /// 运行结束（完成/取消/失败）
    RunFinished,
    /// 修复操作已提交
    RepairApplied,
}

impl AllocationEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            AllocationEventType::RunStarted => "RunStarted",
            AllocationEventType::ChunkCommitted => "ChunkCommitted",
            AllocationEventType::RunFinished => "RunFinished",
            AllocationEventType::RepairApplied => "RepairApplied",
        }
    }
}

/// 分配事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEvent {
    /// 运行ID（修复操作为 None）
    pub run_id: Option<String>,
    pub school_year_id: Option<i64>,
    pub event_type: AllocationEventType,
    /// 事件来源描述（如 "dedupe_sections"）
    pub source: Option<String>,
    /// 最近一次提交的位置
    pub cursor: Option<RunCursor>,
    /// 截至本事件的累计计数
    pub counters: Option<AllocationCounters>,
}

impl AllocationEvent {
    /// 运行进度事件
    pub fn run_progress(
        run_id: &str,
        school_year_id: i64,
        event_type: AllocationEventType,
        cursor: Option<RunCursor>,
        counters: AllocationCounters,
    ) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            school_year_id: Some(school_year_id),
            event_type,
            source: None,
            cursor,
            counters: Some(counters),
        }
    }

    /// 修复操作事件
    pub fn repair(source: &str, school_year_id: Option<i64>) -> Self {
        Self {
            run_id: None,
            school_year_id,
            event_type: AllocationEventType::RepairApplied,
            source: Some(source.to_string()),
            cursor: None,
            counters: None,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 分配事件发布者 Trait
pub trait AllocationEventPublisher: Send + Sync {
    /// 发布分配事件
    fn publish(&self, event: AllocationEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl AllocationEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: AllocationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - run_id={:?}, event_type={}",
            event.run_id,
            event.event_type.as_str()
        );
        Ok(())
    }
}

/// 可选的事件发布者包装
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn AllocationEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn AllocationEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（失败只记日志）
    pub fn publish(&self, event: AllocationEvent) {
        if let Some(publisher) = &self.inner {
            let event_type = event.event_type;
            if let Err(e) = publisher.publish(event) {
                tracing::warn!(event_type = event_type.as_str(), error = %e, "分配事件发布失败");
            }
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<AllocationEventType>>);

    impl AllocationEventPublisher for Recorder {
        fn publish(&self, event: AllocationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    struct Failing;

    impl AllocationEventPublisher for Failing {
        fn publish(&self, _event: AllocationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("down".into())
        }
    }

    #[test]
    fn test_optional_publisher_forwards_events() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let publisher = OptionalEventPublisher::with_publisher(recorder.clone());
        assert!(publisher.is_configured());

        publisher.publish(AllocationEvent::repair("dedupe_sections", None));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![AllocationEventType::RepairApplied]
        );
    }

    #[test]
    fn test_publish_failure_is_swallowed() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(Failing));
        publisher.publish(AllocationEvent::repair("reset_sections", Some(1)));
        assert!(!OptionalEventPublisher::none().is_configured());
    }
}
