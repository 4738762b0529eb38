// ==========================================
// 教学班分配引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::allocation_config_trait::AllocationConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::ResetEnrollmentPolicy;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取正整数配置,非法值回退默认值
    fn get_positive_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => {
                warn!(key = key, value = %raw, default = %default, "配置值无效,使用默认值");
                Ok(default)
            }
        }
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(key, if default { "1" } else { "0" })?;
        Ok(match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => true,
            "0" | "false" | "no" | "n" => false,
            _ => default,
        })
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 运行开始时写入日志,便于排查某次运行使用的口径
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key"
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }
}

// ==========================================
// AllocationConfigReader 实现
// ==========================================
#[async_trait]
impl AllocationConfigReader for ConfigManager {
    async fn get_default_target_capacity(&self) -> Result<i32, Box<dyn Error>> {
        self.get_positive_or_default(config_keys::DEFAULT_TARGET_CAPACITY, 30)
    }

    async fn get_explicit_provision_floor(&self) -> Result<bool, Box<dyn Error>> {
        self.get_bool_or_default(config_keys::EXPLICIT_PROVISION_FLOOR, true)
    }

    async fn get_bulk_provision_floor(&self) -> Result<bool, Box<dyn Error>> {
        self.get_bool_or_default(config_keys::BULK_PROVISION_FLOOR, false)
    }

    async fn get_max_year_level(&self) -> Result<i32, Box<dyn Error>> {
        self.get_positive_or_default(config_keys::MAX_YEAR_LEVEL, 3)
    }

    async fn get_allocation_batch_size(&self) -> Result<usize, Box<dyn Error>> {
        self.get_positive_or_default(config_keys::ALLOCATION_BATCH_SIZE, 200)
    }

    async fn get_allocation_lock_ttl_secs(&self) -> Result<i64, Box<dyn Error>> {
        self.get_positive_or_default(config_keys::ALLOCATION_LOCK_TTL_SECS, 900)
    }

    async fn get_reset_enrollment_policy(&self) -> Result<ResetEnrollmentPolicy, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::RESET_ENROLLMENT_POLICY, "DELETE")?;
        Ok(ResetEnrollmentPolicy::from_config_str(&value).unwrap_or(ResetEnrollmentPolicy::Delete))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 开班
    pub const DEFAULT_TARGET_CAPACITY: &str = "default_target_capacity";
    pub const EXPLICIT_PROVISION_FLOOR: &str = "explicit_provision_floor";
    pub const BULK_PROVISION_FLOOR: &str = "bulk_provision_floor";

    // 批量运行
    pub const MAX_YEAR_LEVEL: &str = "max_year_level";
    pub const ALLOCATION_BATCH_SIZE: &str = "allocation_batch_size";
    pub const ALLOCATION_LOCK_TTL_SECS: &str = "allocation_lock_ttl_secs";

    // 修复
    pub const RESET_ENROLLMENT_POLICY: &str = "reset_enrollment_policy"; // DELETE | DETACH
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::allocation_config_trait::AllocationSettings;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::run_migrations(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_keys_absent() {
        let manager = setup();
        let settings = AllocationSettings::load(&manager).await.unwrap();
        assert_eq!(settings, AllocationSettings::default());
    }

    #[tokio::test]
    async fn test_overrides_and_invalid_values() {
        let manager = setup();
        manager.set_global_config_value(config_keys::DEFAULT_TARGET_CAPACITY, "25").unwrap();
        manager.set_global_config_value(config_keys::ALLOCATION_BATCH_SIZE, "0").unwrap();
        manager.set_global_config_value(config_keys::BULK_PROVISION_FLOOR, "true").unwrap();
        manager.set_global_config_value(config_keys::RESET_ENROLLMENT_POLICY, "detach").unwrap();

        let settings = AllocationSettings::load(&manager).await.unwrap();
        assert_eq!(settings.default_target_capacity, 25);
        assert_eq!(settings.batch_size, 200);
        assert!(settings.bulk_provision_floor);
        assert_eq!(settings.reset_enrollment_policy, ResetEnrollmentPolicy::Detach);

        // 覆写
        manager.set_global_config_value(config_keys::DEFAULT_TARGET_CAPACITY, "40").unwrap();
        assert_eq!(manager.get_default_target_capacity().await.unwrap(), 40);

        let snapshot = manager.get_config_snapshot().unwrap();
        assert!(snapshot.contains("default_target_capacity"));
    }
}
