// ==========================================
// 教学班分配引擎 - SQLite 连接初始化与迁移
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - schema 只由迁移决定，调用方不探测列是否存在
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// v1: 主数据 + 教学班 + 选课 + 配置 + 运行控制
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS program (
    program_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS school_year (
    school_year_id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 0,
    semester TEXT CHECK (semester IS NULL OR semester IN ('1', '2', 'SUMMER'))
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_school_year_active
    ON school_year(is_active) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS course (
    course_id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL REFERENCES program(program_id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    year_level INTEGER NOT NULL CHECK (year_level >= 1),
    semester TEXT NOT NULL CHECK (semester IN ('1', '2', 'SUMMER'))
);
CREATE INDEX IF NOT EXISTS ix_course_bucket ON course(program_id, year_level, semester);

CREATE TABLE IF NOT EXISTS student (
    student_id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL REFERENCES program(program_id),
    year_level INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'INACTIVE')),
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    email TEXT
);
CREATE INDEX IF NOT EXISTS ix_student_roster ON student(program_id, year_level, status);

CREATE TABLE IF NOT EXISTS section (
    section_id INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id INTEGER NOT NULL REFERENCES course(course_id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    normalized_code TEXT NOT NULL,
    capacity INTEGER NOT NULL CHECK (capacity > 0),
    enrolled_count INTEGER NOT NULL DEFAULT 0 CHECK (enrolled_count >= 0),
    status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'INACTIVE')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (course_id, normalized_code)
);

CREATE TABLE IF NOT EXISTS section_instructor (
    assignment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    section_id INTEGER NOT NULL REFERENCES section(section_id) ON DELETE CASCADE,
    instructor_ref TEXT NOT NULL,
    school_year_id INTEGER REFERENCES school_year(school_year_id)
);
CREATE INDEX IF NOT EXISTS ix_section_instructor_section ON section_instructor(section_id);

-- section_id 不设 ON DELETE 动作: 删除教学班前必须显式处理选课记录
CREATE TABLE IF NOT EXISTS enrollment (
    enrollment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL REFERENCES student(student_id) ON DELETE CASCADE,
    course_id INTEGER NOT NULL REFERENCES course(course_id) ON DELETE CASCADE,
    section_id INTEGER REFERENCES section(section_id),
    school_year_id INTEGER NOT NULL REFERENCES school_year(school_year_id),
    enrolled_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (student_id, course_id, school_year_id)
);
CREATE INDEX IF NOT EXISTS ix_enrollment_section ON enrollment(section_id);
CREATE INDEX IF NOT EXISTS ix_enrollment_course_year ON enrollment(course_id, school_year_id);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS allocation_lock (
    lock_key TEXT PRIMARY KEY,
    owner_token TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS allocation_run (
    run_id TEXT PRIMARY KEY,
    school_year_id INTEGER NOT NULL,
    run_kind TEXT NOT NULL,
    scope_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'RUNNING',
    cursor_json TEXT,
    counters_json TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    finished_at TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS ix_allocation_run_year ON allocation_run(school_year_id, status);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、应用 PRAGMA 并执行迁移
pub fn open_and_migrate(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 执行未应用的迁移（幂等）
///
/// # 返回
/// - Ok(version): 迁移后的 schema_version
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<i64> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let current = read_schema_version(conn)?.unwrap_or(0);
    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(current);
    }

    let migrations: [(i64, &str); 1] = [(1, MIGRATION_V1)];

    let tx = conn.unchecked_transaction()?;
    for (version, sql) in migrations.iter().filter(|(v, _)| *v > current) {
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        info!(version = *version, "schema 迁移已应用");
    }
    tx.commit()?;

    Ok(CURRENT_SCHEMA_VERSION)
}

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "SECTION_ALLOC_DB_PATH";

/// 默认数据库路径
///
/// 优先级: SECTION_ALLOC_DB_PATH → 用户数据目录 → 当前目录
pub fn default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./section_allocator.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("section-allocator");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("section_allocator.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_migrations_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), None);
        assert_eq!(run_migrations(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(run_migrations(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('section', 'enrollment', 'allocation_run')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_only_one_active_school_year() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute("INSERT INTO school_year (label, is_active) VALUES ('2025-2026', 1)", [])
            .unwrap();
        let second = conn.execute("INSERT INTO school_year (label, is_active) VALUES ('2026-2027', 1)", []);
        assert!(second.is_err());
    }
}
