// ==========================================
// 分配 API 集成测试
// ==========================================
// 测试范围: 开班 → 单桶分配 → 当前学年批量分配 → 修复
// 数据库: 临时文件库（与生产相同的迁移）
// ==========================================

mod helpers;

use helpers::mock_config::MockConfig;
use section_allocator::api::{AllocationApi, ApiError};
use section_allocator::domain::allocation::ResetFilter;
use std::sync::Arc;
use test_helpers::*;

fn setup(config: MockConfig) -> (tempfile::NamedTempFile, String, AllocationApi<MockConfig>) {
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    seed_active_year(&conn, 1);
    seed_program(&conn, 1, "BSCS");
    seed_program(&conn, 2, "BSIT");
    let api = AllocationApi::new(conn, Arc::new(config));
    (temp_file, db_path, api)
}

// ==========================================
// 场景1: 45 名学生 / 容量 30 → A、B 两个班,23/22
// ==========================================

#[tokio::test]
async fn test_scenario_45_students_split_across_two_sections() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 45);

    let summary = api.allocate_bucket(1, 1, 1).await.unwrap();

    assert_eq!(summary.counters.sections_created, 2);
    assert_eq!(summary.counters.inserted, 45);
    assert_eq!(summary.counters.unsectioned, 0);
    assert_eq!(
        section_occupancy(&conn, 10),
        vec![("A".to_string(), 23), ("B".to_string(), 22)]
    );
    assert!(api.list_unsectioned(1).await.unwrap().is_empty());
}

// ==========================================
// 场景2: 开班幂等,61 / 30 → 3 个班
// ==========================================

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 61);

    let first = api.provision_sections(10, 30).await.unwrap();
    assert_eq!(first.sections_needed, 3);
    assert_eq!(first.created, 3);
    assert_eq!(first.created_codes, vec!["A", "B", "C"]);

    let second = api.provision_sections(10, 30).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM section WHERE course_id = 10"), 3);

    assert!(matches!(
        api.provision_sections(10, 0).await,
        Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
        api.provision_sections(404, 30).await,
        Err(ApiError::NotFound(_))
    ));
}

// ==========================================
// 场景3: 重复运行——选课唯一、占用单调不减
// ==========================================

#[tokio::test]
async fn test_rerun_keeps_enrollments_unique_and_occupancy_monotonic() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_course(&conn, 11, 1, "CS102", 1, "1");
    seed_students(&conn, 1, 1, 1, 20);

    api.run_bulk_for_active_year().await.unwrap();
    let before = section_occupancy(&conn, 10);

    // 新增学生后再次运行
    seed_students(&conn, 1, 1, 21, 5);
    let second = api.run_bulk_for_active_year().await.unwrap();
    let after = section_occupancy(&conn, 10);

    assert_eq!(second.counters.inserted, 10);
    assert_eq!(second.counters.skipped, 40);
    for ((code_before, n_before), (code_after, n_after)) in before.iter().zip(after.iter()) {
        assert_eq!(code_before, code_after);
        assert!(n_after >= n_before);
    }
    assert_eq!(
        query_i64(
            &conn,
            "SELECT COUNT(*) FROM (SELECT student_id, course_id, school_year_id FROM enrollment GROUP BY 1, 2, 3 HAVING COUNT(*) > 1)"
        ),
        0
    );
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM enrollment"), 50);
}

// ==========================================
// 场景4: 输入错误
// ==========================================

#[tokio::test]
async fn test_input_errors_are_reported_before_writes() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 3);

    assert!(matches!(api.allocate_bucket(1, 1, 0).await, Err(ApiError::InvalidInput(_))));
    assert!(matches!(api.allocate_bucket(0, 1, 1).await, Err(ApiError::InvalidInput(_))));
    assert!(matches!(api.resume_run("  ").await, Err(ApiError::InvalidInput(_))));
    assert!(matches!(api.resume_run("no-such-run").await, Err(ApiError::NotFound(_))));

    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM section"), 0);
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM allocation_run"), 0);
}

// ==========================================
// 场景5: 重置 {Program=P, 0, 0} 只删除 P 的教学班
// ==========================================

#[tokio::test]
async fn test_reset_scoped_to_program() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_course(&conn, 20, 2, "IT101", 1, "1");
    seed_course(&conn, 21, 2, "IT201", 2, "2");
    seed_students(&conn, 1, 1, 1, 5);
    seed_students(&conn, 2, 1, 100, 5);

    api.provision_sections(10, 30).await.unwrap();
    api.provision_sections(20, 30).await.unwrap();
    api.provision_sections(21, 30).await.unwrap();
    api.allocate_bucket(2, 1, 1).await.unwrap();

    let summary = api.reset_sections(ResetFilter::from_selectors(2, 0, 0).unwrap()).await.unwrap();

    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.enrollments_deleted, 5);
    assert_eq!(section_occupancy(&conn, 10).len(), 1);
    assert!(section_occupancy(&conn, 20).is_empty());
    assert!(section_occupancy(&conn, 21).is_empty());
}

#[tokio::test]
async fn test_reset_detach_policy_from_config() {
    let (_tmp, db_path, api) = setup(MockConfig::detach_on_reset());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 4);
    api.allocate_bucket(1, 1, 1).await.unwrap();

    let summary = api.reset_sections(ResetFilter::from_selectors(0, 1, 1).unwrap()).await.unwrap();
    assert_eq!(summary.enrollments_detached, 4);
    assert_eq!(api.list_unsectioned(1).await.unwrap().len(), 4);

    // 重新分配把未分班记录挂回新班
    let rerun = api.allocate_bucket(1, 1, 1).await.unwrap();
    assert_eq!(rerun.counters.sections_created, 1);
    assert_eq!(rerun.counters.updated, 4);
    assert_eq!(section_occupancy(&conn, 10), vec![("A".to_string(), 4)]);
}

#[tokio::test]
async fn test_reset_rejects_out_of_range_selectors_without_deleting() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_course(&conn, 11, 1, "CS102", 1, "2");
    api.provision_sections(10, 30).await.unwrap();
    api.provision_sections(11, 30).await.unwrap();

    for (program_id, year_level, semester) in [(1, 1, 4), (1, 1, -1), (-1, 1, 1), (1, -1, 0)] {
        assert!(matches!(
            api.reset_sections_by_selectors(program_id, year_level, semester).await,
            Err(ApiError::InvalidInput(_))
        ));
    }
    let direct = ResetFilter {
        program_id: Some(-1),
        ..Default::default()
    };
    assert!(matches!(api.reset_sections(direct).await, Err(ApiError::InvalidInput(_))));
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM section"), 2);

    // 合法选择器只删除第一学期
    let summary = api.reset_sections_by_selectors(1, 1, 1).await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(section_occupancy(&conn, 11).len(), 1);
}

// ==========================================
// 场景6: 合并重复教学班
// ==========================================

#[tokio::test]
async fn test_dedupe_merges_and_reports() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 4);
    {
        let c = conn.lock().unwrap();
        c.execute_batch(
            r#"
            INSERT INTO section (section_id, course_id, code, normalized_code, capacity, enrolled_count)
                VALUES (1, 10, 'A', 'A', 30, 2), (2, 10, 'a', 'a', 30, 2);
            INSERT INTO enrollment (student_id, course_id, section_id, school_year_id) VALUES
                (1, 10, 1, 1), (2, 10, 1, 1), (3, 10, 2, 1), (4, 10, 2, 1);
            "#,
        )
        .unwrap();
    }

    let summary = api.dedupe_sections().await.unwrap();

    assert_eq!(summary.groups, 1);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.reassigned, 2);
    assert_eq!(section_occupancy(&conn, 10), vec![("A".to_string(), 4)]);
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM enrollment WHERE section_id = 1"), 4);
}

// ==========================================
// 场景7: 超容重平衡与计数重算
// ==========================================

#[tokio::test]
async fn test_rebalance_then_recount_is_clean() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_students(&conn, 1, 1, 1, 35);
    {
        let c = conn.lock().unwrap();
        c.execute(
            "INSERT INTO section (section_id, course_id, code, normalized_code, capacity, enrolled_count) VALUES (1, 10, 'A', 'A', 30, 0)",
            [],
        )
        .unwrap();
        c.execute(
            "INSERT INTO enrollment (student_id, course_id, section_id, school_year_id) SELECT student_id, 10, 1, 1 FROM student",
            [],
        )
        .unwrap();
    }

    let summary = api.rebalance_overcapacity(1).await.unwrap();
    assert_eq!(summary.touched, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.moved, 5);
    assert_eq!(
        section_occupancy(&conn, 10),
        vec![("A".to_string(), 30), ("B".to_string(), 5)]
    );

    assert_eq!(api.recount_section_counters().await.unwrap(), 0);
    assert!(matches!(
        api.rebalance_overcapacity(42).await,
        Err(ApiError::NotFound(_))
    ));
}

// ==========================================
// 场景8: 新建学生即时放置
// ==========================================

#[tokio::test]
async fn test_place_new_student_after_bulk() {
    let (_tmp, db_path, api) = setup(MockConfig::default());
    let conn = open_shared(&db_path);
    seed_course(&conn, 10, 1, "CS101", 1, "1");
    seed_course(&conn, 11, 1, "CS102", 1, "1");
    seed_students(&conn, 1, 1, 1, 30);
    api.run_bulk_for_active_year().await.unwrap();

    // 第 31 名学生需要第二个班
    seed_students(&conn, 1, 1, 31, 1);
    let summary = api.place_new_student(31).await.unwrap();

    assert_eq!(summary.counters.sections_created, 2);
    assert_eq!(summary.counters.inserted, 2);
    assert_eq!(
        section_occupancy(&conn, 10),
        vec![("A".to_string(), 30), ("B".to_string(), 1)]
    );
    assert_eq!(api.list_runs(1).await.unwrap().len(), 2);
}
