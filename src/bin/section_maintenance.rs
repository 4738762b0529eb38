// Maintenance utility: run allocation and repair operations against the allocation DB.
//
// Usage:
//   cargo run --bin section_maintenance -- bulk
//   cargo run --bin section_maintenance -- resume <run_id>
//   cargo run --bin section_maintenance -- rebalance [school_year_id]
//   cargo run --bin section_maintenance -- dedupe
//   cargo run --bin section_maintenance -- recount
//   cargo run --bin section_maintenance -- reset <program_id> <year_level> <semester> [delete|detach]
//   cargo run --bin section_maintenance -- unsectioned [school_year_id]
//
// DB path: SECTION_ALLOC_DB_PATH, else the user data dir. Summaries are printed as JSON.
// Ctrl-C cancels a running allocation at the next chunk boundary.

use anyhow::{anyhow, bail, Context};
use section_allocator::api::AllocationApi;
use section_allocator::config::ConfigManager;
use section_allocator::db::{default_db_path, open_and_migrate};
use section_allocator::domain::allocation::ResetFilter;
use section_allocator::domain::types::ResetEnrollmentPolicy;
use section_allocator::logging;
use section_allocator::repository::SchoolYearRepository;
use serde::Serialize;
use std::sync::{Arc, Mutex};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(raw: Option<String>, name: &str) -> anyhow::Result<T> {
    let raw = raw.ok_or_else(|| anyhow!("missing argument: {}", name))?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("invalid {}: {}", name, raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "help".to_string());

    let db_path = default_db_path();
    tracing::info!(db_path = %db_path, command = %command, "section_maintenance");

    let conn = open_and_migrate(&db_path).with_context(|| format!("open db: {}", db_path))?;
    let conn = Arc::new(Mutex::new(conn));
    let config = ConfigManager::from_connection(conn.clone()).map_err(|e| anyhow!(e.to_string()))?;
    if let Ok(snapshot) = config.get_config_snapshot() {
        tracing::info!(config = %snapshot, "配置快照");
    }
    let api = AllocationApi::new(conn.clone(), Arc::new(config));

    let cancel = api.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号,将在下一个批次边界停止");
            cancel.cancel();
        }
    });

    let active_year_id = || -> anyhow::Result<i64> {
        SchoolYearRepository::new(conn.clone())
            .find_active()?
            .map(|y| y.school_year_id)
            .ok_or_else(|| anyhow!("no active school year"))
    };

    match command.as_str() {
        "bulk" => print_json(&api.run_bulk_for_active_year().await?)?,
        "resume" => {
            let run_id: String = parse_arg(args.next(), "run_id")?;
            print_json(&api.resume_run(&run_id).await?)?;
        }
        "rebalance" => {
            let school_year_id = match args.next() {
                Some(raw) => parse_arg(Some(raw), "school_year_id")?,
                None => active_year_id()?,
            };
            print_json(&api.rebalance_overcapacity(school_year_id).await?)?;
        }
        "dedupe" => print_json(&api.dedupe_sections().await?)?,
        "recount" => {
            let corrected = api.recount_section_counters().await?;
            print_json(&serde_json::json!({ "corrected": corrected }))?;
        }
        "reset" => {
            let program_id: i64 = parse_arg(args.next(), "program_id")?;
            let year_level: i32 = parse_arg(args.next(), "year_level")?;
            let semester: i32 = parse_arg(args.next(), "semester")?;
            let filter = ResetFilter::from_selectors(program_id, year_level, semester).map_err(|e| anyhow!(e))?;
            let summary = match args.next() {
                Some(raw) => {
                    let policy = ResetEnrollmentPolicy::from_config_str(&raw)
                        .ok_or_else(|| anyhow!("invalid policy: {}", raw))?;
                    api.reset_sections_using(filter, policy).await?
                }
                None => api.reset_sections(filter).await?,
            };
            print_json(&summary)?;
        }
        "unsectioned" => {
            let school_year_id = match args.next() {
                Some(raw) => parse_arg(Some(raw), "school_year_id")?,
                None => active_year_id()?,
            };
            print_json(&api.list_unsectioned(school_year_id).await?)?;
        }
        "help" | "-h" | "--help" => {
            println!("commands: bulk | resume <run_id> | rebalance [school_year_id] | dedupe | recount");
            println!("          reset <program_id> <year_level> <semester> [delete|detach] | unsectioned [school_year_id]");
        }
        other => bail!("unknown command: {}", other),
    }

    Ok(())
}
