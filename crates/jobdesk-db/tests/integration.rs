//! Offline unit tests for jobdesk-db pool configuration and row types.
//! These tests do not require a live database connection.

use chrono::Utc;
use jobdesk_core::{
    AppConfig, ConcurrencyPolicy, Environment, JobStatus, MisfirePolicy,
};
use jobdesk_db::{DbError, JobLogRow, JobRow, PoolConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn job_row(misfire: &str, concurrent: &str, status: &str) -> JobRow {
    JobRow {
        job_id: 7,
        job_name: "nightly report".to_string(),
        job_group: "DEFAULT".to_string(),
        invoke_target: "sample_task.no_params".to_string(),
        cron_expression: "0 0 2 * * ?".to_string(),
        misfire_policy: misfire.to_string(),
        concurrent: concurrent.to_string(),
        status: status.to_string(),
        create_by: "admin".to_string(),
        create_time: Utc::now(),
        update_by: String::new(),
        update_time: None,
        remark: String::new(),
    }
}

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        scheduler_autostart: true,
        scheduler_drain_timeout_secs: 30,
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn job_row_converts_to_definition() {
    let def = job_row("2", "0", "0").to_definition().expect("valid row");
    assert_eq!(def.job_id, 7);
    assert_eq!(def.misfire_policy, MisfirePolicy::FireOnce);
    assert_eq!(def.concurrent, ConcurrencyPolicy::Allow);
    assert_eq!(def.status, JobStatus::Enabled);
    assert!(def.is_enabled());
}

#[test]
fn job_row_with_unknown_misfire_code_loads_as_discard() {
    let def = job_row("x", "1", "1").to_definition().expect("valid row");
    assert_eq!(def.misfire_policy, MisfirePolicy::Discard);
    assert!(!def.is_enabled());
}

#[test]
fn job_row_with_unknown_status_is_rejected() {
    let err = job_row("3", "1", "5").to_definition().unwrap_err();
    assert!(
        matches!(err, DbError::InvalidRow { table: "sys_job", .. }),
        "expected InvalidRow, got: {err:?}"
    );
}

/// Compile-time smoke test: confirm that [`JobLogRow`] has all expected
/// fields with the correct types. No database required.
#[test]
fn job_log_row_has_expected_fields() {
    let row = JobLogRow {
        job_log_id: 1_i64,
        job_name: "nightly report".to_string(),
        job_group: "DEFAULT".to_string(),
        invoke_target: "sample_task.no_params".to_string(),
        job_message: "no_params executed successfully".to_string(),
        status: "0".to_string(),
        exception_info: String::new(),
        create_time: Utc::now(),
    };

    assert_eq!(row.job_log_id, 1);
    assert_eq!(row.status, "0");
    assert!(row.exception_info.is_empty());
}
