//! Post-restore smoke checks
//!
//! Three cheap checks: a trivial SQL query, an optional HTTP health
//! endpoint and presence of key files. Results are recorded, never fatal.

use std::time::Duration;

use serde::Serialize;

use super::database::client_command;
use crate::audit::OperationLog;
use crate::engine::Engine;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one check
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// All check outcomes of one restore
#[derive(Debug, Clone, Serialize, Default)]
pub struct SmokeReport {
    pub checks: Vec<CheckResult>,
}

impl SmokeReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

pub fn run_smoke_checks(engine: &Engine, log: &OperationLog) -> SmokeReport {
    let mut report = SmokeReport::default();
    report.checks.push(database_check(engine, log));
    if let Some(url) = &engine.settings.smoke.health_url {
        report.checks.push(health_check(url));
    }
    for path in &engine.settings.smoke.key_files {
        let name = format!("file {}", path.display());
        report.checks.push(if path.exists() {
            CheckResult::pass(name, "present")
        } else {
            CheckResult::fail(name, "missing")
        });
    }

    for check in &report.checks {
        let line = format!("smoke {}: {} ({})", check.name, if check.ok { "ok" } else { "FAILED" }, check.detail);
        if check.ok {
            log.info(line);
        } else {
            log.warn(line);
        }
    }
    report
}

fn database_check(engine: &Engine, log: &OperationLog) -> CheckResult {
    let db = &engine.settings.database;
    let cmd = match client_command(db, &db.sql_program, "SQL client") {
        Ok(cmd) => cmd
            .args(["-tAc", "SELECT 1"])
            .timeout(engine.settings.timeouts.default_timeout()),
        Err(e) => return CheckResult::fail("database", e.to_string()),
    };
    match engine.runner.run(&cmd) {
        Ok(output) => {
            log.tool_output(&db.sql_program, &output);
            match output.check(&db.sql_program).map_err(|e| e.with_log(log.path())) {
                Ok(_) => CheckResult::pass("database", "SELECT 1 succeeded"),
                Err(e) => CheckResult::fail("database", e.to_string()),
            }
        }
        Err(e) => CheckResult::fail("database", e.to_string()),
    }
}

fn health_check(url: &str) -> CheckResult {
    let client = match reqwest::blocking::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => return CheckResult::fail("health", e.to_string()),
    };
    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            CheckResult::pass("health", format!("{} returned {}", url, response.status()))
        }
        Ok(response) => CheckResult::fail("health", format!("{} returned {}", url, response.status())),
        Err(e) => CheckResult::fail("health", e.to_string()),
    }
}
