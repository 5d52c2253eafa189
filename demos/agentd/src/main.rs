use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use zpm_core::{Context, ManagerConfig, ProcessManager, process::InternalProcess};
use zpm_model::{Command, StartupSlice};
use zpm_observe::{LoggerConfig, MessageLog, logger_init, result_logger};
use zpm_prometheus::PrometheusMetrics;

/// Layout of the file passed as the first argument.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentConfig {
    logger: LoggerConfig,
    manager: ManagerConfig,
    startup: StartupSlice,
}

fn load_config() -> anyhow::Result<AgentConfig> {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        return Ok(AgentConfig::default());
    };
    let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn register_builtins(manager: &ProcessManager) {
    manager.register_builtin(
        "core.ping",
        Arc::new(|_: &Command| -> anyhow::Result<Value> { Ok(json!("pong")) }),
    );
    manager.register_builtin_with_ctx(
        "core.sleep",
        InternalProcess::boxed(|ctx: Context| async move {
            let secs = ctx
                .command
                .arguments
                .as_ref()
                .and_then(|a| a.as_value().get("seconds"))
                .and_then(Value::as_u64)
                .unwrap_or(1);
            tokio::select! {
                _ = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(json!({ "slept": secs })),
            }
        }),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Config + logger
    let cfg = load_config()?;
    logger_init(&cfg.logger)?;
    info!("logger initialized");

    // 2) Manager + factories
    let manager = ProcessManager::new(cfg.manager);
    zpm_exec::register_all(&manager);
    register_builtins(&manager);

    // 3) Handlers
    MessageLog::default().install(&manager);
    manager.add_result_handler(result_logger());
    let metrics = PrometheusMetrics::new()?;
    metrics.install(&manager);

    let dispatch = manager.start()?;
    info!("process manager ready");

    // 4) Startup slice
    if !cfg.startup.is_empty() {
        let ok = manager.run_slice(&cfg.startup).await;
        if ok {
            info!(entries = cfg.startup.len(), "startup slice released");
        } else {
            warn!(entries = cfg.startup.len(), "startup slice finished with failures");
        }
    }

    // 5) Keep running
    info!("press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down...");

    manager.kill_all();
    for job in manager.jobs() {
        let _ = tokio::time::timeout(Duration::from_secs(10), job.wait()).await;
    }
    manager.shutdown();
    let _ = dispatch.await;

    match metrics.encode_text() {
        Ok(text) => info!(target: "zpm.agentd", "final metrics:\n{text}"),
        Err(e) => warn!(error = %e, "metrics encoding failed"),
    }
    Ok(())
}
