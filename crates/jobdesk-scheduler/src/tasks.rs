//! Built-in demonstration tasks, registered under the `sample_task` module.
//!
//! Invoke targets:
//!   sample_task.no_params
//!   sample_task.with_params('ry')
//!   sample_task.with_multi_params('ry', true, 2000)
//!   sample_task.sleep_millis(250)

use std::time::Duration;

use anyhow::{anyhow, bail};

use crate::registry::TaskRegistry;
use crate::target::ArgValue;

pub const SAMPLE_MODULE: &str = "sample_task";

pub fn register_sample_tasks(registry: &mut TaskRegistry) {
    registry
        .register_blocking(SAMPLE_MODULE, "no_params", 0, |_args| {
            tracing::info!("running sample task: no_params");
            Ok("no_params executed successfully".to_string())
        })
        .register_blocking(SAMPLE_MODULE, "with_params", 1, |args| {
            let [param] = args else {
                bail!("with_params expects 1 argument");
            };
            tracing::info!(%param, "running sample task: with_params");
            Ok(format!("with_params executed successfully: {param}"))
        })
        .register_blocking(SAMPLE_MODULE, "with_multi_params", 3, |args| {
            let [s, b, n] = args else {
                bail!("with_multi_params expects 3 arguments");
            };
            tracing::info!(%s, %b, %n, "running sample task: with_multi_params");
            Ok(format!(
                "with_multi_params executed successfully: s={s}, b={b}, n={n}"
            ))
        })
        .register_async(SAMPLE_MODULE, "sleep_millis", 1, sleep_millis);
}

async fn sleep_millis(args: Vec<ArgValue>) -> anyhow::Result<String> {
    let millis = args
        .first()
        .and_then(ArgValue::as_i64)
        .ok_or_else(|| anyhow!("sleep_millis expects an integer"))?;
    let millis = u64::try_from(millis).map_err(|_| anyhow!("sleep_millis expects a non-negative integer"))?;
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(format!("slept {millis}ms"))
}
