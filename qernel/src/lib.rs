#![forbid(unsafe_code)]

pub mod config;
pub mod scenarios;

use qernel_core::{KernelContext, LowerConfig, lower_kernel};
use tracing::info;

pub use config::{ConfigError, LogSettings, QernelConfig};
pub use scenarios::{SCENARIOS, Scenario};

/// Build `scenario` in a fresh context and render its lowered module.
pub fn render_scenario(scenario: &Scenario, config: &LowerConfig) -> miette::Result<String> {
    let ctx = KernelContext::new();
    let root = (scenario.build)(&ctx)?;
    let module = lower_kernel(&root, config)?;
    info!(
        scenario = scenario.name,
        functions = module.functions.len(),
        "lowered scenario"
    );
    Ok(module.to_string())
}
