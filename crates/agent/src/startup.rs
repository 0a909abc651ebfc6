use std::sync::Arc;

use application::dscp_service_impl::DscpAppService;
use domain::dscp::engine::DscpClassifier;
use domain::dscp::entity::IpFamily;
use domain::dscp::table::PolicyTable;
use infrastructure::config::{AgentConfig, config_path};
use infrastructure::logging::init_logging;
use tracing::info;

use crate::cli::Cli;

/// Service plus one classifier per configured worker, all reading the
/// same policy table.
pub struct Runtime {
    pub service: DscpAppService,
    pub workers: Vec<DscpClassifier>,
}

/// Run the startup sequence: load config, initialize logging, and build
/// the runtime from it.
pub fn run(cli: &Cli) -> anyhow::Result<Runtime> {
    // ── 1. Load config ──────────────────────────────────────────────
    let path = config_path(cli.config.as_deref());
    let config = AgentConfig::load(&path)?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    info!(
        config_path = %path.display(),
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "DSCP agent starting"
    );

    // ── 3. Apply policies and build workers ─────────────────────────
    build(&config)
}

/// Apply both policy lists and the enable switch to a fresh table, then
/// build `agent.workers` classifiers over it.
pub fn build(config: &AgentConfig) -> anyhow::Result<Runtime> {
    let mut service = DscpAppService::new(Arc::new(PolicyTable::new()));
    for family in [IpFamily::V4, IpFamily::V6] {
        let policies = config.dscp_policies(family)?;
        service.reload_policies(family, policies)?;
    }
    service.set_enabled(config.dscp.enabled);

    let workers = service.classifiers(config.agent.workers);
    info!(
        enabled = service.enabled(),
        ipv4_policies = service.policy_count(IpFamily::V4),
        ipv6_policies = service.policy_count(IpFamily::V6),
        workers = workers.len(),
        "DSCP policies applied"
    );
    Ok(Runtime { service, workers })
}
