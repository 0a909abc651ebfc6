// ── Config ─────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/dscp-marker/config.yaml";

/// Environment variable that overrides the default config location.
pub const CONFIG_PATH_ENV: &str = "DSCP_CONFIG";

// ── Workers ────────────────────────────────────────────────────────

/// Classifier shards when `agent.workers` is omitted.
pub const DEFAULT_WORKERS: usize = 1;
