use std::path::PathBuf;

use rollcall_core::{MatchPolicy, ShiftPolicy};

/// Daemon configuration, loaded from environment variables. Shift-time
/// policy lives in a separate TOML file (`policy_path`).
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the shift policy TOML file.
    pub policy_path: PathBuf,
    /// Embedding dimension the gallery accepts.
    pub embedding_dim: usize,
    /// Minimum cosine similarity for a positive identification.
    pub accept_threshold: f32,
    /// Minimum score gap between the top two candidates.
    pub ambiguity_margin: f32,
    /// Bound on waiting for the ledger actor before a scan gives up.
    pub commit_timeout_secs: u64,
    /// Serve on the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let policy_path = std::env::var("ROLLCALL_POLICY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/rollcall/policy.toml"));

        Self {
            db_path,
            policy_path,
            embedding_dim: env_usize("ROLLCALL_EMBEDDING_DIM", 512),
            accept_threshold: env_f32("ROLLCALL_ACCEPT_THRESHOLD", 0.40),
            ambiguity_margin: env_f32("ROLLCALL_AMBIGUITY_MARGIN", 0.05),
            commit_timeout_secs: env_u64("ROLLCALL_COMMIT_TIMEOUT_SECS", 5),
            session_bus: std::env::var("ROLLCALL_SESSION_BUS")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            accept_threshold: self.accept_threshold,
            ambiguity_margin: self.ambiguity_margin,
        }
    }

    /// Read the shift policy file. A missing file means defaults; a file
    /// that exists but does not parse is a startup error, not a silent
    /// fallback.
    pub fn load_shift_policy(&self) -> anyhow::Result<ShiftPolicy> {
        match std::fs::read_to_string(&self.policy_path) {
            Ok(text) => {
                let policy = toml::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("bad policy file {}: {e}", self.policy_path.display())
                })?;
                tracing::info!(path = %self.policy_path.display(), "shift policy loaded");
                Ok(policy)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.policy_path.display(),
                    "no policy file; using default shift policy"
                );
                Ok(ShiftPolicy::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "cannot read policy file {}: {e}",
                self.policy_path.display()
            )),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
