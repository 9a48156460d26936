//! Fleet configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level fleet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Remote game server every unit connects to.
    pub server: ServerConfig,
    /// Control surface (WebSocket gateway).
    pub control: ControlConfig,
    /// Per-agent behavior tuning.
    pub behavior: BehaviorConfig,
    /// Supervisor lifecycle policy.
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Device-code login against the account service.
    Microsoft,
    /// No authentication; the initial handle is used as-is.
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Protocol version string; `None` lets the client negotiate.
    pub version: Option<String>,
    pub auth: AuthMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Upper bound on destructive actions per second, per agent.
    pub actions_per_second: f64,
    /// Half-width of the cube searched around the target.
    pub scan_radius: i32,
    /// Farthest block (from the agent, to the block center) an action may touch.
    pub max_action_distance: f64,
    /// Navigation radius kept around a followed target.
    pub follow_range: f64,
    /// Navigation radius kept around a griefed target.
    pub strike_range: f64,
    /// Agent must be this close to a trap target before building starts.
    pub build_range: f64,
    pub building_material: String,
    /// Stack size requested from the server when the agent holds no material.
    pub supply_amount: u32,
    /// Length of each sweep leg.
    pub sweep_distance: f64,
    /// Blocks the scanner must never select.
    pub protected_blocks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RekeyPolicy {
    /// Only units started through the device-code flow are re-keyed.
    AuthFlowOnly,
    /// Every unit is re-keyed to its final handle on authentication.
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay before a crashed unit is recreated.
    pub respawn_delay_secs: u64,
    /// Newline-delimited list of previously authenticated handles.
    pub accounts_file: PathBuf,
    pub rekey_policy: RekeyPolicy,
    /// Prefix of generated temporary handles for device-code logins.
    pub temp_name_prefix: String,
}

// ============================================================
// Defaults
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 25565,
            version: None,
            auth: AuthMode::Microsoft,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            actions_per_second: 10.0,
            scan_radius: 4,
            max_action_distance: 4.5,
            follow_range: 2.0,
            strike_range: 3.0,
            build_range: 3.0,
            building_material: "obsidian".into(),
            supply_amount: 64,
            sweep_distance: 10_000.0,
            protected_blocks: [
                "bedrock",
                "barrier",
                "command_block",
                "chain_command_block",
                "repeating_command_block",
                "structure_block",
                "jigsaw",
                "end_portal",
                "end_portal_frame",
                "end_gateway",
                "water",
                "lava",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            respawn_delay_secs: 5,
            accounts_file: PathBuf::from("accounts.txt"),
            rekey_policy: RekeyPolicy::AuthFlowOnly,
            temp_name_prefix: "bot_".into(),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl FleetConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Render the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl BehaviorConfig {
    /// Minimum spacing between two destructive actions.
    pub fn action_interval(&self) -> Duration {
        if self.actions_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.actions_per_second)
    }

    pub fn is_protected(&self, block_name: &str) -> bool {
        self.protected_blocks.iter().any(|b| b == block_name)
    }
}

impl SupervisorConfig {
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_secs(self.respawn_delay_secs)
    }
}
