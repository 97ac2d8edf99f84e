//! Global configuration parsing, validation, and shared snapshots.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;

use crate::process::ProcessFamily;
use crate::{AppError, Result};

/// Launch parameters for the dedicated server binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Executable name without platform extension.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Public server name.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// UDP game port.
    #[serde(default = "default_game_port")]
    pub game_port: u16,
    /// Steam query port.
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    /// Player slot count.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Frame rate cap passed to the server.
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    /// Simulation tick rate.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Difficulty preset name.
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    /// Whether player-versus-player combat is enabled.
    #[serde(default)]
    pub pvp_enabled: bool,
    /// Free-form extra parameters appended verbatim to the command line.
    #[serde(default)]
    pub startup_params: String,
    /// Title given to the hosting console / terminal window.
    #[serde(default = "default_window_title")]
    pub window_title: String,
    /// Server log file, relative to `server_dir`.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Marker preceding the version token in the server log.
    #[serde(default = "default_version_marker")]
    pub version_marker: String,
    /// Save-data directory, relative to `server_dir`.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
}

impl ServerConfig {
    /// Image name the process table reports for the server on `family`.
    #[must_use]
    pub fn executable_name(&self, family: ProcessFamily) -> String {
        match family {
            ProcessFamily::Windows if !self.executable.to_lowercase().ends_with(".exe") => {
                format!("{}.exe", self.executable)
            }
            _ => self.executable.clone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            name: default_server_name(),
            game_port: default_game_port(),
            query_port: default_query_port(),
            max_players: default_max_players(),
            max_fps: default_max_fps(),
            tick_rate: default_tick_rate(),
            difficulty: default_difficulty(),
            pvp_enabled: false,
            startup_params: String::new(),
            window_title: default_window_title(),
            log_file: default_log_file(),
            version_marker: default_version_marker(),
            save_dir: default_save_dir(),
        }
    }
}

/// Game rules and user-group passwords written to the server settings file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GameConfig {
    /// Enemy damage factor.
    #[serde(default = "default_multiplier")]
    pub enemy_damage_multiplier: f64,
    /// Enemy health factor.
    #[serde(default = "default_multiplier")]
    pub enemy_health_multiplier: f64,
    /// In-game day length.
    #[serde(default = "default_day_length")]
    pub day_length_minutes: u64,
    /// In-game night length.
    #[serde(default = "default_night_length")]
    pub night_length_minutes: u64,
    /// Password for the `Admin` user group.
    #[serde(default)]
    pub admin_password: String,
    /// Password for the `Friend` user group.
    #[serde(default)]
    pub friend_password: String,
    /// Password for the `Guest` user group.
    #[serde(default)]
    pub guest_password: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            enemy_damage_multiplier: default_multiplier(),
            enemy_health_multiplier: default_multiplier(),
            day_length_minutes: default_day_length(),
            night_length_minutes: default_night_length(),
            admin_password: String::new(),
            friend_password: String::new(),
            guest_password: String::new(),
        }
    }
}

/// Automatic backup settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AutoBackupConfig {
    /// Whether scheduled backups run.
    #[serde(default)]
    pub enabled: bool,
    /// Minutes between successful backups.
    #[serde(default = "default_backup_interval")]
    pub interval_minutes: u64,
    /// Archives older than this many days are pruned.
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
    /// Take a final backup during manager shutdown.
    #[serde(default = "default_true")]
    pub backup_on_shutdown: bool,
    /// Archive file name prefix (`<prefix>_YYYYMMDD_HHMMSS.zip`).
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_backup_interval(),
            keep_days: default_keep_days(),
            backup_on_shutdown: true,
            prefix: default_backup_prefix(),
        }
    }
}

/// Automatic restart settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AutoRestartConfig {
    /// Whether scheduled restarts run.
    #[serde(default)]
    pub enabled: bool,
    /// Hours between restarts.
    #[serde(default = "default_restart_interval")]
    pub interval_hours: u64,
    /// Warning window before a restart fires.
    #[serde(default = "default_warning_minutes")]
    pub warning_minutes: u64,
}

impl Default for AutoRestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_restart_interval(),
            warning_minutes: default_warning_minutes(),
        }
    }
}

/// Raw lifecycle timing knobs as they appear in the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LifecycleConfig {
    /// Liveness cache window.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Wait after the graceful terminate before forcing a kill.
    #[serde(default = "default_graceful_stop")]
    pub graceful_stop_seconds: u64,
    /// Overall wait for the process to disappear after stopping.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Poll interval while waiting for the process to disappear.
    #[serde(default = "default_stop_poll_ms")]
    pub stop_poll_ms: u64,
    /// Delay after spawning before confirming the launch.
    #[serde(default = "default_settle")]
    pub settle_seconds: u64,
    /// Delay between the stop and start halves of a restart.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,
    /// Minimum interval between version log scans.
    #[serde(default = "default_version_check")]
    pub version_check_seconds: u64,
    /// Scheduler loop tick.
    #[serde(default = "default_scheduler_tick")]
    pub scheduler_tick_seconds: u64,
    /// Retry delay after a failed scheduled backup or restart.
    #[serde(default = "default_retry_minutes")]
    pub retry_minutes: u64,
    /// Wait for a scheduler worker to exit when it is joined.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            graceful_stop_seconds: default_graceful_stop(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            stop_poll_ms: default_stop_poll_ms(),
            settle_seconds: default_settle(),
            restart_delay_seconds: default_restart_delay(),
            version_check_seconds: default_version_check(),
            scheduler_tick_seconds: default_scheduler_tick(),
            retry_minutes: default_retry_minutes(),
            join_timeout_seconds: default_join_timeout(),
        }
    }
}

/// Lifecycle timings resolved to [`Duration`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// Liveness cache window.
    pub probe_interval: Duration,
    /// Graceful-terminate wait before escalation.
    pub graceful_stop: Duration,
    /// Overall stop timeout.
    pub shutdown_timeout: Duration,
    /// Stop poll interval.
    pub stop_poll: Duration,
    /// Post-spawn settle period.
    pub settle: Duration,
    /// Delay between stop and start in a restart.
    pub restart_delay: Duration,
    /// Version scan throttle.
    pub version_check: Duration,
    /// Scheduler loop tick.
    pub scheduler_tick: Duration,
    /// Retry delay after a failed scheduled operation.
    pub retry: Duration,
    /// Worker join timeout.
    pub join_timeout: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        LifecycleConfig::default().timings()
    }
}

impl LifecycleConfig {
    /// Resolve the raw values into durations.
    #[must_use]
    pub fn timings(&self) -> LifecycleTimings {
        LifecycleTimings {
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            graceful_stop: Duration::from_secs(self.graceful_stop_seconds),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            stop_poll: Duration::from_millis(self.stop_poll_ms),
            settle: Duration::from_secs(self.settle_seconds),
            restart_delay: Duration::from_secs(self.restart_delay_seconds),
            version_check: Duration::from_secs(self.version_check_seconds),
            scheduler_tick: Duration::from_secs(self.scheduler_tick_seconds),
            retry: Duration::from_secs(self.retry_minutes.saturating_mul(60)),
            join_timeout: Duration::from_secs(self.join_timeout_seconds),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_executable() -> String {
    "enshrouded_server".into()
}

fn default_server_name() -> String {
    "My Enshrouded Server".into()
}

fn default_game_port() -> u16 {
    15636
}

fn default_query_port() -> u16 {
    15637
}

fn default_max_players() -> u32 {
    16
}

fn default_max_fps() -> u32 {
    60
}

fn default_tick_rate() -> u32 {
    64
}

fn default_difficulty() -> String {
    "normal".into()
}

fn default_window_title() -> String {
    "Enshrouded Server".into()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs").join("enshrouded_server.log")
}

fn default_version_marker() -> String {
    "Game Version (SVN):".into()
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("savegame")
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_day_length() -> u64 {
    30
}

fn default_night_length() -> u64 {
    12
}

fn default_backup_interval() -> u64 {
    360
}

fn default_keep_days() -> u32 {
    7
}

fn default_backup_prefix() -> String {
    "enshrouded_backup".into()
}

fn default_restart_interval() -> u64 {
    24
}

fn default_warning_minutes() -> u64 {
    5
}

fn default_probe_interval_ms() -> u64 {
    2000
}

fn default_graceful_stop() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_stop_poll_ms() -> u64 {
    500
}

fn default_settle() -> u64 {
    5
}

fn default_restart_delay() -> u64 {
    5
}

fn default_version_check() -> u64 {
    300
}

fn default_scheduler_tick() -> u64 {
    10
}

fn default_retry_minutes() -> u64 {
    5
}

fn default_join_timeout() -> u64 {
    30
}

fn default_app_id() -> String {
    "2278520".into()
}

fn default_ipc_name() -> String {
    "server-warden".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Dedicated server installation directory.
    pub server_dir: PathBuf,
    /// Directory receiving backup archives.
    pub backup_dir: PathBuf,
    /// `SteamCMD` installation directory.
    #[serde(default)]
    pub steamcmd_dir: PathBuf,
    /// Steam application ID of the dedicated server.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Named pipe / Unix socket identifier for `server-warden-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Optional shared secret required on every IPC request.
    #[serde(default)]
    pub ipc_auth_token: Option<String>,
    /// Server launch parameters.
    #[serde(default)]
    pub server: ServerConfig,
    /// Game rules for the settings file.
    #[serde(default)]
    pub game: GameConfig,
    /// Scheduled backup settings.
    #[serde(default)]
    pub auto_backup: AutoBackupConfig,
    /// Scheduled restart settings.
    #[serde(default)]
    pub auto_restart: AutoRestartConfig,
    /// Lifecycle timing knobs.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved lifecycle timings.
    #[must_use]
    pub fn timings(&self) -> LifecycleTimings {
        self.lifecycle.timings()
    }

    /// Absolute path of the save-data directory.
    #[must_use]
    pub fn save_dir(&self) -> PathBuf {
        self.server_dir.join(&self.server.save_dir)
    }

    /// Absolute path of the server log scanned for the version marker.
    #[must_use]
    pub fn server_log_path(&self) -> PathBuf {
        self.server_dir.join(&self.server.log_file)
    }

    fn validate(&self) -> Result<()> {
        if self.server.executable.trim().is_empty() {
            return Err(AppError::Config("server.executable must not be empty".into()));
        }

        if self.server.game_port == 0 || self.server.query_port == 0 {
            return Err(AppError::Config("server ports must be greater than zero".into()));
        }

        if self.server.max_players == 0 {
            return Err(AppError::Config("server.max_players must be greater than zero".into()));
        }

        if self.auto_backup.interval_minutes == 0 {
            return Err(AppError::Config(
                "auto_backup.interval_minutes must be greater than zero".into(),
            ));
        }

        if self.auto_backup.prefix.trim().is_empty() {
            return Err(AppError::Config("auto_backup.prefix must not be empty".into()));
        }

        if self.auto_restart.interval_hours == 0 {
            return Err(AppError::Config(
                "auto_restart.interval_hours must be greater than zero".into(),
            ));
        }

        if self.lifecycle.scheduler_tick_seconds == 0 || self.lifecycle.stop_poll_ms == 0 {
            return Err(AppError::Config(
                "lifecycle poll intervals must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Shared, swappable configuration snapshot.
///
/// Readers take an immutable [`Arc<GlobalConfig>`] per operation; a reload
/// swaps the whole snapshot so no reader ever sees a half-applied update.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<GlobalConfig>>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GlobalConfig> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the configuration for all subsequent snapshots.
    pub fn replace(&self, config: GlobalConfig) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
    }
}
