//! Server settings file written before each launch.
//!
//! The dedicated server reads `enshrouded_server.json` from its install
//! directory. Keys the manager does not own are preserved, and any user
//! groups already present in the file win over the configured defaults so
//! that hand-edited passwords survive a relaunch.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Settings file name inside `server_dir`.
pub const SETTINGS_FILE_NAME: &str = "enshrouded_server.json";

const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// Build the settings document owned by the manager.
#[must_use]
pub fn build_settings(config: &GlobalConfig) -> Value {
    let game = &config.game;
    json!({
        "name": config.server.name,
        "saveDirectory": format!("./{}", config.server.save_dir.display()),
        "logDirectory": "./logs",
        "ip": "0.0.0.0",
        "queryPort": config.server.query_port,
        "slotCount": config.server.max_players,
        "gameSettingsPreset": "Default",
        "gameSettings": {
            "playerHealthFactor": 1,
            "playerManaFactor": 1,
            "playerStaminaFactor": 1,
            "enableDurability": true,
            "enableStarvingDebuff": false,
            "enemyDamageFactor": game.enemy_damage_multiplier,
            "enemyHealthFactor": game.enemy_health_multiplier,
            "dayTimeDuration": game.day_length_minutes.saturating_mul(NANOS_PER_MINUTE),
            "nightTimeDuration": game.night_length_minutes.saturating_mul(NANOS_PER_MINUTE),
        },
        "userGroups": [
            user_group("Admin", &game.admin_password, [true, true, true, true]),
            user_group("Friend", &game.friend_password, [false, true, true, false]),
            user_group("Guest", &game.guest_password, [false, false, false, false]),
        ],
    })
}

/// `permissions`: kick/ban, access inventories, edit base, extend base.
fn user_group(name: &str, password: &str, permissions: [bool; 4]) -> Value {
    let [can_kick_ban, can_access_inventories, can_edit_base, can_extend_base] = permissions;
    json!({
        "name": name,
        "password": password,
        "canKickBan": can_kick_ban,
        "canAccessInventories": can_access_inventories,
        "canEditBase": can_edit_base,
        "canExtendBase": can_extend_base,
        "reservedSlots": 0,
    })
}

/// Merge `generated` into the document already on disk (if any).
///
/// Existing keys not produced by the manager are kept; existing
/// `userGroups` replace the generated ones.
#[must_use]
pub fn merge_settings(existing: Option<Value>, generated: Value) -> Value {
    let Value::Object(mut generated) = generated else {
        return generated;
    };

    let Some(Value::Object(mut existing)) = existing else {
        return Value::Object(generated);
    };

    if let Some(groups) = existing.get("userGroups") {
        generated.insert("userGroups".into(), groups.clone());
    }
    existing.extend(generated);
    Value::Object(existing)
}

/// Write the settings file into `config.server_dir`.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory is missing or the file cannot be
/// written.
pub fn write_server_settings(config: &GlobalConfig) -> Result<PathBuf> {
    let path = config.server_dir.join(SETTINGS_FILE_NAME);
    let existing = read_existing(&path);
    let document = merge_settings(existing, build_settings(config));
    let rendered = serde_json::to_string_pretty(&document)?;

    let mut tmp = NamedTempFile::new_in(&config.server_dir).map_err(|err| {
        AppError::Io(format!(
            "failed to create temporary settings file in {}: {err}",
            config.server_dir.display()
        ))
    })?;
    tmp.write_all(rendered.as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write settings file: {err}")))?;
    tmp.persist(&path).map_err(|err| {
        AppError::Io(format!(
            "failed to persist settings to {}: {err}",
            path.display()
        ))
    })?;

    info!(path = %path.display(), "server settings written");
    Ok(path)
}

fn read_existing(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "could not parse existing server settings, replacing");
            None
        }
    }
}
