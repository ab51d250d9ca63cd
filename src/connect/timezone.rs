//! Timezone agreement between the remote and backup servers.

use tracing::debug;

use crate::error::ConfigError;
use crate::mysql::{Endpoint, TimeZoneSettings};

/// The zone a server actually uses: `SYSTEM` resolves to the system zone,
/// and a `+00:00` offset is reported as `UTC`.
pub fn effective_time_zone(settings: &TimeZoneSettings) -> String {
    let zone = if settings.global.eq_ignore_ascii_case("SYSTEM") {
        &settings.system
    } else {
        &settings.global
    };

    match zone.trim() {
        "+00:00" => "UTC".to_string(),
        other => other.to_string(),
    }
}

/// Fail when the two servers disagree on their timezone.
pub async fn verify_timezones(
    remote: &dyn Endpoint,
    local: &dyn Endpoint,
) -> Result<(), ConfigError> {
    let remote_zone = remote
        .time_zone()
        .await
        .map_err(|source| ConfigError::Timezone {
            side: "remote",
            source,
        })?;
    let local_zone = local
        .time_zone()
        .await
        .map_err(|source| ConfigError::Timezone {
            side: "local",
            source,
        })?;

    let remote_zone = effective_time_zone(&remote_zone);
    let local_zone = effective_time_zone(&local_zone);
    debug!("Timezones: remote {}, local {}", remote_zone, local_zone);

    if remote_zone != local_zone {
        return Err(ConfigError::TimezoneMismatch {
            remote: remote_zone,
            local: local_zone,
        });
    }
    Ok(())
}
