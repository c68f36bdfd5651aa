//! # Report decoder
//!
//! Validates and normalizes the field map of one submission. Every protocol
//! revision goes through the same path; the revision only gates which
//! optional fields are read and which metric key scheme applies.

use crate::codec::{parse_fields, Fields};
use crate::error::DecodeError;
use crate::metrics::MetricScheme;
use crate::models::{AuthMode, DecodedReport, Environment};

/// Revision assumed when a client does not send one.
pub const DEFAULT_REVISION: i32 = 4;

/// Player counts above this are treated as bogus and stored as zero.
pub const MAX_PLAYERS: i32 = 2000;

/// First revision that reports the host environment.
pub const ENVIRONMENT_REVISION: i32 = 6;

const UNKNOWN: &str = "Unknown";

/// Decodes a raw body straight into a report.
pub fn decode_body(body: &str) -> Result<DecodedReport, DecodeError> {
    decode(&parse_fields(body))
}

/// Decodes a field map, reading the revision from the map itself.
pub fn decode(fields: &Fields) -> Result<DecodedReport, DecodeError> {
    // Identity and required strings are checked before any number parsing.
    require_identity(fields)?;
    let revision = read_revision(fields)?;
    decode_with_revision(fields, revision)
}

/// `revision`, defaulting to [`DEFAULT_REVISION`] when absent.
pub fn read_revision(fields: &Fields) -> Result<i32, DecodeError> {
    optional_int(fields, "revision").map(|revision| revision.unwrap_or(DEFAULT_REVISION))
}

/// Decodes a field map for an already known revision.
pub fn decode_with_revision(fields: &Fields, revision: i32) -> Result<DecodedReport, DecodeError> {
    let (guid, server_version, plugin_version) = require_identity(fields)?;

    let players = optional_int(fields, "players")?.unwrap_or(0);
    let players_online = if (0..=MAX_PLAYERS).contains(&players) {
        players
    } else {
        0
    };

    let environment = (revision >= ENVIRONMENT_REVISION).then(|| read_environment(fields));
    let metrics = MetricScheme::for_revision(revision).extract(fields);

    Ok(DecodedReport {
        guid: guid.to_owned(),
        server_version: server_version.to_owned(),
        plugin_version: plugin_version.to_owned(),
        is_ping: fields.contains_key("ping"),
        revision,
        players_online,
        environment,
        metrics,
    })
}

fn require_identity(fields: &Fields) -> Result<(&str, &str, &str), DecodeError> {
    let guid = fields
        .get("guid")
        .map(String::as_str)
        .filter(|guid| !guid.is_empty())
        .ok_or(DecodeError::MissingIdentity)?;
    let server = fields
        .get("server")
        .ok_or(DecodeError::MissingFields("server"))?;
    let version = fields
        .get("version")
        .ok_or(DecodeError::MissingFields("version"))?;
    Ok((guid, server, version))
}

fn optional_int(fields: &Fields, field: &'static str) -> Result<Option<i32>, DecodeError> {
    fields
        .get(field)
        .map(|raw| {
            raw.parse::<i32>().map_err(|_| DecodeError::MalformedNumber {
                field,
                value: raw.clone(),
            })
        })
        .transpose()
}

fn read_environment(fields: &Fields) -> Environment {
    let (os_name, os_version) = match fields.get("osname") {
        Some(name) => (
            name.clone(),
            fields
                .get("osversion")
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_owned()),
        ),
        None => (UNKNOWN.to_owned(), UNKNOWN.to_owned()),
    };

    let (java_name, java_version) = match fields.get("java_version") {
        Some(raw) => split_java_version(raw),
        None => (String::new(), UNKNOWN.to_owned()),
    };

    // Either field failing leaves both at their "unknown" values.
    let (cores, auth_mode) = match fields.get("cores").map(|raw| raw.parse::<i32>()) {
        Some(Ok(cores)) => {
            let online = fields
                .get("online-mode")
                .is_some_and(|mode| mode.eq_ignore_ascii_case("true"));
            let mode = if online {
                AuthMode::Online
            } else {
                AuthMode::Offline
            };
            (cores, mode)
        }
        _ => (0, AuthMode::Unknown),
    };

    Environment {
        os_name,
        os_arch: fields.get("osarch").cloned(),
        os_version,
        java_name,
        java_version,
        cores,
        auth_mode,
    }
}

/// `1.8.0_211` -> (`1.8`, `0_211`). Only the pre-9 `1.x` scheme is split;
/// anything else is kept whole as the version with an empty name.
fn split_java_version(raw: &str) -> (String, String) {
    if raw.starts_with("1.") && raw.len() > 3 {
        if let Some(second_dot) = raw[2..].find('.').map(|offset| offset + 2) {
            return (raw[..second_dot].to_owned(), raw[second_dot + 1..].to_owned());
        }
    }
    (String::new(), raw.to_owned())
}
