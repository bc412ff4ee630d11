//! Decides the port layout from the requested LocalStack version.
//!
//! LocalStack 0.11.5 moved every service behind a single edge port. Older
//! releases publish one port per service. The boundary is inclusive.

use semver::Version;

use crate::error::{LocalstackError, Result};

/// Tag that always resolves to the newest LocalStack release.
pub const LATEST: &str = "latest";

/// First release serving every service on the shared edge port.
pub const FIXED_PORT_SINCE: Version = Version::new(0, 11, 5);

/// Outcome of checking a requested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPolicy {
    /// Normalized version, used as the image tag.
    pub version: String,
    /// Whether the backend serves every service on one port.
    pub fixed_port: bool,
}

impl VersionPolicy {
    /// Check `requested` and derive the port layout.
    ///
    /// Accepts `latest`, full semantic versions, an optional leading `v`,
    /// and the short `major` / `major.minor` forms, which are padded with
    /// zeroes.
    pub fn decide(requested: &str) -> Result<Self> {
        if requested == LATEST {
            return Ok(Self {
                version: LATEST.to_string(),
                fixed_port: true,
            });
        }

        let version = parse_lenient(requested).map_err(|source| LocalstackError::InvalidVersion {
            version: requested.to_string(),
            source,
        })?;

        Ok(Self {
            fixed_port: version >= FIXED_PORT_SINCE,
            version: version.to_string(),
        })
    }
}

fn parse_lenient(raw: &str) -> std::result::Result<Version, semver::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    // Pad "1" and "1.2" up to a full triple; suffixes stay on the last part.
    let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_end);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded)
}
