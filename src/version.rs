//! Build identity: crate version plus the git state and time of the build.
//!
//! Everything here is baked in by `build.rs`. Builds outside a git checkout
//! (a packaged crate, for instance) report `"unknown"` for the git fields.

/// Crate version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const UNKNOWN: &str = "unknown";

/// Branch the binary was built from.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => UNKNOWN,
};

/// Commit the binary was built from.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => UNKNOWN,
};

/// RFC 3339 build time.
pub const BUILD_TIMESTAMP: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => UNKNOWN,
};

const GIT_DIRTY: bool = match option_env!("VERGEN_GIT_DIRTY") {
    Some(dirty) => matches!(dirty.as_bytes(), [b't', b'r', b'u', b'e']),
    None => false,
};

/// First seven characters of [`GIT_SHA`].
pub fn short_sha() -> &'static str {
    GIT_SHA.get(..7).unwrap_or(GIT_SHA)
}

/// `{version}+{branch}.{sha7}`, suffixed `.dirty` for uncommitted builds.
pub fn version_string() -> String {
    let mut version = format!("{PKG_VERSION}+{GIT_BRANCH}.{}", short_sha());
    if GIT_DIRTY {
        version.push_str(".dirty");
    }
    version
}

/// `User-Agent` sent with every upstream request.
pub fn user_agent() -> String {
    format!("bragi/{PKG_VERSION}")
}
