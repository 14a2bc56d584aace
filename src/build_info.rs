use std::sync::LazyLock;

/// Build-time git commit SHA stamped by build.rs when available.
pub fn git_sha() -> Option<&'static str> {
    option_env!("PATHLEASE_BUILD_GIT_SHA")
}

static VERSION: LazyLock<String> = LazyLock::new(|| match git_sha() {
    Some(sha) => format!("{} ({sha})", env!("CARGO_PKG_VERSION")),
    None => env!("CARGO_PKG_VERSION").to_string(),
});

/// `0.1.0` or `0.1.0 (abc123def456)`, shown by `--version` and `ping`.
pub fn version_string() -> &'static str {
    VERSION.as_str()
}
