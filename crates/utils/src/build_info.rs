/// Git metadata captured at build time by `vergen-git2`.
///
/// Every field is optional: builds outside a git checkout still succeed and
/// simply report `unknown`.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub branch: Option<&'static str>,
    pub git_dirty: bool,
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    branch: option_env!("VERGEN_GIT_BRANCH"),
    git_dirty: is_true(option_env!("VERGEN_GIT_DIRTY")),
};

/// Const-context equivalent of `matches!(value, Some("true"))`.
const fn is_true(value: Option<&str>) -> bool {
    match value {
        Some(s) => matches!(s.as_bytes(), b"true"),
        None => false,
    }
}
