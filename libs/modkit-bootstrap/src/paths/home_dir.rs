use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory created under the user's home when `server.home_dir` is unset.
pub const DEFAULT_HOME_SUBDIR: &str = ".taskhub";

#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("cannot locate the user home directory ({0} is not set)")]
    UserHomeMissing(&'static str),
    #[error("home_dir must be an absolute path after ~ expansion: {0}")]
    AbsoluteRequired(String),
    #[error("failed to create home_dir: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(target_os = "windows")]
const USER_HOME_VARS: &[&str] = &["USERPROFILE", "HOME"];
#[cfg(not(target_os = "windows"))]
const USER_HOME_VARS: &[&str] = &["HOME"];

/// Base for the default home dir: `%APPDATA%` on Windows, `$HOME` elsewhere.
#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

/// Resolve the server home directory.
///
/// A configured value may start with `~` (expanded to the user home) and
/// must be absolute afterwards. Without one, `<base>/<default_subdir>` is
/// used where `<base>` is `%APPDATA%` on Windows and `$HOME` elsewhere.
/// With `create` set the directory is created when missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let user_home = USER_HOME_VARS.iter().find_map(|var| env::var_os(var));
    let default_base = env::var_os(DEFAULT_BASE_VAR);
    let path = resolve_with(
        config_home.as_deref(),
        default_subdir,
        user_home.as_deref().map(Path::new),
        default_base.as_deref().map(Path::new),
    )?;
    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

fn resolve_with(
    config_home: Option<&str>,
    default_subdir: &str,
    user_home: Option<&Path>,
    default_base: Option<&Path>,
) -> Result<PathBuf, HomeDirError> {
    let Some(raw) = config_home.map(str::trim).filter(|s| !s.is_empty()) else {
        let base = default_base.ok_or(HomeDirError::UserHomeMissing(DEFAULT_BASE_VAR))?;
        return Ok(base.join(default_subdir));
    };

    let expanded = match raw.strip_prefix('~') {
        Some(rest) => {
            let home = user_home.ok_or(HomeDirError::UserHomeMissing(USER_HOME_VARS[0]))?;
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                home.to_path_buf()
            } else {
                home.join(rest)
            }
        }
        None => PathBuf::from(raw),
    };

    if !expanded.is_absolute() {
        return Err(HomeDirError::AbsoluteRequired(raw.to_string()));
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tilde_expands_to_user_home() {
        let tmp = tempdir().unwrap();
        let got = resolve_with(Some("~/work/taskhub"), DEFAULT_HOME_SUBDIR, Some(tmp.path()), None)
            .unwrap();
        assert_eq!(got, tmp.path().join("work").join("taskhub"));

        let bare = resolve_with(Some("~"), DEFAULT_HOME_SUBDIR, Some(tmp.path()), None).unwrap();
        assert_eq!(bare, tmp.path());
    }

    #[test]
    fn unset_or_blank_uses_default_subdir() {
        let tmp = tempdir().unwrap();
        for configured in [None, Some(""), Some("   ")] {
            let got = resolve_with(configured, DEFAULT_HOME_SUBDIR, None, Some(tmp.path())).unwrap();
            assert_eq!(got, tmp.path().join(".taskhub"));
        }
    }

    #[test]
    fn absolute_path_is_kept() {
        let tmp = tempdir().unwrap();
        let abs = tmp.path().join("custom");
        let got = resolve_with(abs.to_str(), DEFAULT_HOME_SUBDIR, None, None).unwrap();
        assert_eq!(got, abs);
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = resolve_with(Some("relative/dir"), DEFAULT_HOME_SUBDIR, None, None).unwrap_err();
        assert!(matches!(err, HomeDirError::AbsoluteRequired(ref p) if p == "relative/dir"));
    }

    #[test]
    fn missing_user_home_is_reported() {
        let err = resolve_with(Some("~/x"), DEFAULT_HOME_SUBDIR, None, None).unwrap_err();
        assert!(matches!(err, HomeDirError::UserHomeMissing(_)));

        let err = resolve_with(None, DEFAULT_HOME_SUBDIR, None, None).unwrap_err();
        assert!(matches!(err, HomeDirError::UserHomeMissing(_)));
    }

    #[test]
    fn create_makes_the_directory() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("nested").join("home");
        let got = resolve_home_dir(target.to_str().map(String::from), DEFAULT_HOME_SUBDIR, true)
            .unwrap();
        assert!(got.is_dir());
    }
}
