//! Path resolution for CampusLink client data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `CAMPUSLINK_DATA_DIR` env > `~/.campuslink`.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "CAMPUSLINK_DATA_DIR";

/// Resolve the data directory.
///
/// Priority: `explicit` arg > `CAMPUSLINK_DATA_DIR` env > `~/.campuslink` default.
pub fn resolve_data_dir(explicit: Option<&Path>) -> io::Result<PathBuf> {
    resolve_from(explicit, std::env::var_os(DATA_DIR_ENV), dirs::home_dir())
}

fn resolve_from(
    explicit: Option<&Path>,
    env_val: Option<OsString>,
    home: Option<PathBuf>,
) -> io::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(val) = env_val.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(val));
    }
    home.map(|h| h.join(".campuslink")).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("HOME directory not found; set {DATA_DIR_ENV}"),
        )
    })
}

/// Persisted session for the CLI's single "tab"
pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join("session.json")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(log_dir(data_dir))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_wins_over_env_and_home() {
        let dir = resolve_from(
            Some(Path::new("/srv/campuslink")),
            Some("/env/dir".into()),
            Some("/home/ada".into()),
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/srv/campuslink"));
    }

    #[test]
    fn env_wins_over_home() {
        let dir = resolve_from(None, Some("/env/dir".into()), Some("/home/ada".into())).unwrap();
        assert_eq!(dir, PathBuf::from("/env/dir"));
    }

    #[test]
    fn falls_back_to_home() {
        let dir = resolve_from(None, Some("".into()), Some("/home/ada".into())).unwrap();
        assert_eq!(dir, PathBuf::from("/home/ada/.campuslink"));
        assert_eq!(session_path(&dir), dir.join("session.json"));
    }

    #[test]
    fn missing_home_is_an_error() {
        let err = resolve_from(None, None, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn ensure_dirs_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("data");
        ensure_dirs(&base).unwrap();
        assert!(log_dir(&base).is_dir());
    }
}
