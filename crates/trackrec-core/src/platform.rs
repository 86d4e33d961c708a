use std::path::PathBuf;

/// Config lives under ~/.config/trackrec/ (XDG standard).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("trackrec")
}

/// Logs and other daemon data live under ~/.local/share/trackrec/.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join("trackrec")
}

/// Runtime directory for the status side-channel, typically
/// /run/user/<uid>/trackrec.  Falls back to the temp dir when no runtime
/// dir is available (e.g. bare SSH sessions).
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("trackrec")
}

/// Status file read by external tooling over SSH.
pub fn status_file() -> PathBuf {
    runtime_dir().join("recorder.status")
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    for dir in path.split(':') {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the ffmpeg binary used for capture.
///
/// Searches in order:
/// 1. FFMPEG_PATH environment variable
/// 2. Beside the current executable
/// 3. PATH
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FFMPEG_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(p) = find_beside_exe(&["ffmpeg"]) {
        return Some(p);
    }

    find_on_path(&["ffmpeg"])
}
