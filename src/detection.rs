use std::path::{Path, PathBuf};

/// Returns the path to a Chromium-family executable.
///
/// If the `CHROME` environment variable is set and points at an existing
/// file it wins. Otherwise the usual binary names are searched on `PATH`,
/// then platform-specific install locations. An empty result is an error
/// string naming what was tried.
pub fn default_executable() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CHROME") {
        if Path::new(&path).exists() {
            return Ok(path.into());
        }
    }

    for app in &[
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
        "chrome-browser",
    ] {
        if let Ok(path) = which::which(app) {
            return Ok(path);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let default_paths = &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ][..];
        for path in default_paths {
            if Path::new(path).exists() {
                return Ok(path.into());
            }
        }
    }

    Err("could not auto detect a chrome executable".to_string())
}
