//! Usage: Hands the authorize URL to the user (system browser by default).

use crate::shared::error::AppResult;
use std::process::Command;

/// Where the interactive login is shown.
///
/// The default implementation opens the system browser; tests substitute one that drives the
/// loopback redirect directly.
pub trait AuthorizationPrompt: Send + Sync {
    fn open(&self, authorize_url: &str) -> AppResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl AuthorizationPrompt for SystemBrowser {
    fn open(&self, authorize_url: &str) -> AppResult<()> {
        open_browser(authorize_url)
    }
}

fn open_browser(url: &str) -> AppResult<()> {
    #[cfg(target_os = "windows")]
    {
        build_windows_open_browser_command(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("open")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Command::new("xdg-open")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    Err("SYSTEM_ERROR: browser open is unsupported on this platform"
        .to_string()
        .into())
}

#[cfg(target_os = "windows")]
fn build_windows_open_browser_command(url: &str) -> Command {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` can open File Explorer for some URL shapes.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    cmd
}
