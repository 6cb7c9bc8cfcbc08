//! HAProxy binary invocation and diagnostic simplification

use std::path::{Path, PathBuf};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use haptic_core::{Error, Result};
use haptic_renderer::RenderedBundle;

/// Wrapper around `haproxy -c -f <cfg>`.
#[derive(Debug, Clone)]
pub struct HaproxyCheck {
    binary: PathBuf,
}

impl Default for HaproxyCheck {
    fn default() -> Self {
        Self::new("haproxy")
    }
}

impl HaproxyCheck {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether the binary can be executed at all.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Write the bundle under `root` and run the syntax check against it.
    pub async fn validate(&self, bundle: &RenderedBundle, root: &Path) -> Result<()> {
        let cfg_path = write_bundle(bundle, root)?;
        self.check_file(&cfg_path).await
    }

    /// Run `haproxy -c -f <path>`; exit 0 means valid.
    pub async fn check_file(&self, cfg_path: &Path) -> Result<()> {
        debug!(binary = %self.binary.display(), cfg = %cfg_path.display(), "running haproxy check");
        let output = Command::new(&self.binary)
            .arg("-c")
            .arg("-f")
            .arg(cfg_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::haproxy(format!(
                    "failed to execute '{}': {e}",
                    self.binary.display()
                ))
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::haproxy(simplify_diagnostics(&stderr)))
    }
}

/// Lay the bundle out the way HAProxy expects to find it:
/// `root/haproxy.cfg` plus `maps/`, `ssl/` and `files/` subdirectories.
pub fn write_bundle(bundle: &RenderedBundle, root: &Path) -> Result<PathBuf> {
    let maps = root.join("maps");
    let ssl = root.join("ssl");
    let files = root.join("files");
    for dir in [&maps, &ssl, &files] {
        std::fs::create_dir_all(dir)?;
    }

    for file in &bundle.files.map_files {
        std::fs::write(maps.join(&file.path), &file.content)?;
    }
    for file in &bundle.files.ssl_certificates {
        std::fs::write(ssl.join(&file.path), &file.content)?;
    }
    for file in bundle
        .files
        .general_files
        .iter()
        .chain(&bundle.files.crt_list_files)
    {
        std::fs::write(files.join(&file.path), &file.content)?;
    }

    let cfg_path = root.join("haproxy.cfg");
    std::fs::write(&cfg_path, &bundle.haproxy_cfg)?;
    Ok(cfg_path)
}

static SEVERITY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(ALERT|WARNING)\]\s*(\(\d+\))?\s*:\s*").expect("severity regex"));
static DATE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\d+\)\s*:\s*|^\d{2}:\d{2}:\d{2}\s*").expect("date regex"));
static CONFIG_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^config\s*:\s*").expect("config marker regex"));

/// Reduce raw `haproxy -c` stderr to the actionable diagnostics: severity
/// tags, process ids and timestamps dropped, line numbers kept.
pub fn simplify_diagnostics(stderr: &str) -> String {
    let mut lines = Vec::new();
    for raw in stderr.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("[NOTICE]") {
            continue;
        }
        if line.contains("Configuration file is valid")
            || line.starts_with("Error(s) found in configuration file")
            || line.starts_with("Fatal errors found in configuration")
        {
            continue;
        }
        let line = SEVERITY_PREFIX.replace(line, "");
        let line = DATE_PREFIX.replace(&line, "");
        let line = CONFIG_MARKER.replace(&line, "");
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    if lines.is_empty() {
        "haproxy reported an invalid configuration".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haptic_template::{AuxiliaryFiles, FileKind, RenderedFile};

    #[test]
    fn test_simplify_strips_severity_and_pid() {
        let raw = "[NOTICE]   (1) : haproxy version is 2.8.3\n\
                   [ALERT]    (17) : config : parsing [/tmp/t/haproxy.cfg:12] : unknown keyword 'bogus'\n\
                   [ALERT]    (17) : Error(s) found in configuration file : /tmp/t/haproxy.cfg\n";
        let simplified = simplify_diagnostics(raw);
        assert_eq!(
            simplified,
            "parsing [/tmp/t/haproxy.cfg:12] : unknown keyword 'bogus'"
        );
    }

    #[test]
    fn test_simplify_empty_falls_back() {
        assert_eq!(
            simplify_diagnostics(""),
            "haproxy reported an invalid configuration"
        );
    }

    #[test]
    fn test_write_bundle_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = AuxiliaryFiles::default();
        files.upsert(FileKind::Map, RenderedFile::new("hosts.map", "a 1\n"));
        files.upsert(FileKind::Certificate, RenderedFile::new("site.pem", "PEM\n"));
        files.upsert(FileKind::GeneralFile, RenderedFile::new("errors.http", "503\n"));
        files.upsert(FileKind::CrtList, RenderedFile::new("certs.list", "/ssl/site.pem\n"));
        let bundle = RenderedBundle {
            haproxy_cfg: "global\n".to_string(),
            files,
        };
        let cfg = write_bundle(&bundle, dir.path()).unwrap();
        assert_eq!(cfg, dir.path().join("haproxy.cfg"));
        assert!(dir.path().join("maps/hosts.map").exists());
        assert!(dir.path().join("ssl/site.pem").exists());
        assert!(dir.path().join("files/errors.http").exists());
        assert!(dir.path().join("files/certs.list").exists());
    }

    #[tokio::test]
    async fn test_check_valid_config_when_binary_present() {
        let check = HaproxyCheck::default();
        if !check.is_available() {
            return; // no haproxy on this machine
        }
        let dir = tempfile::tempdir().unwrap();
        let bundle = RenderedBundle {
            haproxy_cfg: "global\n  maxconn 100\ndefaults\n  mode http\n  timeout client 5s\n  timeout server 5s\n  timeout connect 5s\n".to_string(),
            files: AuxiliaryFiles::default(),
        };
        check.validate(&bundle, dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_invalid_config_when_binary_present() {
        let check = HaproxyCheck::default();
        if !check.is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let bundle = RenderedBundle {
            haproxy_cfg: "global\n  bogus-directive on\n".to_string(),
            files: AuxiliaryFiles::default(),
        };
        let err = check.validate(&bundle, dir.path()).await.unwrap_err();
        assert!(matches!(err, haptic_core::Error::HaproxyInvalid { .. }));
    }
}
