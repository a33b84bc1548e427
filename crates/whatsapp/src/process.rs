//! Supervision of the Node sidecar that drives WhatsApp Web.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    courier_config::WhatsAppConfig,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

const SIDECAR_DIR_ENV: &str = "COURIER_WHATSAPP_SIDECAR_DIR";
const SIDECAR_REL_PATH: &str = "sidecar/whatsapp-web";
const ENTRY_POINT: &str = "dist/index.js";

/// How long a freshly spawned sidecar must survive before we trust it.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running sidecar child process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then SIGKILL if it has not exited within five seconds.
    pub async fn stop(&mut self) {
        info!("stopping WhatsApp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar"),
            Err(_) => {
                warn!("sidecar ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory holding the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
    /// Where WhatsApp Web keeps its login session.
    pub auth_dir: Option<PathBuf>,
}

impl SidecarConfig {
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self> {
        Ok(Self {
            sidecar_dir: find_sidecar_dir(config.sidecar_dir.as_deref())?,
            port: config.sidecar_port,
            auth_dir: config.auth_dir.clone(),
        })
    }
}

/// Locate the sidecar.
///
/// Order: explicit path, `COURIER_WHATSAPP_SIDECAR_DIR`, next to the
/// executable, then relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if has_package_json(path) {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in sidecar directory {}", path.display());
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package_json(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} is set but has no package.json");
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        for up in ["..", "../.."] {
            let candidate = exe_dir.join(up).join(SIDECAR_REL_PATH);
            if has_package_json(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for up in [".", "..", "../.."] {
        let candidate = Path::new(up).join(SIDECAR_REL_PATH);
        if has_package_json(&candidate) {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    bail!(
        "WhatsApp sidecar not found; set {SIDECAR_DIR_ENV} or [whatsapp] sidecar_dir, \
         or place it at ./{SIDECAR_REL_PATH}"
    )
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// Build the sidecar if needed, spawn it, and forward its output to tracing.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !has_package_json(dir) {
        bail!(
            "WhatsApp sidecar not found at {}; run `npm install && npm run build` there",
            dir.display()
        );
    }

    if !dir.join(ENTRY_POINT).exists() {
        info!(path = %dir.display(), "sidecar not built yet, building");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar");

    let mut cmd = Command::new("node");
    cmd.arg(ENTRY_POINT)
        .current_dir(dir)
        .env("COURIER_WHATSAPP_PORT", config.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(auth_dir) = &config.auth_dir {
        cmd.env("COURIER_WHATSAPP_AUTH_DIR", auth_dir);
    }

    let mut child = cmd.spawn().context("failed to spawn node for the sidecar")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_stdout_line(&line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{line}");
            }
        });
    }

    tokio::time::sleep(STARTUP_GRACE).await;
    if let Some(status) = child.try_wait().context("failed to poll sidecar")? {
        bail!("sidecar exited during startup with {status}");
    }

    info!(port = config.port, "WhatsApp sidecar running");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    debug!(path = %dir.display(), ?args, "running npm");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "npm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Parse a pino JSON line into `(level, msg)`. Missing levels count as info (30).
fn parse_pino(line: &str) -> Option<(u64, String)> {
    if !line.starts_with('{') {
        return None;
    }
    let log: serde_json::Value = serde_json::from_str(line).ok()?;
    let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
    let msg = log
        .get("msg")
        .and_then(|v| v.as_str())
        .unwrap_or(line)
        .to_string();
    Some((level, msg))
}

fn forward_stdout_line(line: &str) {
    match parse_pino(line) {
        Some((0..=20, msg)) => debug!(target: "whatsapp_sidecar", "{msg}"),
        Some((21..=30, msg)) => info!(target: "whatsapp_sidecar", "{msg}"),
        Some((31..=40, msg)) => warn!(target: "whatsapp_sidecar", "{msg}"),
        Some((_, msg)) => error!(target: "whatsapp_sidecar", "{msg}"),
        None => info!(target: "whatsapp_sidecar", "{line}"),
    }
}
