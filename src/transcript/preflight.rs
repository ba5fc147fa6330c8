use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::TranscriptConfig;
use crate::error::PipelineError;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// What every fetch in a run uses, resolved once by preflight
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub ytdlp_path: String,
    /// `socks5://host:port`, dropped when the proxy was unreachable
    pub proxy_url: Option<String>,
    /// Deno binary handed to yt-dlp, dropped when missing
    pub deno_path: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PreflightResult {
    pub ok: bool,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub config: RuntimeConfig,
}

/// Hard failures always fail; warnings fail only in strict mode
pub fn verdict(failures: &[String], warnings: &[String], strict: bool) -> bool {
    failures.is_empty() && (!strict || warnings.is_empty())
}

/// Check the subtitle tool, optional JS runtime and optional SOCKS proxy
pub async fn run_preflight(config: &TranscriptConfig) -> PreflightResult {
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    let proxy_url = format!("socks5://{}:{}", config.proxy_host, config.proxy_port);
    let mut runtime = RuntimeConfig {
        ytdlp_path: config.ytdlp_path.clone(),
        proxy_url: Some(proxy_url.clone()),
        deno_path: config.use_deno_runtime.then(|| config.resolved_deno_path()),
        timeout: Duration::from_millis(config.timeout_ms),
    };

    if let Err(e) = tool_version(&config.ytdlp_path).await {
        failures.push(format!("{} is not runnable: {}", config.ytdlp_path, e));
    }

    if let Some(deno) = &runtime.deno_path {
        if !tokio::fs::try_exists(deno).await.unwrap_or(false) {
            warnings.push(format!(
                "Deno runtime not found at {}; yt-dlp will use its default JS runtime",
                deno.display()
            ));
            runtime.deno_path = None;
        }
    }

    if !proxy_reachable(&config.proxy_host, config.proxy_port).await {
        warnings.push(format!(
            "SOCKS proxy {} is unreachable; fetching captions directly",
            proxy_url
        ));
        runtime.proxy_url = None;
    }

    PreflightResult {
        ok: verdict(&failures, &warnings, config.strict_preflight),
        failures,
        warnings,
        config: runtime,
    }
}

async fn tool_version(path: &str) -> Result<String> {
    let output = tokio::time::timeout(
        VERSION_CHECK_TIMEOUT,
        Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow!("--version timed out"))??;

    if !output.status.success() {
        return Err(anyhow!("--version exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn proxy_reachable(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROXY_CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

impl PreflightResult {
    pub fn log(&self) {
        for failure in &self.failures {
            error!("[preflight] {}", failure);
        }
        for warning in &self.warnings {
            warn!("[preflight] {}", warning);
        }
        if self.ok {
            info!(
                "[preflight] ✅ ready (proxy: {}, deno: {})",
                self.config.proxy_url.as_deref().unwrap_or("direct"),
                self.config
                    .deno_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "default".to_string())
            );
        } else {
            error!("[preflight] ❌ not ready");
        }
    }

    /// The resolved runtime, or `PreflightFailed` naming every problem
    pub fn into_runtime(self) -> Result<RuntimeConfig, PipelineError> {
        if self.ok {
            Ok(self.config)
        } else {
            let mut reasons = self.failures;
            reasons.extend(self.warnings);
            Err(PipelineError::PreflightFailed(reasons))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_verdict() {
        assert!(verdict(&[], &[], true));
        assert!(!verdict(&s(&["no yt-dlp"]), &[], false));
        assert!(!verdict(&[], &s(&["no proxy"]), true));
        assert!(verdict(&[], &s(&["no proxy"]), false));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("yt-dlp");
        std::fs::write(&path, "#!/bin/sh\necho 2025.01.15\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_missing_tool_is_fatal_even_when_lenient() {
        let config = TranscriptConfig {
            ytdlp_path: "/nonexistent/yt-dlp".to_string(),
            strict_preflight: false,
            use_deno_runtime: false,
            proxy_port: closed_port().await,
            ..TranscriptConfig::default()
        };

        let result = run_preflight(&config).await;
        assert!(!result.ok);
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(
            result.into_runtime(),
            Err(PipelineError::PreflightFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_degraded_mode_drops_proxy_and_deno() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TranscriptConfig {
            ytdlp_path: fake_tool(dir.path()),
            strict_preflight: false,
            use_deno_runtime: true,
            deno_path: Some(dir.path().join("missing-deno")),
            proxy_port: closed_port().await,
            ..TranscriptConfig::default()
        };

        let result = run_preflight(&config).await;
        assert!(result.ok);
        assert!(result.failures.is_empty());
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.config.proxy_url, None);
        assert_eq!(result.config.deno_path, None);

        let strict = TranscriptConfig {
            strict_preflight: true,
            ..config
        };
        assert!(!run_preflight(&strict).await.ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reachable_proxy_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = TranscriptConfig {
            ytdlp_path: fake_tool(dir.path()),
            use_deno_runtime: false,
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: port,
            ..TranscriptConfig::default()
        };

        let result = run_preflight(&config).await;
        assert!(result.ok, "{:?}", result.warnings);
        assert_eq!(
            result.config.proxy_url,
            Some(format!("socks5://127.0.0.1:{}", port))
        );
    }
}
