//! rfsmoke - run declarative smoke checks against a host in headless Chrome
//!
//! Exit status is 0 when every check passed, 1 when any check or page session
//! failed and 2 when the configuration could not be loaded or the browser could
//! not be started.

use clap::Parser;
use rfsmoke::HarnessConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "rfsmoke", version, about = "Per-URL smoke tests in a real headless browser")]
struct Cli {
    /// Suite configuration file
    #[arg(short, long, default_value = "smoke.json")]
    config: PathBuf,

    /// Origin prefixed to every configured path
    #[arg(long, default_value = "http://localhost:3002")]
    host: String,

    /// Navigation timeout per URL in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Maximum number of pages open at once (defaults to the CPU count)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,
}

impl Cli {
    fn harness(&self) -> HarnessConfig {
        let defaults = HarnessConfig::default();
        HarnessConfig {
            host: self.host.trim_end_matches('/').to_string(),
            config_path: self.config.clone(),
            navigation_timeout_ms: self.timeout_ms,
            concurrency: self.concurrency.unwrap_or(defaults.concurrency).max(1),
            headless: !self.headed,
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rfsmoke=info".into()),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let harness = cli.harness();
    let suites = match rfsmoke::config::load_suites(&harness.config_path) {
        Ok(suites) => suites,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    run(&harness, &suites).await
}

#[cfg(feature = "cdp")]
async fn run(harness: &HarnessConfig, suites: &[rfsmoke::Suite]) -> ExitCode {
    use rfsmoke::cdp::CdpBrowser;
    use rfsmoke::{BrowserDriver, Runner};

    let browser = match CdpBrowser::launch(harness) {
        Ok(browser) => browser,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let summary = tokio::select! {
        summary = Runner::new(harness, &browser).run(suites) => Some(summary),
        signal = shutdown_signal() => {
            log::warn!("received {}, closing the browser", signal);
            None
        }
    };

    if let Err(e) = browser.close().await {
        log::warn!("failed to close the browser: {}", e);
    }

    match summary {
        Some(summary) if summary.failures() == 0 => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
#[cfg_attr(not(feature = "cdp"), allow(dead_code))]
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                log::warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

#[cfg(not(feature = "cdp"))]
async fn run(_harness: &HarnessConfig, _suites: &[rfsmoke::Suite]) -> ExitCode {
    log::error!("rfsmoke was built without a browser backend; rebuild with `--features cdp`");
    ExitCode::from(2)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn terminate_ends_the_shutdown_wait() {
        let wait = tokio::spawn(shutdown_signal());
        // Let the handlers register first
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap().unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
