use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warden_basic::{AuthOutcome, BasicAuthenticator, BasicSettings, HelperVerifier, Verification};
use warden_config::WardenConfig;
use warden_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha};

use crate::error::{AppError, AppResult};

/// Environment variable naming the configuration document.
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

/// Header values read ahead of the verdicts being written.
const READ_AHEAD: usize = 256;

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    config: WardenConfig,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let path = std::env::var(CONFIG_ENV).map_err(|_| AppError::MissingEnv { name: CONFIG_ENV })?;
        let config = warden_config::load_from_path(&path)
            .await
            .map_err(|err| AppError::config("config.load", err))?;
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self { config, metrics })
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging or authenticator startup fails,
/// or if stdin/stdout fail while serving.
pub async fn run_app() -> AppResult<()> {
    let BootstrapDependencies { config, metrics } = BootstrapDependencies::from_env().await?;

    let logging = LoggingConfig {
        level: &config.logging.level,
        format: LogFormat::from_name(config.logging.format.as_deref()),
        build_sha: build_sha(),
    };
    warden_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    serve(&config, metrics, stdin, stdout, interrupt).await
}

/// Answer one header value per input line until `input` closes or `interrupt`
/// resolves.
///
/// Each verdict is written as `OK <user>` or `ERR <message>`, in input order.
/// Requests are verified concurrently; a slow helper only delays output.
///
/// # Errors
///
/// Returns an error if the helper pool cannot start or if reading or writing
/// fails.
pub async fn serve<R, W, S>(
    config: &WardenConfig,
    metrics: Metrics,
    input: R,
    mut output: W,
    interrupt: S,
) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    info!(configured = config.basic.configured(), "warden starting");
    debug!(settings = %config.basic.dump("auth_param"), "effective settings");

    let verifier =
        Arc::new(HelperVerifier::start(&config.basic).map_err(|err| AppError::basic("helper_pool.start", err))?);
    let pool = Arc::clone(verifier.pool());
    let auth = BasicAuthenticator::with_metrics(
        BasicSettings::from(&config.basic),
        verifier,
        metrics.clone(),
    )
    .map_err(|err| AppError::basic("authenticator.new", err))?;

    let (tx, mut rx) = mpsc::channel::<Verification>(READ_AHEAD);

    let reader = async {
        let mut lines = input.lines();
        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                () = &mut interrupt => {
                    info!("interrupt received; shutting down");
                    auth.shutdown();
                    break;
                }
                line = lines.next_line() => {
                    match line.map_err(|err| AppError::io("stdin.read", err))? {
                        Some(line) => {
                            let header = line.trim_end_matches('\r');
                            if tx.send(auth.verify(header)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        drop(tx);
        Ok::<(), AppError>(())
    };

    let writer = async {
        while let Some(verification) = rx.recv().await {
            let line = render(&verification.outcome().await);
            output
                .write_all(line.as_bytes())
                .await
                .map_err(|err| AppError::io("stdout.write", err))?;
            output
                .flush()
                .await
                .map_err(|err| AppError::io("stdout.flush", err))?;
        }
        Ok::<(), AppError>(())
    };

    let (read, written) = tokio::join!(reader, writer);

    auth.shutdown();
    pool.shutdown().await;
    let stats = serde_json::json!({ "basic": auth.stats(), "helpers": pool.stats() });
    info!(stats = %stats, "warden stopped");

    read?;
    written
}

fn render(outcome: &AuthOutcome) -> String {
    match outcome {
        AuthOutcome::Authenticated(identity) => {
            format!("OK {}\n", identity.username().unwrap_or_default())
        }
        AuthOutcome::Denied { denial, .. } => format!("ERR {}\n", denial.deny_message()),
    }
}
