mod config;
mod data_dir;
mod heartbeat;
mod marker;
mod probe;
mod retry;
#[cfg(feature = "serve")]
mod serve;
mod signals;
mod status;
mod supervisor;

use clap::{Parser, Subcommand};
use config::HealthConfig;
use data_dir::DataDir;
use probe::LivenessProbe;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Liveness signaling for the hertz service: probe the heartbeat marker,
/// keep it fresh, and supervise a process against it.
#[derive(Parser, Debug)]
#[command(name = "hertz-health", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "hertz-health.toml")]
    config: PathBuf,

    /// Data directory (overrides config and DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Staleness threshold in seconds (overrides config)
    #[arg(long, global = true)]
    threshold: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the health marker once; exit 0 when healthy, 1 otherwise (default)
    Check,
    /// Keep the health marker fresh until interrupted
    Heartbeat {
        /// Write a single heartbeat and exit
        #[arg(long)]
        once: bool,
    },
    /// Run a command and restart it when the probe keeps failing
    Supervise {
        /// Command and arguments to supervise
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show the marker's age; exit code mirrors `check`
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the data directory layout
    Init,
    /// Serve the probe over HTTP
    #[cfg(feature = "serve")]
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the resolved configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.as_ref().unwrap_or(&Command::Check);

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&cli, None);
            tracing::error!(error = %e, "configuration error");
            // The probe fails closed: a broken config is an unhealthy check.
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&cli, Some(&config));
    tracing::debug!(?cli, "parsed CLI arguments");

    match command {
        Command::Check => {
            // Faults are logged, never dumped as a trace into the health log.
            std::panic::set_hook(Box::new(|info| {
                tracing::error!(%info, "probe fault");
            }));
            exit_code(run_check(&config))
        }
        Command::Status { json } => exit_code(run_status(&config, *json)),
        Command::Init => run_init(&config),
        Command::Config => match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                print!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to render config");
                ExitCode::FAILURE
            }
        },
        Command::Heartbeat { once } => run_async(run_heartbeat(&config, *once)),
        Command::Supervise { command } => run_async(run_supervise(&config, command)),
        #[cfg(feature = "serve")]
        Command::Serve { port } => {
            let mut config = config.clone();
            if let Some(port) = port {
                config.serve.port = *port;
            }
            run_async(async move {
                let shutdown = signals::ShutdownSignal::install()?;
                serve::run(&config, shutdown.subscribe()).await
            })
        }
    }
}

/// Defaults, then the config file, then environment, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<HealthConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    config.apply_env();
    if let Some(dir) = &cli.data_dir {
        config.paths.data_dir = dir.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.probe.staleness_threshold_secs = threshold;
    }
    config.validate()?;
    Ok(config)
}

/// Logs go to stderr so stdout carries only the probe verdict.
fn init_tracing(cli: &Cli, config: Option<&HealthConfig>) {
    use tracing_subscriber::EnvFilter;

    let fallback = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "error".to_string()
    } else {
        config
            .map(HealthConfig::log_directive)
            .unwrap_or_else(|| "info".to_string())
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn liveness_probe(config: &HealthConfig) -> LivenessProbe {
    let dd = DataDir::from_config(&config.paths);
    LivenessProbe::new(dd.marker(), config.probe.staleness_threshold())
}

/// Single-shot probe. Prints the verdict and returns the exit status.
fn run_check(config: &HealthConfig) -> i32 {
    let report = probe::run_guarded(&liveness_probe(config));
    println!("{report}");
    report.outcome().exit_code()
}

fn run_status(config: &HealthConfig, json: bool) -> i32 {
    let probe = liveness_probe(config);
    let status = status::MarkerStatus::collect(&probe, chrono::Utc::now().timestamp());

    if json {
        match serde_json::to_string_pretty(&status) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                tracing::error!(error = %e, "failed to render status");
                return 1;
            }
        }
    } else {
        println!("{}: {}", status.path.display(), status.describe());
    }

    if status.healthy {
        0
    } else {
        1
    }
}

fn run_init(config: &HealthConfig) -> ExitCode {
    let dd = DataDir::from_config(&config.paths);
    match dd.init() {
        Ok(created) => {
            tracing::info!(
                root = %dd.root().display(),
                cache = %dd.cache_dir().display(),
                cache_limit_bytes = config.cache.limit_bytes(),
                created,
                "data directory ready"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(
                root = %dd.root().display(),
                error = %e,
                "failed to initialize data directory"
            );
            ExitCode::FAILURE
        }
    }
}

async fn run_heartbeat(
    config: &HealthConfig,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dd = DataDir::from_config(&config.paths);
    let writer = heartbeat::HeartbeatWriter::new(
        dd.marker(),
        Duration::from_secs(config.heartbeat.interval_secs),
        Duration::from_secs(config.heartbeat.error_retry_secs),
    );

    if once {
        let timestamp = writer.beat_once()?;
        tracing::info!(timestamp, marker = %dd.marker().display(), "heartbeat written");
        return Ok(());
    }

    heartbeat::check_cadence(
        Duration::from_secs(config.heartbeat.interval_secs),
        config.probe.staleness_threshold(),
    );
    let shutdown = signals::ShutdownSignal::install()?;
    writer.run(shutdown.subscribe()).await;
    Ok(())
}

async fn run_supervise(
    config: &HealthConfig,
    command: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let Some((program, args)) = command.split_first() else {
        return Err("no command given to supervise".into());
    };

    let dd = DataDir::from_config(&config.paths);
    dd.init()?;

    let mut child = supervisor::ChildProcess::new(
        program.clone(),
        args.to_vec(),
        Duration::from_secs(config.supervisor.stop_grace_secs),
    );
    child.spawn()?;

    let schedule = supervisor::ProbeSchedule::from_config(&config.supervisor);
    let supervisor = supervisor::Supervisor::new(liveness_probe(config), child, schedule)
        .with_status(status::StatusTracker::new(dd.status()));

    let shutdown = signals::ShutdownSignal::install()?;
    let restarts = supervisor.run(shutdown.subscribe()).await?;
    tracing::info!(restarts, "supervisor exited");
    Ok(())
}

fn run_async<F>(fut: F) -> ExitCode
where
    F: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(fut) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn config_in(dir: &std::path::Path) -> HealthConfig {
        let mut config = HealthConfig::default();
        config.paths.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_defaults_to_check() {
        let cli = parse(&["hertz-health"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_supervise_takes_trailing_command() {
        let cli = parse(&["hertz-health", "supervise", "--", "python", "-m", "hertz"]);
        match cli.command {
            Some(Command::Supervise { command }) => {
                assert_eq!(command, vec!["python", "-m", "hertz"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("hertz-health.toml");
        std::fs::write(&config_path, "[probe]\nstaleness_threshold_secs = 90\n").unwrap();

        let cli = parse(&[
            "hertz-health",
            "--config",
            config_path.to_str().unwrap(),
            "--data-dir",
            "/tmp/hertz-data",
            "--threshold",
            "45",
            "check",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("/tmp/hertz-data"));
        assert_eq!(config.probe.staleness_threshold_secs, 45);
    }

    #[test]
    fn test_invalid_threshold_is_config_error() {
        let cli = parse(&["hertz-health", "--threshold", "0"]);
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn test_check_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let marker = DataDir::from_config(&config.paths).marker();
        let now = chrono::Utc::now().timestamp();

        std::fs::write(&marker, (now - 5).to_string()).unwrap();
        assert_eq!(run_check(&config), 0);

        std::fs::write(&marker, (now - 45).to_string()).unwrap();
        assert_ne!(run_check(&config), 0);

        std::fs::write(&marker, "abc").unwrap();
        assert_ne!(run_check(&config), 0);

        std::fs::remove_file(&marker).unwrap();
        assert_ne!(run_check(&config), 0);
        assert!(!marker.exists());
    }

    #[test]
    fn test_status_exit_code_mirrors_probe() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(run_status(&config, true), 1);

        crate::marker::write_now(&DataDir::from_config(&config.paths).marker()).unwrap();
        assert_eq!(run_status(&config, false), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_once_makes_check_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        run_heartbeat(&config, true).await.unwrap();
        assert_eq!(run_check(&config), 0);
    }
}
