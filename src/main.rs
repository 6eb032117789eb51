use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use fluux_sandbox::{
    Config, ExecutionMode, ExecutionRequest, ExecutionResult, Outcome, SandboxExecutor,
};

/// Configuration file used when `--config` is not given (optional).
const DEFAULT_CONFIG_PATH: &str = "config/sandbox.toml";

/// Used when RUST_LOG is unset. Stdout and stderr carry the command's own output.
const DEFAULT_LOG_FILTER: &str = "fluux_sandbox=warn";

/// Same convention as coreutils `timeout`.
const EXIT_TIMED_OUT: i32 = 124;

/// 128 + SIGINT
const EXIT_CANCELLED: i32 = 130;

fn print_help() {
    println!(
        "\
fluux-sandbox v{}

Run a command under a sandbox backend with a timeout.

USAGE:
    fluux-sandbox [OPTIONS] [--] PROGRAM [ARGS...]
    fluux-sandbox [OPTIONS] --probe

OPTIONS:
    -c, --config <PATH>       TOML configuration file [default: {DEFAULT_CONFIG_PATH}, if present]
    -m, --mode <MODE>         none | spawn | container (overrides config)
    -t, --timeout-ms <MS>     Kill the command after MS milliseconds
    -C, --cwd <DIR>           Working directory for the command
        --json                Print the result as JSON instead of the raw streams
        --probe               Report whether the container runtime is available
    -h, --help                Print this help message and exit
    -V, --version             Print version and exit

EXIT STATUS:
    The command's own exit code, {EXIT_TIMED_OUT} if it timed out,
    {EXIT_CANCELLED} if interrupted, 128+N if killed by signal N.

ENVIRONMENT VARIABLES:
    RUST_LOG    Log level filter for tracing (e.g. fluux_sandbox=debug)
                Logs go to stderr.

EXAMPLES:
    fluux-sandbox -t 2000 -- sleep 5
    fluux-sandbox -m container -- make test
    RUST_LOG=fluux_sandbox=debug fluux-sandbox --probe",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, Default, PartialEq)]
struct Cli {
    config: Option<PathBuf>,
    mode: Option<ExecutionMode>,
    timeout_ms: Option<i64>,
    cwd: Option<PathBuf>,
    json: bool,
    probe: bool,
    help: bool,
    version: bool,
    command: Vec<String>,
}

fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = Cli::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => cli.help = true,
            "-V" | "--version" => cli.version = true,
            "--json" => cli.json = true,
            "--probe" => cli.probe = true,
            "-c" | "--config" => cli.config = Some(PathBuf::from(next_value(&mut args, &arg)?)),
            "-m" | "--mode" => cli.mode = Some(next_value(&mut args, &arg)?.parse()?),
            "-t" | "--timeout-ms" => {
                let raw = next_value(&mut args, &arg)?;
                let ms = raw
                    .parse::<i64>()
                    .with_context(|| format!("invalid timeout '{raw}'"))?;
                cli.timeout_ms = Some(ms);
            }
            "-C" | "--cwd" => cli.cwd = Some(PathBuf::from(next_value(&mut args, &arg)?)),
            "--" => {
                cli.command.extend(args.by_ref());
                break;
            }
            flag if flag.starts_with('-') => {
                bail!("unknown option '{flag}' (see --help)");
            }
            program => {
                // First positional starts the command; the rest is verbatim.
                cli.command.push(program.to_string());
                cli.command.extend(args.by_ref());
                break;
            }
        }
    }

    Ok(cli)
}

fn next_value<I>(args: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = String>,
{
    args.next().ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from {DEFAULT_CONFIG_PATH}");
            Config::load(DEFAULT_CONFIG_PATH)
        }
        None => Ok(Config::default()),
    }
}

/// Maps a result to this tool's own exit status.
fn exit_code(result: &ExecutionResult) -> i32 {
    match result.outcome() {
        Outcome::Succeeded => 0,
        Outcome::Failed(code) => code,
        Outcome::TimedOut => EXIT_TIMED_OUT,
        Outcome::Cancelled => EXIT_CANCELLED,
        Outcome::Killed(Some(signal)) => 128 + signal,
        Outcome::Killed(None) => 1,
    }
}

fn report(result: &ExecutionResult, json: bool, timeout_ms: Option<i64>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(result.stderr.as_bytes())?;

    if result.stdout_truncated || result.stderr_truncated {
        writeln!(stderr, "fluux-sandbox: output truncated at the configured capture limit")?;
    }
    if result.fallback {
        writeln!(
            stderr,
            "fluux-sandbox: container runtime unavailable, ran with backend '{}'",
            result.backend_used
        )?;
    }
    match result.outcome() {
        Outcome::TimedOut => writeln!(
            stderr,
            "fluux-sandbox: command timed out after {}ms and was killed",
            timeout_ms.unwrap_or_default()
        )?,
        Outcome::Cancelled => writeln!(stderr, "fluux-sandbox: command interrupted")?,
        Outcome::Killed(_) => writeln!(stderr, "fluux-sandbox: command {}", result.outcome())?,
        Outcome::Succeeded | Outcome::Failed(_) => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args(std::env::args().skip(1))?;

    if cli.version {
        println!("fluux-sandbox v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if cli.help {
        print_help();
        return Ok(());
    }

    // Initialize logging (RUST_LOG=debug for debug mode). Stdout belongs to the command.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let executor = SandboxExecutor::new(config.container.clone());

    if cli.probe {
        let runtime = &executor.container_config().runtime;
        if executor.is_container_runtime_available().await {
            println!("{runtime}: available");
            return Ok(());
        }
        println!("{runtime}: unavailable");
        std::process::exit(1);
    }

    let (program, args) = cli
        .command
        .split_first()
        .ok_or_else(|| anyhow!("no command given (see --help)"))?;

    let mut exec_config = config.sandbox.execution_config();
    if let Some(mode) = cli.mode {
        exec_config.mode = mode;
    }
    if let Some(ms) = cli.timeout_ms {
        exec_config.timeout_ms = Some(ms);
    }
    if let Some(cwd) = cli.cwd.clone() {
        exec_config.working_directory = Some(cwd);
    }
    debug!("Execution config: {exec_config:?}");

    let request = ExecutionRequest::new(program.as_str()).args(args.iter().cloned());
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler: never cancel.
            std::future::pending::<()>().await;
        }
    };
    let result = executor
        .execute_with_cancel(&request, &exec_config, ctrl_c)
        .await?;

    report(&result, cli.json, exec_config.timeout_ms)?;
    std::process::exit(exit_code(&result));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn result(exit_code: i32) -> ExecutionResult {
        ExecutionResult {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            cancelled: false,
            backend_used: ExecutionMode::Spawn,
            fallback: false,
            signal: None,
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(1),
        }
    }

    // ── parse_args ──────────────────────────────────────

    #[test]
    fn test_parse_options_and_command() {
        let cli =
            parse_args(args(&["-m", "container", "-t", "2000", "--", "sleep", "5"])).unwrap();
        assert_eq!(cli.mode, Some(ExecutionMode::Container));
        assert_eq!(cli.timeout_ms, Some(2000));
        assert_eq!(cli.command, vec!["sleep", "5"]);
    }

    #[test]
    fn test_command_flags_passed_verbatim() {
        let cli = parse_args(args(&["--json", "ls", "-la", "--color=never"])).unwrap();
        assert!(cli.json);
        assert_eq!(cli.command, vec!["ls", "-la", "--color=never"]);
    }

    #[test]
    fn test_parse_long_options() {
        let cli = parse_args(args(&[
            "--config", "sandbox.toml", "--cwd", "/tmp", "--probe",
        ]))
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("sandbox.toml")));
        assert_eq!(cli.cwd, Some(PathBuf::from("/tmp")));
        assert!(cli.probe);
        assert!(cli.command.is_empty());
    }

    #[test]
    fn test_negative_timeout_parses() {
        // Rejected later by the executor as a configuration error.
        let cli = parse_args(args(&["-t", "-1", "true"])).unwrap();
        assert_eq!(cli.timeout_ms, Some(-1));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args(&["--mode"])).is_err());
        assert!(parse_args(args(&["--mode", "vm", "true"])).is_err());
        assert!(parse_args(args(&["-t", "soon", "true"])).is_err());
        assert!(parse_args(args(&["--frobnicate", "true"])).is_err());
    }

    #[test]
    fn test_help_and_version_flags() {
        assert!(parse_args(args(&["-h"])).unwrap().help);
        assert!(parse_args(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_default_log_filter_is_quiet() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::WARN)
        );
    }

    // ── exit_code ───────────────────────────────────────

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(&result(0)), 0);
        assert_eq!(exit_code(&result(3)), 3);

        let mut timed_out = result(-1);
        timed_out.timed_out = true;
        assert_eq!(exit_code(&timed_out), EXIT_TIMED_OUT);

        let mut cancelled = result(-1);
        cancelled.cancelled = true;
        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);

        let mut killed = result(-1);
        killed.signal = Some(9);
        assert_eq!(exit_code(&killed), 137);
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let config = load_config(None).unwrap();
        // Unless the repository ships config/sandbox.toml, defaults apply.
        if !Path::new(DEFAULT_CONFIG_PATH).exists() {
            assert_eq!(config, Config::default());
        }
    }
}
