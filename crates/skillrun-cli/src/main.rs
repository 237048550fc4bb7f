#![deny(unsafe_code)]

//! skillrun CLI: run, validate and inspect sandboxed skills.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use skillrun_config::{ConfigError, EgressMode, ExecutionOptions, RunnerConfig, SecretValue};
use skillrun_core::build_info::{LONG_VERSION, VERSION_LINE};
use skillrun_core::{RunnerError, SkillInput, SkillRunner, load_manifest};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// skillrun: run untrusted skills in hardened, single-use containers.
#[derive(Parser)]
#[command(name = "skillrun", version = VERSION_LINE, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "skillrun.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a skill and print its output as JSON.
    Run(RunArgs),

    /// Validate a skill manifest and print a summary.
    Validate {
        /// Skill directory containing skill.yaml.
        skill_dir: PathBuf,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Skill directory containing skill.yaml and a Dockerfile.
    skill_dir: PathBuf,

    /// JSON input file, or `-` for stdin. Defaults to `{}`.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Environment variable for the container (`KEY=VALUE`, or `KEY` to
    /// forward from this process). Repeatable.
    #[arg(short, long = "env", value_name = "KEY[=VALUE]")]
    env: Vec<String>,

    /// Network posture: `allowlist` or `none`.
    #[arg(long)]
    egress: Option<EgressMode>,

    /// Wall-clock timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Memory limit in MiB.
    #[arg(long)]
    memory: Option<u64>,

    /// CPU quota (fraction of one core).
    #[arg(long)]
    cpus: Option<f64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await;
    let level = match (cli.verbose, &config) {
        (0, Ok(config)) => config.logging.level.as_str(),
        (0, Err(_)) => "info",
        (1, _) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let result = match config {
        Ok(config) => dispatch(cli.command, &cli.config, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", render_error(&err));
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config_path: &Path, config: RunnerConfig) -> Result<()> {
    match command {
        Commands::Run(args) => cmd_run(args, &config).await,
        Commands::Validate { skill_dir } => cmd_validate(&skill_dir).await,
        Commands::Config { show } => cmd_config(config_path, &config, show),
    }
}

async fn cmd_run(args: RunArgs, config: &RunnerConfig) -> Result<()> {
    let data = read_input(args.input.as_deref()).await?;
    let options = run_options(&args, config)?;

    info!(skill_dir = %args.skill_dir.display(), "Running skill");
    let runner = SkillRunner::from_config(config);
    let output = runner
        .execute(&SkillInput::new(&args.skill_dir, data), Some(&options))
        .await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_validate(skill_dir: &Path) -> Result<()> {
    let manifest = load_manifest(skill_dir).await?;

    println!("{} {} (risk: {})", manifest.name, manifest.version, manifest.risk_level);
    println!("  {}", manifest.description);
    if manifest.egress().is_empty() {
        println!("  egress: none");
    } else {
        println!("  egress:");
        for rule in manifest.egress() {
            println!("    - {} ({})", rule.domain, rule.reason);
        }
    }
    if manifest.required_env_vars().is_empty() {
        println!("  required env: none");
    } else {
        println!("  required env: {}", manifest.required_env_vars().join(", "));
    }
    Ok(())
}

fn cmd_config(config_path: &Path, config: &RunnerConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render config")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<RunnerConfig> {
    if path.exists() {
        Ok(RunnerConfig::load(path).await?)
    } else {
        Ok(RunnerConfig::default())
    }
}

/// Per-call overrides from the command line.
///
/// `--env` values extend the configured env vars rather than replacing them.
fn run_options(args: &RunArgs, config: &RunnerConfig) -> Result<ExecutionOptions> {
    let mut options = ExecutionOptions {
        memory_mb: args.memory,
        cpus: args.cpus,
        timeout_seconds: args.timeout,
        egress_mode: args.egress,
        ..ExecutionOptions::default()
    };

    if !args.env.is_empty() {
        let mut env = config.defaults.env_vars.clone().unwrap_or_default();
        for spec in &args.env {
            let (key, value) = parse_env(spec)?;
            env.insert(key, value);
        }
        options.env_vars = Some(env);
    }
    Ok(options)
}

fn parse_env(spec: &str) -> Result<(String, SecretValue)> {
    match spec.split_once('=') {
        Some(("", _)) => bail!("invalid --env {spec:?}: empty variable name"),
        Some((key, value)) => Ok((key.to_string(), SecretValue::new(value))),
        None => {
            let value = std::env::var(spec)
                .with_context(|| format!("--env {spec}: not set in the environment"))?;
            Ok((spec.to_string(), SecretValue::new(value)))
        }
    }
}

async fn read_input(path: Option<&Path>) -> Result<Map<String, Value>> {
    let raw = match path {
        None => return Ok(Map::new()),
        Some(p) if p == Path::new("-") => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read input from stdin")?;
            buf
        }
        Some(p) => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("failed to read input file {}", p.display()))?,
    };
    parse_input(&raw)
}

fn parse_input(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("input must be a JSON object"),
    }
}

/// `error[CODE]: message` for known error kinds.
fn render_error(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<RunnerError>() {
        format!("error[{}]: {e}", e.code())
    } else if err.downcast_ref::<ConfigError>().is_some() {
        format!("error[CONFIG_ERROR]: {err:#}")
    } else {
        format!("error: {err:#}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let args = run_args(&[
            "skillrun", "run", "skills/echo", "--egress", "none", "--timeout", "5", "--memory",
            "128", "--cpus", "1.5", "-e", "A=1", "--env", "B=2",
        ]);
        assert_eq!(args.skill_dir, PathBuf::from("skills/echo"));
        assert_eq!(args.egress, Some(EgressMode::None));
        assert_eq!(args.timeout, Some(5));
        assert_eq!(args.env, vec!["A=1", "B=2"]);
    }

    #[test]
    fn test_rejects_unknown_egress_mode() {
        assert!(Cli::try_parse_from(["skillrun", "run", "x", "--egress", "open"]).is_err());
    }

    #[test]
    fn test_run_options_extend_config_env() {
        let config = RunnerConfig::parse("[defaults.env_vars]\nBASE = \"b\"\nA = \"old\"\n").unwrap();
        let args = run_args(&["skillrun", "run", "x", "-e", "A=new", "--timeout", "9"]);

        let options = run_options(&args, &config).unwrap();
        let env = options.env_vars.unwrap();
        assert_eq!(env.get("A").map(SecretValue::expose), Some("new"));
        assert_eq!(env.get("BASE").map(SecretValue::expose), Some("b"));
        assert_eq!(options.timeout_seconds, Some(9));
        assert_eq!(options.memory_mb, None);
    }

    #[test]
    fn test_run_options_without_env_keep_defaults() {
        let args = run_args(&["skillrun", "run", "x"]);
        let options = run_options(&args, &RunnerConfig::default()).unwrap();
        assert_eq!(options, ExecutionOptions::default());
    }

    #[test]
    fn test_parse_env() {
        let (k, v) = parse_env("TOKEN=a=b").unwrap();
        assert_eq!(k, "TOKEN");
        assert_eq!(v.expose(), "a=b");
        assert!(parse_env("=x").is_err());
        assert!(parse_env("SKILLRUN_TEST_SURELY_UNSET_VAR").is_err());
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(r#"{"a": 1}"#).unwrap().len(), 1);
        assert!(parse_input("[1]").is_err());
        assert!(parse_input("nope").is_err());
    }

    #[tokio::test]
    async fn test_read_input_defaults_to_empty_object() {
        assert!(read_input(None).await.unwrap().is_empty());

        let tmp = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(tmp.path(), br#"{"city": "Faro"}"#).await.unwrap();
        let data = read_input(Some(tmp.path())).await.unwrap();
        assert_eq!(data.get("city"), Some(&Value::from("Faro")));
    }

    #[test]
    fn test_render_error_codes() {
        let err = anyhow::Error::from(RunnerError::Timeout {
            timeout_secs: 3,
            container: "skill-x-1".to_string(),
        });
        assert_eq!(
            render_error(&err),
            "error[CONTAINER_TIMEOUT]: container \"skill-x-1\" exceeded timeout of 3s"
        );

        let err = anyhow::Error::from(ConfigError::Validation("bad".to_string()));
        assert!(render_error(&err).starts_with("error[CONFIG_ERROR]: "));

        assert_eq!(render_error(&anyhow::anyhow!("plain")), "error: plain");
    }

    #[tokio::test]
    async fn test_missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/skillrun.toml")).await.unwrap();
        assert_eq!(config.engine.docker_bin, "docker");
    }

    #[test_log::test(tokio::test)]
    async fn test_validate_fixture_skill() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../skillrun-core/tests/fixtures/egress");
        cmd_validate(&dir).await.unwrap();
    }
}
