//! codemode - run agent-authored TypeScript programs in a sandbox
//!
//! ## Commands
//!
//! - `run`: validate, compile and execute a program, print the response envelope
//! - `check`: run the static validator and syntax checker only
//! - `compile`: print the JavaScript a program lowers to

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use codemode_core::obs::ExecutionSpan;
use codemode_core::{
    CapabilityRegistry, CodeExecutionTool, CompiledProgram, EngineConfig, ResponseEnvelope,
    SyntaxReport, ValidationVerdict,
};

#[derive(Parser, Debug)]
#[command(name = "codemode")]
#[command(author = "Stevedores Org")]
#[command(version = codemode_core::VERSION)]
#[command(about = "Sandboxed execution of agent-authored TypeScript programs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a program and print its response envelope
    Run {
        /// Program source file (`-` for stdin)
        file: PathBuf,

        /// Human-readable description of what the program does
        #[arg(short, long, default_value = "ad-hoc program")]
        description: String,

        /// Wall-clock budget in milliseconds (overrides config and env)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// JSON fixtures for capability modules: {"module": {"fn": result}}
        #[arg(short, long)]
        modules: Option<PathBuf>,

        /// Engine configuration file (TOML)
        #[arg(short, long, env = "CODEMODE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate and syntax-check a program without running it
    Check {
        /// Program source file (`-` for stdin)
        file: PathBuf,
    },

    /// Print the JavaScript a program compiles to
    Compile {
        /// Program source file (`-` for stdin)
        file: PathBuf,
    },
}

/// Output of `codemode check`.
#[derive(Debug, Serialize)]
struct CheckReport {
    valid: bool,
    validation: ValidationVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    syntax: Option<SyntaxReport>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codemode_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            file,
            description,
            timeout_ms,
            modules,
            config,
        } => {
            let envelope = cmd_run(
                &file,
                &description,
                timeout_ms,
                modules.as_deref(),
                config.as_deref(),
            )
            .await?;
            print_json(&envelope, cli.pretty)?;
            codemode_core::metrics::METRICS.flush();
            Ok(exit_code(envelope.is_success()))
        }
        Commands::Check { file } => {
            let report = cmd_check(&file)?;
            print_json(&report, cli.pretty)?;
            Ok(exit_code(report.valid))
        }
        Commands::Compile { file } => {
            let program = cmd_compile(&file)?;
            println!("{}", program.code);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Execute a program against fixture modules.
async fn cmd_run(
    file: &Path,
    description: &str,
    timeout_ms: Option<u64>,
    modules: Option<&Path>,
    config: Option<&Path>,
) -> Result<ResponseEnvelope> {
    let code = read_source(file)?;
    let registry = Arc::new(load_registry(modules)?);
    let config = load_config(config, &registry, timeout_ms)?;

    info!(
        modules = registry.len(),
        timeout_ms = config.timeout_ms,
        "running program"
    );

    let tool = CodeExecutionTool::new(registry, config).context("Failed to build engine")?;
    Ok(tool.run(&code, description).await)
}

/// Run the static stages only.
fn cmd_check(file: &Path) -> Result<CheckReport> {
    let code = read_source(file)?;
    let _span = ExecutionSpan::enter(&uuid::Uuid::new_v4().to_string(), &code);

    let validation = codemode_core::validate(&code);
    if !validation.is_valid() {
        return Ok(CheckReport {
            valid: false,
            validation,
            syntax: None,
        });
    }

    let syntax = codemode_core::check_syntax(&code);
    Ok(CheckReport {
        valid: syntax.valid,
        validation,
        syntax: Some(syntax),
    })
}

fn cmd_compile(file: &Path) -> Result<CompiledProgram> {
    let code = read_source(file)?;
    let _span = ExecutionSpan::enter(&uuid::Uuid::new_v4().to_string(), &code);
    codemode_core::compile(&code).context("Failed to compile program")
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read program from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read program {file:?}"))
}

fn load_registry(modules: Option<&Path>) -> Result<CapabilityRegistry> {
    let Some(path) = modules else {
        return Ok(CapabilityRegistry::empty());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read module fixtures {path:?}"))?;
    let fixtures: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Module fixtures {path:?} are not valid JSON"))?;
    CapabilityRegistry::from_fixtures(&fixtures).context("Invalid module fixtures")
}

/// File (or registry-sized defaults), then `CODEMODE_*` env, then flags.
fn load_config(
    path: Option<&Path>,
    registry: &CapabilityRegistry,
    timeout_ms: Option<u64>,
) -> Result<EngineConfig> {
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {path:?}"))?;
            toml::from_str(&raw).with_context(|| format!("Invalid config {path:?}"))?
        }
        None => EngineConfig::for_registry(registry),
    };

    let mut config = base
        .apply_env()
        .context("Invalid CODEMODE_* environment variable")?;
    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_core::FailureStage;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "codemode",
            "--verbose",
            "run",
            "program.ts",
            "--timeout-ms",
            "500",
            "--modules",
            "fixtures.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                file,
                timeout_ms,
                modules,
                description,
                ..
            } => {
                assert_eq!(file, PathBuf::from("program.ts"));
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(modules, Some(PathBuf::from("fixtures.json")));
                assert_eq!(description, "ad-hoc program");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_file() {
        assert!(Cli::try_parse_from(["codemode", "check"]).is_err());
    }

    #[test]
    fn test_load_config_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "engine.toml", "timeout_ms = 900\nmax_concurrent = 2\n");
        let registry = CapabilityRegistry::empty();

        let from_file = load_config(Some(&path), &registry, None).unwrap();
        assert_eq!(from_file.max_concurrent, 2);

        let overridden = load_config(Some(&path), &registry, Some(1234)).unwrap();
        assert_eq!(overridden.timeout_ms, 1234);

        assert!(load_config(Some(&path), &registry, Some(0)).is_err());
    }

    #[test]
    fn test_load_registry_from_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "fixtures.json", r#"{"news": {"headlines": ["a", "b"]}}"#);
        let registry = load_registry(Some(&path)).unwrap();
        assert_eq!(registry.module_names(), vec!["news"]);

        let bad = write(&dir, "bad.json", "[1, 2]");
        assert!(load_registry(Some(&bad)).is_err());
        assert!(load_registry(None).unwrap().is_empty());
    }

    #[test]
    fn test_cmd_check_reports_validation_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "env.ts", "return process.env.HOME");
        let report = cmd_check(&path).unwrap();
        assert!(!report.valid);
        assert!(report.syntax.is_none());

        let path = write(&dir, "broken.ts", "const = 1;");
        let report = cmd_check(&path).unwrap();
        assert!(!report.valid);
        assert!(!report.syntax.unwrap().diagnostics.is_empty());
    }

    #[test]
    fn test_cmd_compile_prints_javascript() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "typed.ts", "const n: number = 1;\nreturn n;");
        let program = cmd_compile(&path).unwrap();
        assert!(!program.code.contains(": number"));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = cmd_compile(Path::new("/definitely/not/here.ts")).unwrap_err();
        assert!(err.to_string().contains("Failed to read program"));
    }

    #[tokio::test]
    async fn test_cmd_run_with_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = write(&dir, "fixtures.json", r#"{"news": {"headlines": ["a", "b"]}}"#);
        let program = write(
            &dir,
            "headlines.ts",
            "import news from 'news';\n\
             const h: string[] = await news.headlines();\n\
             return { summary: `${h.length} headlines`, data: h };",
        );

        let envelope = cmd_run(&program, "headlines", Some(5_000), Some(&fixtures), None)
            .await
            .unwrap();
        let success = envelope.as_success().expect("success envelope");
        assert_eq!(success.result.summary, "2 headlines");
    }

    #[tokio::test]
    async fn test_cmd_run_reports_contract_failure() {
        let dir = tempfile::tempdir().unwrap();
        let program = write(&dir, "five.ts", "return 5;");
        let envelope = cmd_run(&program, "five", Some(5_000), None, None)
            .await
            .unwrap();
        assert_eq!(envelope.as_failure().unwrap().stage, FailureStage::Contract);
    }
}
