use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minus::{ExitStrategy, Pager, page_all};
use stratum_engine::{
    Orchestrator, ProviderRegistry, SimulatedCloud, StackConfig, build_stack, default_state_path,
    load_inventory, load_state, save_inventory, save_state,
};
use stratum_report::{
    ColorChoice, OutputFormat, RenderOptions, redact_sensitive, render_plan, render_report,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod error;

pub use error::CliError;

const LOG_ENV: &str = "STRATUM_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "stratum",
    about = "Provision the EFK logging stack and its workload as one dependency graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every step, its dependencies and the execution order without calling out.
    Preview {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        render: RenderFlags,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Execute the plan and record what was provisioned.
    Up {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        state: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = BackendArg::Simulated)]
        backend: BackendArg,
        #[command(flatten)]
        render: RenderFlags,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Simulated,
}

#[derive(Debug, Clone, Args)]
struct RenderFlags {
    #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    #[arg(long)]
    verbose: bool,
}

impl RenderFlags {
    fn render_options(&self, stack: &str) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
            ..RenderOptions::for_stack(stack)
        }
    }
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::Preview { render, .. } | Self::Up { render, .. } => render.verbose,
        }
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when argument parsing fails (excluding help/version) or command
/// execution fails.
pub fn run() -> std::result::Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> std::result::Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(error.into()),
        },
    };
    init_logging(cli.command.verbose());

    match cli.command {
        Commands::Preview {
            config,
            render,
            format,
        } => preview(&config, &render, format.into()),
        Commands::Up {
            config,
            state,
            backend,
            render,
            format,
        } => up(&config, state, backend, &render, format.into()),
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn preview(
    config_path: &Path,
    render: &RenderFlags,
    format: OutputFormat,
) -> std::result::Result<i32, CliError> {
    let config = StackConfig::load(config_path)?;
    let plan = build_stack(&config)?;
    let description = plan.describe();
    let rendered = render_plan(&description, format, &render.render_options(&config.stack))?;
    emit_output(&rendered, format, &plan.sensitive_values().snapshot());
    Ok(i32::from(description.has_errors()))
}

fn up(
    config_path: &Path,
    state: Option<PathBuf>,
    backend: BackendArg,
    render: &RenderFlags,
    format: OutputFormat,
) -> std::result::Result<i32, CliError> {
    let config = StackConfig::load(config_path)?;
    let state_path = match state {
        Some(path) => path,
        None => default_state_path(&config.stack)?,
    };
    let previous = load_state(&state_path)?;
    debug!(path = %state_path.display(), steps = previous.len(), "loaded provisioning state");
    let plan = build_stack(&config)?;

    let cloud = match backend {
        BackendArg::Simulated => {
            let inventory_path = simulated_inventory_path(&state_path);
            Arc::new(SimulatedCloud::from_inventory(load_inventory(
                &inventory_path,
            )?))
        }
    };
    let orchestrator = Orchestrator::new(ProviderRegistry::from_backend(Arc::clone(&cloud)));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| CliError::Runtime { source })?;
    let execution = runtime.block_on(orchestrator.execute(plan, previous))?;

    save_state(&state_path, &execution.state)?;
    match backend {
        BackendArg::Simulated => {
            save_inventory(&simulated_inventory_path(&state_path), &cloud.inventory())?;
        }
    }
    info!(path = %state_path.display(), steps = execution.state.len(), "saved provisioning state");

    let rendered = render_report(
        &execution.report,
        format,
        &render.render_options(&config.stack),
    )?;
    emit_output(&rendered, format, &execution.sensitive_values);
    if let Some(error) = &execution.error {
        eprintln!(
            "{}",
            redact_sensitive(&format!("error: {error}"), &execution.sensitive_values)
        );
    }
    Ok(i32::from(execution.error.is_some()))
}

/// The simulated world lives next to the state file it belongs to.
fn simulated_inventory_path(state_path: &Path) -> PathBuf {
    state_path.with_extension("simulated.json")
}

fn emit_output(rendered: &str, format: OutputFormat, sensitive_values: &BTreeSet<String>) {
    let redacted = redact_sensitive(rendered, sensitive_values);

    if format == OutputFormat::Text && should_use_pager() && page_output(&redacted).is_ok() {
        return;
    }

    if redacted.ends_with('\n') {
        print!("{redacted}");
    } else {
        println!("{redacted}");
    }
}

fn should_use_pager() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_PAGER").is_none()
}

fn page_output(rendered: &str) -> std::result::Result<(), minus::MinusError> {
    let pager = Pager::new();
    pager.set_exit_strategy(ExitStrategy::PagerQuit)?;
    pager.set_text(rendered)?;
    page_all(pager)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::path::Path;

    use clap::Parser;

    use super::{BackendArg, Cli, Commands, run_from, simulated_inventory_path};

    #[test]
    fn up_defaults_to_simulated_backend() {
        let cli = Cli::try_parse_from(["stratum", "up", "--config", "stack.yaml"])
            .expect("arguments parse");
        let Commands::Up { backend, state, .. } = cli.command else {
            unreachable!("parsed a different command");
        };
        assert_eq!(backend, BackendArg::Simulated);
        assert!(state.is_none());
    }

    #[test]
    fn preview_requires_config() {
        assert!(Cli::try_parse_from(["stratum", "preview"]).is_err());
    }

    #[test]
    fn help_exits_cleanly() {
        assert_eq!(run_from(["stratum", "--help"]).expect("help"), 0);
    }

    #[test]
    fn inventory_sits_next_to_state() {
        assert_eq!(
            simulated_inventory_path(Path::new("/tmp/dev.state.json")),
            Path::new("/tmp/dev.state.simulated.json")
        );
    }
}
