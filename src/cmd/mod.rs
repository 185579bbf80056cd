mod run;

use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Run a project:
    sqlferry run sales_dw

  Run with an explicit connections file and target profile:
    sqlferry run sales_dw --connections ./connections.yml --target prod

  Machine-readable summary:
    sqlferry run sales_dw --json

\x1b[1mMore info:\x1b[0m
  Run 'sqlferry <command> --help' for command-specific options.
  Enable completions: sqlferry completions <shell>";

#[derive(Parser)]
#[command(name = "sqlferry")]
#[command(version)]
#[command(about = "Parallel table replication between SQL databases through delimited-file staging")]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

const INPUT: &str = "Input";
const OUTPUT_FORMAT: &str = "Output";

#[derive(Subcommand)]
pub enum Commands {
    /// Run a replication project
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  sqlferry run sales_dw
  sqlferry run projects/sales_dw.yml --target prod
  sqlferry run sales_dw --json")]
    Run {
        /// Project name or path to a project .yml file
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT)]
        project: String,

        /// Connections file (default: ~/.sqlferry/connections.yml)
        #[arg(long, value_hint = ValueHint::FilePath, help_heading = INPUT)]
        connections: Option<PathBuf>,

        /// Output profile overriding each connection's own target
        #[arg(long, help_heading = INPUT)]
        target: Option<String>,

        /// Print a JSON summary instead of progress lines
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch the parsed CLI. Returns the process exit code.
pub fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run {
            project,
            connections,
            target,
            json,
        } => run::run(project, connections, target, json),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "sqlferry", &mut io::stdout());
            Ok(0)
        }
    }
}
