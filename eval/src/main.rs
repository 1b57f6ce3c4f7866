mod agents;
mod cli;
mod launch;
mod outcome;
mod report;
mod results;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use harness::core::messages::DEFAULT_MAX_STEPS;
use harness::core::task::{Difficulty, TaskType};
use harness::exit_codes;
use harness::io::config::load_config;

use crate::cli::{AgentSetup, BatchTasks};
use crate::launch::TaskSelection;

#[derive(Parser)]
#[command(name = "eval", version, about = "Launch and score craftbench assessments")]
struct Cli {
    /// Harness config file (defaults apply when missing)
    #[arg(long, global = true, default_value = "craftbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct AgentArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 9001)]
    evaluator_port: u16,
    #[arg(long, default_value_t = 9002)]
    performer_port: u16,
    /// agent-server binary (defaults to the one next to this executable)
    #[arg(long)]
    server_bin: Option<PathBuf>,
}

#[derive(Args)]
struct TaskArgs {
    #[arg(long, default_value = "simple")]
    difficulty: Difficulty,
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u32,
    #[arg(long, default_value = "predefined")]
    task_type: TaskType,
}

#[derive(Subcommand)]
enum Command {
    /// Assess one task with freshly started agents.
    Launch {
        /// Task name (optional for generated task types)
        #[arg(long)]
        task: Option<String>,
        #[command(flatten)]
        task_args: TaskArgs,
        #[command(flatten)]
        agents: AgentArgs,
    },
    /// Assess several tasks one after another.
    Batch {
        /// Newline-separated task names
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        tasks_file: Option<PathBuf>,
        /// Every predefined task of the chosen difficulty
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        task_args: TaskArgs,
        #[command(flatten)]
        agents: AgentArgs,
    },
    /// List predefined tasks.
    ListTasks {
        #[arg(long)]
        difficulty: Option<Difficulty>,
    },
    /// Summarize a batch's results.
    Report { batch_id: String },
}

fn main() -> ExitCode {
    harness::logging::init(&[]);
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(exit_codes::INVALID)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.config)?;
    let setup = |agents: AgentArgs| AgentSetup {
        host: agents.host,
        evaluator_port: agents.evaluator_port,
        performer_port: agents.performer_port,
        server_bin: agents.server_bin,
        config_path: cli.config.clone(),
    };
    let selection = |task_name: Option<String>, args: TaskArgs| TaskSelection {
        task_name,
        difficulty: args.difficulty,
        max_steps: args.max_steps,
        task_type: args.task_type,
    };
    match cli.command {
        Command::Launch {
            task,
            task_args,
            agents,
        } => cli::launch(&config, &setup(agents), &selection(task, task_args)),
        Command::Batch {
            tasks_file,
            all: _,
            task_args,
            agents,
        } => {
            let tasks = tasks_file.map_or(BatchTasks::All, BatchTasks::File);
            cli::batch(&config, &setup(agents), &tasks, &selection(None, task_args))
        }
        Command::ListTasks { difficulty } => cli::list(&config, difficulty),
        Command::Report { batch_id } => cli::report(&config, &batch_id),
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
