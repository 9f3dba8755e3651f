pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};
use quoteflow_core::Decision;

#[derive(Debug, Parser)]
#[command(
    name = "quoteflow",
    about = "Quoteflow approval operator CLI",
    long_about = "Operate quotation approvals: migrations, workflow import, requests, decisions, \
                  cancellation, status lookups and timeout sweeps.",
    after_help = "Examples:\n  quoteflow migrate\n  quoteflow import-workflows workflows.json\n  \
                  quoteflow request quote.json --requested-by u-rep\n  \
                  quoteflow decide APR-1 --user u-cfo --approve --comment ok\n  \
                  quoteflow status Q-1001"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate and store workflow definitions from a JSON file")]
    ImportWorkflows {
        #[arg(help = "JSON file with an array of workflows or a `workflows` array")]
        file: PathBuf,
    },
    #[command(about = "Evaluate a quotation snapshot and open an approval if a workflow matches")]
    Request {
        #[arg(help = "JSON quotation snapshot with a string `id` field")]
        snapshot: PathBuf,
        #[arg(long, help = "User requesting the approval")]
        requested_by: String,
    },
    #[command(about = "Record an approver decision on an open approval")]
    #[command(group(ArgGroup::new("decision").required(true).args(["approve", "reject"])))]
    Decide {
        approval_id: String,
        #[arg(long, help = "Approver user id")]
        user: String,
        #[arg(long)]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Cancel an open approval")]
    Cancel {
        approval_id: String,
        #[arg(long, help = "User cancelling the approval")]
        user: String,
    },
    #[command(about = "Show the most recent approval for a quotation")]
    Status { quote_id: String },
    #[command(about = "Auto-approve overdue steps once and report the outcome")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::ImportWorkflows { file } => commands::import_workflows::run(&file),
        Command::Request { snapshot, requested_by } => {
            commands::approvals::request(&snapshot, &requested_by)
        }
        Command::Decide { approval_id, user, approve, reject: _, comment } => {
            let decision = if approve { Decision::Approve } else { Decision::Reject };
            commands::approvals::decide(&approval_id, &user, decision, comment)
        }
        Command::Cancel { approval_id, user } => commands::approvals::cancel(&approval_id, &user),
        Command::Status { quote_id } => commands::status::run(&quote_id),
        Command::Sweep => commands::sweep::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
