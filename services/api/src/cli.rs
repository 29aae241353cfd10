use crate::demo::{run_backfill, run_demo, run_preview, BackfillArgs, DemoArgs, PreviewArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use dispatch_eligibility::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Dispatch Eligibility",
    about = "Run and inspect the dispatch eligibility engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Rebuild every plugin's facts from the seeded records and print the report
    Backfill(BackfillArgs),
    /// Show the compiled eligibility query and result for one job
    Preview(PreviewArgs),
    /// Walk through bans, holds and component toggles against the demo roster
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Backfill(args) => run_backfill(args).await,
        Command::Preview(args) => run_preview(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
