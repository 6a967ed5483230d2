//! repoql CLI - SQL queries over git repositories

use std::io::IsTerminal;

use clap::{CommandFactory, Parser};
use repoql::cli::output::OutputWriter;
use repoql::cli::summarize::{summarize_commits, SummaryFilter};
use repoql::cli::{Args, Command, SummarizeTarget};
use repoql::Engine;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("repoql=debug,repoql_locator=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match &args.command {
        Some(Command::Summarize {
            target:
                SummarizeTarget::Commits {
                    pattern,
                    start,
                    end,
                    json,
                },
        }) => {
            let engine = Engine::new(args.options())?;
            let filter = SummaryFilter {
                path_pattern: pattern.clone(),
                start: start.clone(),
                end: end.clone(),
            };
            let summary = summarize_commits(&engine, &filter)?;

            if *json {
                println!("{}", summary.to_json()?);
            } else if std::io::stdout().is_terminal() {
                println!("{}", summary.render_table());
            } else {
                print!("{}", summary.render_plain());
            }
        }
        None => {
            let Some(query) = args.query.as_deref() else {
                Args::command().print_help()?;
                return Ok(());
            };

            let engine = Engine::new(args.options())?;
            let result = engine.execute(query)?;

            let stdout = std::io::stdout();
            OutputWriter::new(stdout.lock(), args.format)
                .with_header(!args.no_header)
                .write_result(&result)?;
        }
    }

    Ok(())
}
