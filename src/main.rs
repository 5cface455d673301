use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use clap::ArgMatches;
use colored::*;
use tracing::info;

use autopull::error::Error;
use autopull::supervisor::{listen_for_shutdown, Supervisor};
use autopull::types::ChainOutcome;
use autopull::{Config, GitSource, ProcessChain, ProcessSlot, SyncEngine};

mod cli;
mod logging;

use cli::parse_arg_matches;
use logging::LogFormat;

fn run(arg_matches: ArgMatches) -> Result<(), Error> {
    let config_path = PathBuf::from(arg_matches.value_of("config").unwrap_or("conf.json"));
    let config = Config::load(&config_path)?;

    if arg_matches.is_present("check") {
        println!(
            "{} {} is valid ({} commands, branch {})",
            "ok:".green().bold(),
            config_path.display(),
            config.cmd.len(),
            config.git_branch.bold()
        );
        return Ok(());
    }

    let source = GitSource::ensure_local(
        &config.directory,
        &config.git_repo,
        &config.git_branch,
        &config.remote,
    )?;

    let slot = ProcessSlot::new();
    let engine = SyncEngine::new(source, config.git_branch.clone());
    let chain = ProcessChain::from_config(&config, slot.clone());
    let mut supervisor = Supervisor::new(engine, chain, config.poll_interval())
        .with_kill_after(config.kill_after());

    let signals = listen_for_shutdown(slot).map_err(Error::SignalHandler)?;
    let outcome = supervisor.run();
    signals.close();

    info!(passes = supervisor.passes(), ?outcome, "supervisor stopped");

    match outcome {
        ChainOutcome::Aborted(reason) => Err(Error::ChainAborted(reason)),
        ChainOutcome::Completed | ChainOutcome::Shutdown | ChainOutcome::Interrupted => Ok(()),
    }
}

fn run_app<I, T>(arguments: I)
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let arg_matches = parse_arg_matches(arguments);

    logging::init(
        arg_matches.occurrences_of("verbose"),
        LogFormat::from_arg(arg_matches.value_of("log_format")),
    );

    match run(arg_matches) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            process::exit(1);
        }
    }
}

fn main() {
    run_app(std::env::args_os());
}
