use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use lemur_profile::cli::Cli;
use lemur_profile::config::Config;
use lemur_profile::error::ProfilerError;
use lemur_profile::pipeline;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}

/// Exit code for a fatal `anyhow::Error`, per section 6: an `AlignerFailed`
/// propagates the aligner's own exit status verbatim, everything else is 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(ProfilerError::AlignerFailed { status, .. }) = err.downcast_ref::<ProfilerError>() {
        if *status > 0 {
            return *status;
        }
    }
    1
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    // A single top-level signal handler, installed once before the pipeline
    // starts (section 5). There is no cooperative cancellation inside EM: an
    // interrupted run is simply discarded once the process exits.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        }) {
            log::warn!("failed to install signal handler: {e}");
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()
        .expect("failed to build worker thread pool");

    let result = pool.install(|| pipeline::run(&config));

    match result {
        Ok(()) => {}
        Err(err) => {
            if interrupted.load(Ordering::SeqCst) {
                eprintln!("interrupted");
                std::process::exit(128);
            }
            eprintln!("error: {err:?}");
            std::process::exit(exit_code_for(&err));
        }
    }
}
