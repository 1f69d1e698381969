//! Shared helpers for the piyyut command line tools

pub mod output;

/// Default: no logs (clean JSON on stdout). Verbose: Info level on stderr.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Off
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}
