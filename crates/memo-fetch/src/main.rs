//! Fetches URLs through a memo cache and reports how long each request took.
//!
//! Every URL is requested several times, so the output shows the difference between the first
//! request of a URL, which goes to the network, and the later ones, which are served from the
//! cache. The cache implementation can be switched to observe how the simpler designs behave.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod config;
mod fetch;
mod logging;
mod run;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
