//! Logging configuration using tracing
//!
//! Logs go to stderr; stdout belongs to command output.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "nbrshell=info";

type Base = Layered<EnvFilter, Registry>;

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("nbrshell=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn output_layer<W>(json: bool, writer: W) -> Box<dyn Layer<Base> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_writer(writer).boxed()
    }
}

/// Build a subscriber that writes to `writer` without installing it
pub fn subscriber<W>(verbose: bool, json: bool, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(output_layer(json, writer))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(verbose: bool, json: bool) -> Result<(), TryInitError> {
    subscriber(verbose, json, std::io::stderr).try_init()
}

/// Install the default text subscriber unless one is already active
pub fn try_init() {
    if init(false, false).is_err() {
        tracing::debug!("[logging] Subscriber already installed");
    }
}
