//! DICOM connectivity check against a remote PACS node.
//!
//! Opens one association, sends one C-ECHO request
//! and reports the outcome through the process exit code.
//!
//! ```none
//! dicom-pacs-echo -host=10.0.0.5 -port=104 -clientae=ECHOSCU -hostae=PACS
//! ```
use snafu::{Report, ResultExt, Whatever};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod args;
mod echo;

use args::Parsed;
use echo::{EchoOptions, EchoOutcome, EchoTarget};

/// Status codes returned to the operating system.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(i32)]
enum ExitStatus {
    /// echo response received
    Success = 0x00,
    /// invalid command line data, or help requested
    InvalidData = 0x0D,
    /// the exchange failed before a response
    ConnectionAborted = 0x4D3,
    /// no response within the association timeout
    ServiceTimeout = 0x41D,
}

impl ExitStatus {
    fn code(self) -> i32 {
        self as i32
    }
}

impl From<&EchoOutcome> for ExitStatus {
    fn from(outcome: &EchoOutcome) -> Self {
        match outcome {
            EchoOutcome::Succeeded { .. } => ExitStatus::Success,
            EchoOutcome::TimedOut => ExitStatus::ServiceTimeout,
            EchoOutcome::Aborted(_) => ExitStatus::ConnectionAborted,
        }
    }
}

fn main() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let status = run(std::env::args().skip(1));
    std::process::exit(status.code());
}

fn run<I>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = String>,
{
    let target = match target_from_args(args) {
        Ok(Some(target)) => target,
        Ok(None) => {
            print!("{}", args::help_text());
            return ExitStatus::InvalidData;
        }
        Err(e) => {
            if let args::Error::MissingRequired { flags } = &e {
                for flag in flags {
                    println!("Value of required argument '{}' not defined!", flag);
                }
            }
            report_failure(ExitStatus::InvalidData, e);
            return ExitStatus::InvalidData;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            report_failure(ExitStatus::ConnectionAborted, e);
            return ExitStatus::ConnectionAborted;
        }
    };

    info!(
        "Sending C-ECHO to {} ({} -> {})",
        target.socket_address(),
        target.calling_ae_title,
        target.called_ae_title
    );
    let outcome = runtime.block_on(echo::echo(&target, &EchoOptions::default()));
    let status = ExitStatus::from(&outcome);
    match outcome {
        EchoOutcome::Succeeded { status } => {
            println!("C-ECHO status code: {}", status);
            info!("C-ECHO successful");
        }
        EchoOutcome::TimedOut => {
            println!("System code error: {}. Service timeout", status.code())
        }
        EchoOutcome::Aborted(e) => report_failure(status, e),
    }
    status
}

/// Print the failure line on standard output,
/// regardless of the logging configuration.
fn report_failure<E>(status: ExitStatus, e: E)
where
    E: std::error::Error + 'static,
{
    println!("{}", failure_line(status, e));
}

fn failure_line<E>(status: ExitStatus, e: E) -> String
where
    E: std::error::Error + 'static,
{
    format!("System code error: {}. {}", status.code(), Report::from_error(e))
}

/// Validate the command line into an echo target.
///
/// Returns `None` when help was requested.
fn target_from_args<I>(args: I) -> Result<Option<EchoTarget>, args::Error>
where
    I: IntoIterator<Item = String>,
{
    let values = match args::parse(args)? {
        Parsed::Help => return Ok(None),
        Parsed::Values(values) => values,
    };

    for token in values.ignored() {
        warn!("Ignoring unrecognized argument `{}`", token);
    }

    Ok(Some(EchoTarget {
        host: values.host()?.to_string(),
        port: values.port()?,
        calling_ae_title: values.client_ae_title()?.to_string(),
        called_ae_title: values.host_ae_title()?.to_string(),
    }))
}
