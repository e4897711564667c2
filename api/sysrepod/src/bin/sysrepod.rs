//! This is the primary binary for the configuration engine daemon.

#![deny(rust_2018_idioms)]

#[macro_use]
extern crate log;

use fs2::FileExt;
use libc::uid_t;
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::{ensure, ResultExt};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process;
use std::str::FromStr;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use sysrepod::serve;

const DEFAULT_SOCKET_PATH: &str = "/var/run/sysrepod.sock";

type Result<T> = std::result::Result<T, error::Error>;

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub(crate) enum Error {
        #[snafu(display("Schema directory '{}' does not exist", path.display()))]
        NonexistentSchemaDir { path: PathBuf },

        #[snafu(display("{}", source))]
        Server { source: sysrepod::server::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Unable to open pidfile '{}': {}", path.display(), source))]
        PidfileOpen {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Another instance already holds '{}'", path.display()))]
        PidfileLocked { path: PathBuf },

        #[snafu(display("Unable to write pidfile '{}': {}", path.display(), source))]
        PidfileWrite {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Unable to install signal handler: {}", source))]
        Signals { source: std::io::Error },
    }
}

/// Stores user-supplied arguments.
struct Args {
    socket_path: String,
    schema_dir: String,
    data_dir: String,
    pidfile: Option<String>,
    log_level: LevelFilter,
    local: bool,
}

/// Informs the user about proper usage of the program and exits.
fn usage() -> ! {
    let program_name = env::args().next().unwrap_or_else(|| "program".to_string());
    eprintln!(
        r"Usage: {}
            --schema-dir PATH
            --data-dir PATH
            [ --socket-path PATH ]
            [ --pidfile PATH ]
            [ --local ]
            [ --log-level trace|debug|info|warn|error ]

    Socket path defaults to {}.
    With --local, only peers running as the daemon's own user are accepted.",
        program_name, DEFAULT_SOCKET_PATH
    );
    process::exit(2);
}

/// Prints a more specific message before exiting through usage().
fn usage_msg<S: AsRef<str>>(msg: S) -> ! {
    eprintln!("{}\n", msg.as_ref());
    usage();
}

/// Parses user arguments into an Args structure.
fn parse_args(args: env::Args) -> Args {
    let mut socket_path = None;
    let mut schema_dir = None;
    let mut data_dir = None;
    let mut pidfile = None;
    let mut log_level = None;
    let mut local = false;

    let mut iter = args.skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--socket-path" => {
                socket_path = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --socket-path")),
                )
            }

            "--schema-dir" => {
                schema_dir = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --schema-dir")),
                )
            }

            "--data-dir" => {
                data_dir = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --data-dir")),
                )
            }

            "--pidfile" => {
                pidfile = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --pidfile")),
                )
            }

            "--log-level" => {
                let log_level_str = iter
                    .next()
                    .unwrap_or_else(|| usage_msg("Did not give argument to --log-level"));
                log_level = Some(LevelFilter::from_str(&log_level_str).unwrap_or_else(|_| {
                    usage_msg(format!("Invalid log level '{}'", log_level_str))
                }));
            }

            "--local" => local = true,

            _ => usage(),
        }
    }

    Args {
        socket_path: socket_path.unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string()),
        schema_dir: schema_dir.unwrap_or_else(|| usage()),
        data_dir: data_dir.unwrap_or_else(|| usage()),
        pidfile,
        log_level: log_level.unwrap_or(LevelFilter::Info),
        local,
    }
}

/// Takes the pidfile lock and records our pid.  The returned file must stay
/// open for the lifetime of the process; dropping it releases the lock.
fn claim_pidfile(path: &str) -> Result<std::fs::File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .context(error::PidfileOpenSnafu { path })?;
    file.try_lock_exclusive()
        .map_err(|_| error::Error::PidfileLocked { path: path.into() })?;
    file.set_len(0).context(error::PidfileWriteSnafu { path })?;
    writeln!(file, "{}", process::id()).context(error::PidfileWriteSnafu { path })?;
    Ok(file)
}

/// Starts the engine, dispatching requests until SIGTERM/SIGINT stops the
/// event loop.
async fn run() -> Result<()> {
    let args = parse_args(env::args());

    // TerminalMode::Mixed will send errors to stderr and anything less to stdout.
    TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    ensure!(
        Path::new(&args.schema_dir).exists(),
        error::NonexistentSchemaDirSnafu {
            path: args.schema_dir.clone(),
        }
    );

    // One instance per host: the pidfile lock is held until we exit.
    let _pidfile = match &args.pidfile {
        Some(path) => Some(claim_pidfile(path)?),
        None => None,
    };

    let local_uid: Option<uid_t> = if args.local {
        Some(nix::unistd::geteuid().as_raw())
    } else {
        None
    };

    // SIGTERM and SIGINT flip the watch channel; the accept loop and every
    // connection task observe it and unwind.
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate()).context(error::SignalsSnafu)?;
    let mut sigint = signal(SignalKind::interrupt()).context(error::SignalsSnafu)?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        let _ = stop_tx.send(true);
    });

    info!(
        "Starting server at {} with schemas from {} and data at {}",
        args.socket_path, args.schema_dir, args.data_dir
    );

    serve(
        &args.socket_path,
        &args.schema_dir,
        &args.data_dir,
        local_uid,
        stop_rx,
    )
    .await
    .context(error::ServerSnafu)
}

// Returning a Result from main makes it print a Debug representation of the
// error, but with Snafu we have nice Display representations, so we wrap
// "main" (run) and print any error ourselves.
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        process::exit(1);
    }
}
