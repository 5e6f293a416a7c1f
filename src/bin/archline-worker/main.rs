mod args;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Level};

use crate::args::Args;
use archline::server_io::ServerIo;
use archline::worker::{self, JobRegistry, WorkerAuthPolicy};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    let listener = match TcpListener::bind((args.listen, args.port)).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, "failed to listen for connections");
            return ExitCode::from(111);
        },
    };

    let password_hash = match args.password_hash.as_deref().map(parse_password_hash).transpose() {
        Ok(hash) => hash,
        Err(error) => {
            error!(%error, "invalid --password-hash");
            return ExitCode::from(111);
        },
    };

    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);
    let jobs = Arc::new(JobRegistry::new());
    let auth_policy = WorkerAuthPolicy::new(args.acceptable_masters, password_hash);

    let exit_code = match accept_loop(cancel, shutdown_hold, listener, jobs, auth_policy).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    };

    shutdown_wait.recv().await;

    exit_code
}

async fn accept_loop(
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
    listener: TcpListener,
    jobs: Arc<JobRegistry>,
    auth_policy: WorkerAuthPolicy,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        match select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => return Ok(()),
        } {
            Ok((conn, _)) => {
                tokio::spawn(do_client_loop(
                    cancel.clone(),
                    shutdown_hold.clone(),
                    conn,
                    jobs.clone(),
                    auth_policy.clone(),
                ));
            },
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        };
    }
}

#[instrument(name = "client_loop", skip_all)]
async fn do_client_loop(
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    conn: TcpStream,
    jobs: Arc<JobRegistry>,
    auth_policy: WorkerAuthPolicy,
) {
    debug!("accepted connection");

    if let Err(error) = conn.set_nodelay(true) {
        warn!(%error, "failed to set NODELAY");
        return;
    }

    let io = match ServerIo::accept(conn).await {
        Ok(io) => Arc::new(io),
        Err(error) => {
            warn!(%error, "failed to complete session handshake");
            return;
        },
    };

    select! {
        _ = worker::run(io, jobs, auth_policy) => {},
        _ = cancel.cancelled() => {},
    }
}

fn parse_password_hash(hex_str: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("password hash must be 32 bytes (64 hex chars), got {}", bytes.len()))
}
