mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::{select, signal, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use crate::args::Args;
use archline::backends::memory::{MemoryIndex, MemoryStorageSink};
use archline::connector::{Connector, PasswordSource};
use archline::index::IndexHandle;
use archline::job::{ArchiveType, JobDescription};
use archline::storage::{StorageCursor, StorageSink};

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

    match select! {
        result = run(args) => result,
        _ = cancel.cancelled() => Ok(()),
    } {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "job run failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let archive_type = ArchiveType::parse(&args.archive_type)
        .ok_or_else(|| anyhow::anyhow!("unrecognized archive type '{}'", args.archive_type))?;
    let job_uuid = args.job_uuid.unwrap_or_else(Uuid::new_v4);
    let schedule_uuid = args.schedule_uuid.unwrap_or_else(Uuid::new_v4);

    let storage: Arc<dyn StorageSink> = Arc::new(MemoryStorageSink::default());
    let index: Arc<dyn IndexHandle> = Arc::new(MemoryIndex::default());

    let connector = Connector::connect((args.host.as_str(), args.port), storage, index).await?;
    info!(host = %args.host, port = args.port, "connected");

    connector
        .authorize(&args.host_name, args.host_uuid, &[PasswordSource::Supplied(args.password)])
        .await?;
    info!("authorized");

    let job = JobDescription::new(
        args.job_name,
        job_uuid.to_string(),
        schedule_uuid.to_string(),
        args.host_name,
    );
    connector.transmit_job(&job).await?;
    info!(job_uuid = %job_uuid, "job transmitted");

    connector
        .start(&job_uuid.to_string(), &schedule_uuid.to_string(), archive_type, args.dry_run)
        .await?;
    info!("job started");

    let mut open_storage: Option<StorageCursor> = None;
    loop {
        select! {
            serviced = connector.service_one_command(&mut open_storage) => {
                if !serviced? {
                    break;
                }
            },
            _ = time::sleep(Duration::from_millis(200)) => {
                let (state, progress) = connector.poll_status(&job_uuid.to_string()).await?;
                info!(?state, done = progress.done_count, total = progress.total_entry_count, "job progress");
                if state.is_terminal() {
                    break;
                }
            },
        }
    }

    connector.close();
    Ok(())
}
