use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Worker host to connect to.
    #[arg(long)]
    pub host: String,
    /// Worker TCP port.
    #[arg(long, default_value_t = 8817)]
    pub port: u16,
    /// This master's host name, as presented to `AUTHORIZE`.
    #[arg(long)]
    pub host_name: String,
    /// This master's host UUID, as presented to `AUTHORIZE`.
    #[arg(long)]
    pub host_uuid: uuid::Uuid,
    /// Password tried against `AUTHORIZE`.
    #[arg(long)]
    pub password: String,
    /// Job name.
    #[arg(long)]
    pub job_name: String,
    /// Job UUID, generated if not supplied.
    #[arg(long)]
    pub job_uuid: Option<uuid::Uuid>,
    /// Schedule UUID, generated if not supplied.
    #[arg(long)]
    pub schedule_uuid: Option<uuid::Uuid>,
    /// NORMAL | FULL | INCREMENTAL | DIFFERENTIAL | CONTINUOUS.
    #[arg(long, default_value = "NORMAL")]
    pub archive_type: String,
    /// Drives the job without writing archive data.
    #[arg(long, default_value_t)]
    pub dry_run: bool,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
