use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 8817)]
    pub port: u16,
    /// Host UUID of a master this worker will complete AUTHORIZE with.
    /// Repeat to accept more than one master.
    #[arg(long = "accept-master")]
    pub acceptable_masters: Vec<Uuid>,
    /// SHA-256 hash (64 hex chars) of the password AUTHORIZE must
    /// supply. Omit to accept any master in `acceptable_masters`
    /// without a password check.
    #[arg(long)]
    pub password_hash: Option<String>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
