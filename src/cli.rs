use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{arg, command, Args, ValueEnum};
use clap::{Parser, Subcommand};

use simple_logger::SimpleLogger;

use crate::tftp::options::{OptionSet, OPT_BLKSIZE, OPT_TIMEOUT, OPT_TSIZE};
use crate::tftp::{RequestKind, TransferMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Options {
	#[arg(value_enum, short, long,
		default_value_t = DebugLevel::Warn,
		help = "Debug level to determine which messages are printed", global = true
	)]
	pub debug: DebugLevel,

	#[command(subcommand)]
	pub run_mode: RunMode,
}

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum DebugLevel {
	Off = 0,
	Error,

	#[default]
	Warn,
	Info,
	Debug,
	Trace,
}

impl From<DebugLevel> for log::LevelFilter {
	fn from(value: DebugLevel) -> Self {
		match value {
			DebugLevel::Off => Self::Off,
			DebugLevel::Error => Self::Error,
			DebugLevel::Warn => Self::Warn,
			DebugLevel::Info => Self::Info,
			DebugLevel::Debug => Self::Debug,
			DebugLevel::Trace => Self::Trace,
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum RunMode {
	Server {
		#[arg(short, long, default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), crate::tftp::consts::TFTP_LISTEN_PORT))]
		listen: SocketAddr,

		#[arg(short = 'd', long = "root", default_value = ".")]
		root: String,

		#[arg(long = "max-blksize", default_value_t = crate::tftp::options::BLKSIZE_HARD_MAX as u16)]
		max_blksize: u16,

		#[arg(short, long, default_value_t = crate::tftp::consts::DEFAULT_TIMEOUT_SECS)]
		timeout: u8,

		#[arg(short = 'R', long, default_value_t = crate::tftp::consts::DEFAULT_RETRIES)]
		retries: u8,
	},
	Client {
		#[command(subcommand)]
		action: ClientAction,
	},
}

impl RunMode {
	pub fn root(&self) -> &str {
		let Self::Server { root, .. } = self else { panic!("root() only valid for Server mode") };
		root
	}

	pub fn listen_addr(&self) -> SocketAddr {
		let Self::Server { listen, .. } = self else { panic!("listen_addr() only valid for Server mode") };
		*listen
	}

	pub fn server_config(&self) -> crate::tftp::OperationConfig {
		let Self::Server { max_blksize, timeout, retries, .. } = self else {
			panic!("server_config() only valid for Server mode")
		};
		let timeout = std::time::Duration::from_secs(*timeout as u64);
		crate::tftp::OperationConfig { timeout, retries: *retries, dally: timeout, max_blksize: *max_blksize }
	}
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
	Octet,
	Netascii,
}

impl From<ModeArg> for TransferMode {
	fn from(value: ModeArg) -> Self {
		match value {
			ModeArg::Octet => Self::Octet,
			ModeArg::Netascii => Self::NetAscii,
		}
	}
}

#[derive(Debug, Args)]
pub struct ClientOpts {
	#[arg(long, help = "The remote server to connect to")]
	pub host: IpAddr,

	#[arg(long, default_value_t = crate::tftp::consts::TFTP_LISTEN_PORT, help = "(optional) the remote port to connect to")]
	pub port: u16,

	#[arg(long, value_enum, default_value_t = ModeArg::Octet)]
	pub mode: ModeArg,

	#[arg(long, help = "Request this block size via the blksize option (RFC 2348)")]
	pub blksize: Option<u16>,

	#[arg(long, help = "Request this timeout in seconds via the timeout option (RFC 2349)")]
	pub timeout: Option<u8>,

	#[arg(long, default_value_t = false, help = "Negotiate the tsize option (RFC 2349)")]
	pub tsize: bool,

	pub path: String,
}

impl ClientOpts {
	/// Builds the options the client will request, per §4.3's generic
	/// negotiation shape. `tsize` is always sent as `0` for reads (the
	/// server fills in the real size) and is filled with the real file
	/// size for writes by the caller once the local file is open.
	pub fn requested_options(&self) -> OptionSet {
		let mut options = OptionSet::new();
		if let Some(blksize) = self.blksize {
			options.insert(OPT_BLKSIZE, blksize.to_string());
		}
		if let Some(timeout) = self.timeout {
			options.insert(OPT_TIMEOUT, timeout.to_string());
		}
		if self.tsize {
			options.insert(OPT_TSIZE, "0");
		}
		options
	}
}

#[derive(Subcommand, Debug)]
pub enum ClientAction {
	Read {
		#[command(flatten)]
		opts: ClientOpts,
	},
	Write {
		#[command(flatten)]
		opts: ClientOpts,
	},
}

impl ClientAction {
	pub fn opts(&self) -> &ClientOpts {
		match self {
			Self::Read { opts } | Self::Write { opts } => opts,
		}
	}

	pub fn as_req_kind(&self) -> RequestKind {
		match self {
			Self::Read { .. } => RequestKind::Read,
			Self::Write { .. } => RequestKind::Write,
		}
	}
}

pub fn init_logger(debug_level: DebugLevel) {
	SimpleLogger::new().with_level(debug_level.into()).env().init().unwrap();
}
