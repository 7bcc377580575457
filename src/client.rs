//! The client façade (§4.9): sends a single RRQ/WRQ against a remote
//! endpoint and drives the resulting transfer to completion.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use crate::tftp::error::Outcome;
use crate::tftp::handler::{FileSink, FileSource};
use crate::tftp::operation::{self, OperationConfig};
use crate::tftp::options::OptionSet;
use crate::tftp::packet::Packet;
use crate::tftp::state::{Action, TransferRx, TransferTx};
use crate::tftp::{RequestKind, TransferMode};

pub struct TftpRequestParameters {
	pub req_kind: RequestKind,
	pub server: SocketAddr,
	pub file: PathBuf,
	pub mode: TransferMode,
	pub options: OptionSet,
}

pub struct TftpClient {
	local_addr: IpAddr,
	config: OperationConfig,
	cancel: CancellationToken,
}

impl TftpClient {
	pub fn new(local_addr: IpAddr, config: OperationConfig, cancel: CancellationToken) -> Self {
		Self { local_addr, config, cancel }
	}

	/// Reads `filename` from `remote` into `sink`, per §4.9's `read` entry
	/// point. Binds a fresh ephemeral local endpoint for the duration of
	/// the operation.
	pub async fn read<Si: crate::tftp::handler::Sink>(
		&self,
		remote: SocketAddr,
		filename: &str,
		mode: TransferMode,
		requested_options: OptionSet,
		sink: Si,
	) -> std::io::Result<Outcome> {
		let socket = UdpSocket::bind(SocketAddr::new(self.local_addr, 0)).await?;
		let request = Packet::ReadRequest { filename: filename.to_string(), mode, options: requested_options.clone() };
		socket.send_to(&request.encode(), remote).await?;

		let machine = TransferRx::new_awaiting_reply(sink, remote, request, requested_options, self.config.retries);
		let first = Action::ArmTimer(self.config.timeout);
		Ok(operation::drive_rx(&socket, machine, first, &self.cancel).await)
	}

	/// Writes `filename` to `remote` from `source`, per §4.9's `write`
	/// entry point.
	pub async fn write<So: crate::tftp::handler::Source>(
		&self,
		remote: SocketAddr,
		filename: &str,
		mode: TransferMode,
		requested_options: OptionSet,
		source: So,
	) -> std::io::Result<Outcome> {
		let socket = UdpSocket::bind(SocketAddr::new(self.local_addr, 0)).await?;
		let request = Packet::WriteRequest { filename: filename.to_string(), mode, options: requested_options.clone() };
		socket.send_to(&request.encode(), remote).await?;

		let machine = TransferTx::new_awaiting_reply(source, remote, request, requested_options, self.config.retries);
		let first = Action::ArmTimer(self.config.timeout);
		Ok(operation::drive_tx(&socket, machine, first, &self.cancel).await)
	}
}

/// Runs one client-side request as directed by the CLI, opening the local
/// file and dispatching to [`TftpClient::read`] or [`TftpClient::write`].
pub async fn run_client(params: TftpRequestParameters, cancel: CancellationToken) -> Result<Outcome, String> {
	let local_addr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));
	let client = TftpClient::new(local_addr, OperationConfig::default(), cancel);

	match params.req_kind {
		RequestKind::Read => {
			let file = std::fs::OpenOptions::new()
				.create(true)
				.write(true)
				.truncate(true)
				.open(&params.file)
				.map_err(|e| format!("could not open {} for writing: {e}", params.file.display()))?;
			let sink = FileSink::new(file);
			let filename = params.file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
			client
				.read(params.server, &filename, params.mode, params.options, sink)
				.await
				.map_err(|e| format!("request failed: {e}"))
		}
		RequestKind::Write => {
			let file = std::fs::File::open(&params.file)
				.map_err(|e| format!("could not open {} for reading: {e}", params.file.display()))?;
			let source = FileSource::new(file).map_err(|e| format!("could not stat {}: {e}", params.file.display()))?;
			let filename = params.file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
			client
				.write(params.server, &filename, params.mode, params.options, source)
				.await
				.map_err(|e| format!("request failed: {e}"))
		}
	}
}
