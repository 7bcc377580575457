//! The server dispatcher (§4.8): listens on the well-known port, spawns
//! one operation per request on a freshly bound ephemeral socket, and
//! tracks active operations so duplicate RRQ/WRQ datagrams at the
//! well-known port don't spawn a second operation for the same client.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tftp::error::Outcome;
use crate::tftp::handler::{FileSink, FileSource};
use crate::tftp::options::{self, OptionSet};
use crate::tftp::packet::{self, Packet, PacketKind};
use crate::tftp::state::{negotiate_server_options, TransferRx, TransferTx};
use crate::tftp::{ErrorCode, OperationConfig, RequestKind, TransferMode};

type ActiveKey = (SocketAddr, SocketAddr);

pub struct TftpServer {
	socket: UdpSocket,
	root: PathBuf,
	config: OperationConfig,
}

impl TftpServer {
	pub async fn new(listen_addr: SocketAddr, root: PathBuf, config: OperationConfig) -> io::Result<Self> {
		let socket = UdpSocket::bind(listen_addr).await?;
		Ok(Self { socket, root, config })
	}

	/// Runs the dispatcher loop until `cancel` fires. All mutation of the
	/// active-operations set happens here, on this single task.
	pub async fn run(&self, cancel: CancellationToken) {
		let mut active: HashMap<ActiveKey, Instant> = HashMap::new();
		let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ActiveKey>();
		let mut buf = vec![0u8; packet::MAX_PACKET_SIZE];

		let local_well_known = match self.socket.local_addr() {
			Ok(addr) => addr,
			Err(e) => {
				log::error!("could not read local listen address: {e}");
				return;
			}
		};

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					log::info!("server dispatcher cancelled");
					break;
				}
				Some(key) = done_rx.recv() => {
					active.remove(&key);
				}
				result = self.socket.recv_from(&mut buf) => {
					match result {
						Ok((n, client)) => {
							self.handle_datagram(&buf[..n], client, local_well_known, &mut active, &done_tx, &cancel).await;
						}
						Err(e) => log::error!("recv_from on well-known socket failed: {e}"),
					}
				}
			}
		}
	}

	async fn handle_datagram(
		&self,
		raw: &[u8],
		client: SocketAddr,
		local_well_known: SocketAddr,
		active: &mut HashMap<ActiveKey, Instant>,
		done_tx: &mpsc::UnboundedSender<ActiveKey>,
		cancel: &CancellationToken,
	) {
		let key = (client, local_well_known);
		if let Some(spawned_at) = active.get(&key) {
			if spawned_at.elapsed() < self.config.timeout * 2 {
				log::debug!("ignoring duplicate request from {client} within suppression window");
				return;
			}
		}

		match packet::classify(raw) {
			PacketKind::ReadRequest | PacketKind::WriteRequest => {}
			_ => {
				self.reply_error(client, ErrorCode::UnknownTransferId, "only RRQ/WRQ accepted here").await;
				return;
			}
		}

		let (kind, filename, mode, options) = match Packet::decode(raw, options::BLKSIZE_HARD_MAX as usize) {
			Ok(Packet::ReadRequest { filename, mode, options }) => (RequestKind::Read, filename, mode, options),
			Ok(Packet::WriteRequest { filename, mode, options }) => (RequestKind::Write, filename, mode, options),
			Ok(_) => unreachable!("classify() already restricted us to RRQ/WRQ"),
			Err(e) => {
				self.reply_error(client, ErrorCode::IllegalOperation, &e.to_string()).await;
				return;
			}
		};

		if mode == TransferMode::Invalid {
			self.reply_error(client, ErrorCode::NotDefined, "unrecognised transfer mode").await;
			return;
		}

		let bind_ip = local_well_known.ip();
		let ephemeral = match UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to bind ephemeral socket for {client}: {e}");
				self.reply_error(client, ErrorCode::NotDefined, "server resource exhaustion").await;
				return;
			}
		};

		active.insert(key, Instant::now());

		let root = self.root.clone();
		let config = self.config;
		let done_tx = done_tx.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move {
			let outcome = run_request(&ephemeral, client, kind, filename, options, root, config, &cancel).await;
			log_outcome(client, kind, &outcome);
			let _ = done_tx.send(key);
		});
	}

	async fn reply_error(&self, to: SocketAddr, code: ErrorCode, message: &str) {
		let packet = Packet::Error { code, message: message.to_string() };
		if let Err(e) = self.socket.send_to(&packet.encode(), to).await {
			log::warn!("failed to send error reply to {to}: {e}");
		}
	}
}

fn log_outcome(client: SocketAddr, kind: RequestKind, outcome: &Outcome) {
	use crate::tftp::error::OutcomeKind;
	match outcome.kind {
		OutcomeKind::Ok => log::info!("{kind:?} from {client} completed, {} bytes", outcome.bytes_transferred),
		_ => log::warn!("{kind:?} from {client} ended with {:?}: {:?}", outcome.kind, outcome.message),
	}
}

async fn run_request(
	socket: &UdpSocket,
	client: SocketAddr,
	kind: RequestKind,
	filename: String,
	options: OptionSet,
	root: PathBuf,
	config: OperationConfig,
	cancel: &CancellationToken,
) -> Outcome {
	let mut path = root;
	path.push(&filename);

	match kind {
		RequestKind::Read => {
			let file = match std::fs::OpenOptions::new().read(true).open(&path) {
				Ok(f) => f,
				Err(e) => return reject_with_io_error(socket, client, e).await,
			};
			let mut source = match FileSource::new(file) {
				Ok(s) => s,
				Err(e) => return reject_with_io_error(socket, client, e).await,
			};

			let transfer_size = crate::tftp::handler::Source::transfer_size(&mut source);
			let negotiation = match negotiate_server_options(&options, config.max_blksize, kind, transfer_size, |_| true) {
				Ok(n) => n,
				Err(err) => return reject_negotiation(socket, client, err).await,
			};
			let oack = (!negotiation.oack_options.is_empty()).then_some(negotiation.oack_options);
			let (machine, first) = match TransferTx::new_established(source, client, oack, negotiation.negotiated, config.retries, config.dally) {
				Ok(v) => v,
				Err(err) => return reject_negotiation(socket, client, err).await,
			};
			crate::tftp::operation::drive_tx(socket, machine, first, cancel).await
		}
		RequestKind::Write => {
			let file = match std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
				Ok(f) => f,
				Err(e) => return reject_with_io_error(socket, client, e).await,
			};
			let mut sink = FileSink::new(file);

			let negotiation = {
				let accept = |size: u64| crate::tftp::handler::Sink::accept_transfer_size(&mut sink, size);
				negotiate_server_options(&options, config.max_blksize, kind, None, accept)
			};
			let negotiation = match negotiation {
				Ok(n) => n,
				Err(err) => return reject_negotiation(socket, client, err).await,
			};
			let oack = (!negotiation.oack_options.is_empty()).then_some(negotiation.oack_options);
			let (machine, first) = TransferRx::new_established(sink, client, oack, negotiation.negotiated, config.retries);
			crate::tftp::operation::drive_rx(socket, machine, first, cancel).await
		}
	}
}

async fn reject_with_io_error(socket: &UdpSocket, client: SocketAddr, error: io::Error) -> Outcome {
	let code = match error.kind() {
		io::ErrorKind::NotFound => ErrorCode::FileNotFound,
		io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
		_ => ErrorCode::NotDefined,
	};
	let packet = Packet::Error { code, message: error.to_string() };
	let _ = socket.send_to(&packet.encode(), client).await;
	Outcome { kind: crate::tftp::error::OutcomeKind::HandlerReject, code: Some(code), message: Some(error.to_string()), bytes_transferred: 0 }
}

async fn reject_negotiation(socket: &UdpSocket, client: SocketAddr, err: crate::tftp::error::OperationError) -> Outcome {
	let code = err.wire_code().unwrap_or(ErrorCode::OptionNegotiationFailed);
	let packet = Packet::Error { code, message: err.to_string() };
	let _ = socket.send_to(&packet.encode(), client).await;
	Outcome::from_error(&err, 0)
}
