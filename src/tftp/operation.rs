//! The async driver that feeds a sans-I/O `TransferTx`/`TransferRx` its
//! datagrams and timer ticks over a real `tokio::net::UdpSocket`. This is
//! the only part of the core that touches the network or the clock; the
//! protocol logic itself lives entirely in `state.rs`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::error::Outcome;
use super::handler::{Sink, Source};
use super::packet::MAX_PACKET_SIZE;
use super::state::{Action, Event, TransferRx, TransferTx};
use super::Packet;

/// Construction-time configuration for one operation, mirroring the
/// per-operation fields of the Operation record (timeout, retries,
/// dally, and the completion callback are represented by the caller
/// awaiting this function's returned `Outcome`).
#[derive(Debug, Clone, Copy)]
pub struct OperationConfig {
	pub timeout: Duration,
	pub retries: u8,
	pub dally: Duration,
	pub max_blksize: u16,
}

impl Default for OperationConfig {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(super::consts::DEFAULT_TIMEOUT_SECS as u64),
			retries: super::consts::DEFAULT_RETRIES,
			dally: Duration::from_secs(super::consts::DEFAULT_TIMEOUT_SECS as u64),
			max_blksize: super::options::BLKSIZE_HARD_MAX as u16,
		}
	}
}

fn decode_event(buf: &[u8], from: SocketAddr, max_blksize: u16) -> Event {
	match Packet::decode(buf, max_blksize as usize) {
		Ok(packet) => Event::Datagram { from, packet },
		Err(e) => {
			log::debug!("discarding malformed datagram from {from}: {e}");
			Event::DatagramInvalid { from }
		}
	}
}

/// Runs a sending operation (RRQ on the server, WRQ on the client) to
/// completion against `socket`, applying the first action already
/// produced by the machine's constructor.
pub async fn drive_tx<So: Source>(
	socket: &UdpSocket,
	mut machine: TransferTx<So>,
	first: Action,
	cancel: &CancellationToken,
) -> Outcome {
	let mut pending = vec![first];
	let mut armed: Option<Duration> = None;
	let mut buf = vec![0u8; MAX_PACKET_SIZE];

	loop {
		for action in pending.drain(..) {
			match action {
				Action::Send(dest, packet) => {
					if let Err(e) = socket.send_to(&packet.encode(), dest).await {
						log::warn!("send to {dest} failed: {e}");
					}
				}
				Action::ArmTimer(d) => armed = Some(d),
				Action::Terminate(outcome) => return outcome,
			}
		}

		if cancel.is_cancelled() {
			pending = machine.handle(Event::Cancelled);
			continue;
		}

		let event = match wait_for_event(socket, &mut buf, armed, machine.negotiated_blksize(), cancel).await {
			Some(e) => e,
			None => continue,
		};
		pending = machine.handle(event);
	}
}

/// Runs a receiving operation (WRQ on the server, RRQ on the client) to
/// completion against `socket`.
pub async fn drive_rx<Si: Sink>(
	socket: &UdpSocket,
	mut machine: TransferRx<Si>,
	first: Action,
	cancel: &CancellationToken,
) -> Outcome {
	let mut pending = vec![first];
	let mut armed: Option<Duration> = None;
	let mut buf = vec![0u8; MAX_PACKET_SIZE];

	loop {
		for action in pending.drain(..) {
			match action {
				Action::Send(dest, packet) => {
					if let Err(e) = socket.send_to(&packet.encode(), dest).await {
						log::warn!("send to {dest} failed: {e}");
					}
				}
				Action::ArmTimer(d) => armed = Some(d),
				Action::Terminate(outcome) => return outcome,
			}
		}

		if cancel.is_cancelled() {
			pending = machine.handle(Event::Cancelled);
			continue;
		}

		let event = match wait_for_event(socket, &mut buf, armed, machine.negotiated_blksize(), cancel).await {
			Some(e) => e,
			None => continue,
		};
		pending = machine.handle(event);
	}
}

/// Suspends on "await datagram or timeout" (the only suspension points
/// the concurrency model allows), also racing the cancellation token so a
/// cancelled operation doesn't have to wait out a full timer.
async fn wait_for_event(
	socket: &UdpSocket,
	buf: &mut [u8],
	armed: Option<Duration>,
	max_blksize: u16,
	cancel: &CancellationToken,
) -> Option<Event> {
	let recv = socket.recv_from(buf);
	let result = match armed {
		Some(d) => {
			tokio::select! {
				r = recv => Some(r),
				_ = tokio::time::sleep(d) => None,
				_ = cancel.cancelled() => return Some(Event::Cancelled),
			}
		}
		None => {
			tokio::select! {
				r = recv => Some(r),
				_ = cancel.cancelled() => return Some(Event::Cancelled),
			}
		}
	};

	match result {
		Some(Ok((n, from))) => Some(decode_event(&buf[..n], from, max_blksize)),
		Some(Err(e)) => {
			log::warn!("recv_from failed: {e}");
			None
		}
		None => Some(Event::TimerFired),
	}
}
