//! Sans-I/O operation state machines. Nothing in this module touches a
//! socket or a clock directly: `TransferTx`/`TransferRx` consume `Event`s
//! (a parsed datagram, a fired retransmit timer, or cancellation) and
//! return `Action`s (send this packet to that address, arm the timer for
//! this long, or terminate with this outcome) for the async driver in
//! `operation.rs` to carry out. This keeps the retransmit/ACK logic
//! testable with synthetic event sequences and no real network stack.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use super::error::{OperationError, Outcome};
use super::handler::{Sink, Source};
use super::options::{
	known, KnownOption, OptionSet, BLKSIZE_DEFAULT, BLKSIZE_HARD_MAX, BLKSIZE_MIN, OPT_BLKSIZE,
	OPT_TIMEOUT, OPT_TSIZE, TIMEOUT_DEFAULT, TIMEOUT_MAX, TIMEOUT_MIN, TSIZE_MAX, TSIZE_MIN,
};
use super::{BlockNumber, ErrorCode, Packet, RequestKind};

/// Which address an operation currently considers its peer. A client
/// operation starts `Unbound` (it only knows the server's IP; the port is
/// assigned by the server's first reply) and adopts a `Bound` peer on the
/// first datagram that looks like a legitimate reply. A server operation
/// is `Bound` from construction — the request that spawned it already
/// carries the client's full address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBinding {
	Unbound { expected_ip: IpAddr },
	Bound(SocketAddr),
}

impl PeerBinding {
	fn matches(&self, from: SocketAddr) -> bool {
		match self {
			Self::Unbound { expected_ip } => from.ip() == *expected_ip,
			Self::Bound(addr) => *addr == from,
		}
	}

	pub fn addr(&self) -> Option<SocketAddr> {
		match self {
			Self::Bound(addr) => Some(*addr),
			Self::Unbound { .. } => None,
		}
	}
}

/// Something that happened that the state machine needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	/// A datagram arrived and decoded cleanly.
	Datagram { from: SocketAddr, packet: Packet },
	/// A datagram arrived but failed to decode.
	DatagramInvalid { from: SocketAddr },
	/// The retransmit timer fired.
	TimerFired,
	/// The operation was asked to stop immediately.
	Cancelled,
}

/// Something the driver must do in response to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
	Send(SocketAddr, Packet),
	ArmTimer(Duration),
	Terminate(Outcome),
}

/// Negotiated parameters in effect for one operation, resolved once before
/// the transfer begins.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
	pub blksize: u16,
	pub timeout: Duration,
}

impl Default for Negotiated {
	fn default() -> Self {
		Self { blksize: BLKSIZE_DEFAULT, timeout: Duration::from_secs(TIMEOUT_DEFAULT as u64) }
	}
}

/// Result of running the server-side negotiation algorithm (§4.3) against
/// a client's requested options.
pub struct NegotiationResult {
	/// Exactly the accepted options, in the client's original order. Empty
	/// means no OACK should be sent at all.
	pub oack_options: OptionSet,
	pub negotiated: Negotiated,
}

/// Runs the server-side option negotiation algorithm against `requested`.
/// `source_transfer_size` is consulted for RRQ `tsize`; `sink_accept` is
/// called with the client's announced size for WRQ `tsize` and may reject
/// it (disk full, etc).
pub fn negotiate_server_options(
	requested: &OptionSet,
	server_max_blksize: u16,
	kind: RequestKind,
	source_transfer_size: Option<u64>,
	mut sink_accept: impl FnMut(u64) -> bool,
) -> Result<NegotiationResult, OperationError> {
	let mut negotiated = Negotiated::default();
	let mut resolved = OptionSet::new();

	if requested.contains(OPT_BLKSIZE) {
		match known(requested, OPT_BLKSIZE, BLKSIZE_MIN, u64::MAX) {
			KnownOption::Value(v) => {
				let clamped = v.clamp(BLKSIZE_MIN, BLKSIZE_HARD_MAX.min(server_max_blksize as u64));
				negotiated.blksize = clamped as u16;
				resolved.insert(OPT_BLKSIZE, clamped.to_string());
			}
			KnownOption::Invalid => {
				return Err(OperationError::Options(format!("invalid {OPT_BLKSIZE}")))
			}
			KnownOption::Absent => unreachable!("contains() implies present"),
		}
	}

	if requested.contains(OPT_TIMEOUT) {
		match known(requested, OPT_TIMEOUT, TIMEOUT_MIN, TIMEOUT_MAX) {
			KnownOption::Value(v) => {
				negotiated.timeout = Duration::from_secs(v);
				resolved.insert(OPT_TIMEOUT, v.to_string());
			}
			KnownOption::Invalid => {
				return Err(OperationError::Options(format!("invalid {OPT_TIMEOUT}")))
			}
			KnownOption::Absent => unreachable!("contains() implies present"),
		}
	}

	if requested.contains(OPT_TSIZE) {
		match known(requested, OPT_TSIZE, TSIZE_MIN, TSIZE_MAX) {
			KnownOption::Value(client_tsize) => {
				let agreed = match kind {
					RequestKind::Read => source_transfer_size.unwrap_or(0),
					RequestKind::Write => {
						if !sink_accept(client_tsize) {
							return Err(OperationError::HandlerReject(
								"sink rejected announced transfer size".to_string(),
							));
						}
						client_tsize
					}
				};
				resolved.insert(OPT_TSIZE, agreed.to_string());
			}
			KnownOption::Invalid => {
				return Err(OperationError::Options(format!("invalid {OPT_TSIZE}")))
			}
			KnownOption::Absent => unreachable!("contains() implies present"),
		}
	}

	// Re-emit in the client's original order, skipping anything unknown
	// (those were silently dropped, never entered into `resolved`).
	let mut oack_options = OptionSet::new();
	for (name, _) in requested.iter() {
		if let Some(value) = resolved.get(name) {
			oack_options.insert(name, value);
		}
	}

	Ok(NegotiationResult { oack_options, negotiated })
}

/// Validates a server's OACK against what the client itself requested
/// (§4.3 "client side on OACK"). Returns the negotiated parameters to
/// apply, or an error if the server echoed something the client didn't
/// ask for or out of its own accepted bounds.
pub fn validate_client_oack(requested: &OptionSet, echoed: &OptionSet) -> Result<Negotiated, OperationError> {
	let mut negotiated = Negotiated::default();

	for (name, value) in echoed.iter() {
		if !requested.contains(name) {
			return Err(OperationError::Options(format!("server echoed unrequested option {name}")));
		}
		match name {
			OPT_BLKSIZE => {
				let v: u64 = value
					.parse()
					.map_err(|_| OperationError::Options(format!("malformed {OPT_BLKSIZE} in OACK")))?;
				if !(BLKSIZE_MIN..=BLKSIZE_HARD_MAX).contains(&v) {
					return Err(OperationError::Options(format!("{OPT_BLKSIZE} out of bounds in OACK")));
				}
				negotiated.blksize = v as u16;
			}
			OPT_TIMEOUT => {
				let v: u64 = value
					.parse()
					.map_err(|_| OperationError::Options(format!("malformed {OPT_TIMEOUT} in OACK")))?;
				if !(TIMEOUT_MIN..=TIMEOUT_MAX).contains(&v) {
					return Err(OperationError::Options(format!("{OPT_TIMEOUT} out of bounds in OACK")));
				}
				negotiated.timeout = Duration::from_secs(v);
			}
			OPT_TSIZE => {
				value
					.parse::<u64>()
					.map_err(|_| OperationError::Options(format!("malformed {OPT_TSIZE} in OACK")))?;
			}
			_ => return Err(OperationError::Options(format!("server echoed unknown option {name}"))),
		}
	}

	Ok(negotiated)
}

#[derive(Debug, Clone, PartialEq)]
enum TxState {
	/// Client-only: the request was sent, waiting for the server's first
	/// reply (OACK, or ACK(0) granting permission to start sending) to
	/// both adopt the peer's TID and learn the negotiated parameters.
	AwaitingFirstReply,
	WaitingAck(BlockNumber),
	Dallying,
	Terminal,
}

/// Drives the sending side of a transfer: the server for RRQ, the client
/// for WRQ. Fetches blocks from a `Source` and emits DATA, retrying on
/// timeout and dallying after the final block per §4.5/§9.
pub struct TransferTx<So: Source> {
	source: So,
	peer: PeerBinding,
	max_retries: u8,
	attempts: u8,
	negotiated: Negotiated,
	dally: Duration,
	state: TxState,
	last_sent: Packet,
	bytes_transferred: u64,
	terminated: bool,
	/// Only populated by `new_awaiting_reply`: what the client itself asked
	/// for, so a server OACK can be validated against it (§4.3).
	requested_options: OptionSet,
}

impl<So: Source> TransferTx<So> {
	/// Server-side construction: peer is already known, options (if any)
	/// already negotiated. Returns the machine plus the first action to
	/// carry out (send OACK or the first DATA block).
	pub fn new_established(
		mut source: So,
		peer: SocketAddr,
		oack_options: Option<OptionSet>,
		negotiated: Negotiated,
		max_retries: u8,
		dally: Duration,
	) -> Result<(Self, Action), OperationError> {
		source.reset();
		let (state, packet) = match oack_options {
			Some(options) => (TxState::WaitingAck(BlockNumber::new(0)), Packet::OptionsAck { options }),
			None => {
				let payload = source
					.next_block(negotiated.blksize as usize)
					.map_err(OperationError::HandlerReject)?;
				(TxState::WaitingAck(BlockNumber::new(1)), Packet::Data { block: BlockNumber::new(1), payload })
			}
		};
		let machine = Self {
			source,
			peer: PeerBinding::Bound(peer),
			max_retries,
			attempts: 0,
			negotiated,
			dally,
			state,
			last_sent: packet.clone(),
			bytes_transferred: 0,
			terminated: false,
			requested_options: OptionSet::new(),
		};
		Ok((machine, Action::Send(peer, packet)))
	}

	/// Client-side construction: the WRQ was already sent to `server`;
	/// this machine waits for the reply that establishes the peer.
	/// `requested_options` is what the client itself asked for, used to
	/// validate the server's OACK once it arrives.
	pub fn new_awaiting_reply(
		mut source: So,
		server: SocketAddr,
		sent_request: Packet,
		requested_options: OptionSet,
		max_retries: u8,
	) -> Self {
		source.reset();
		Self {
			source,
			peer: PeerBinding::Unbound { expected_ip: server.ip() },
			max_retries,
			attempts: 0,
			negotiated: Negotiated::default(),
			dally: Duration::from_secs(0),
			state: TxState::AwaitingFirstReply,
			last_sent: sent_request,
			bytes_transferred: 0,
			terminated: false,
			requested_options,
		}
	}

	pub fn bytes_transferred(&self) -> u64 {
		self.bytes_transferred
	}

	pub fn negotiated_blksize(&self) -> u16 {
		self.negotiated.blksize
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self.state, TxState::Terminal)
	}

	fn terminate(&mut self, outcome: Outcome) -> Vec<Action> {
		self.state = TxState::Terminal;
		if !self.terminated {
			self.terminated = true;
			self.source.finished();
		}
		vec![Action::Terminate(outcome)]
	}

	fn retransmit_or_timeout(&mut self) -> Vec<Action> {
		if self.attempts >= self.max_retries {
			let err = OperationError::Timeout;
			let outcome = Outcome::from_error(&err, self.bytes_transferred);
			return self.terminate(outcome);
		}
		self.attempts += 1;
		let Some(dest) = self.peer.addr() else {
			// Still waiting for the first reply: retransmit the original request.
			return vec![Action::Send(self.peer_request_dest(), self.last_sent.clone()), Action::ArmTimer(self.negotiated.timeout)];
		};
		vec![Action::Send(dest, self.last_sent.clone()), Action::ArmTimer(self.negotiated.timeout)]
	}

	fn peer_request_dest(&self) -> SocketAddr {
		match self.peer {
			PeerBinding::Unbound { expected_ip } => SocketAddr::new(expected_ip, 69),
			PeerBinding::Bound(addr) => addr,
		}
	}

	fn send_next_block(&mut self, block: BlockNumber) -> Result<Action, OperationError> {
		let payload = self.source.next_block(self.negotiated.blksize as usize).map_err(OperationError::HandlerReject)?;
		self.bytes_transferred += payload.len() as u64;
		let packet = Packet::Data { block, payload };
        self.last_sent = packet.clone();
        self.attempts = 0;
        self.state = TxState::WaitingAck(block);
        let dest = self.peer.addr().expect("peer bound before steady-state sending");
        Ok(Action::Send(dest, packet))
	}

	fn is_short_block(packet: &Packet, blksize: u16) -> bool {
		matches!(packet, Packet::Data { payload, .. } if (payload.len() as u16) < blksize)
	}

	pub fn handle(&mut self, event: Event) -> Vec<Action> {
		if self.is_terminal() {
			return Vec::new();
		}

		match event {
			Event::Cancelled => {
				let outcome = Outcome::from_error(&OperationError::Cancelled, self.bytes_transferred);
				self.terminate(outcome)
			}
			Event::TimerFired if self.state == TxState::Dallying => {
				let outcome = Outcome::ok(self.bytes_transferred);
				self.terminate(outcome)
			}
			Event::TimerFired => self.retransmit_or_timeout(),
			Event::DatagramInvalid { from } => {
				if self.peer.matches(from) {
					let err = OperationError::Protocol(super::error::PacketError::Truncated);
					let outcome = Outcome::from_error(&err, self.bytes_transferred);
					self.terminate(outcome)
				} else {
					vec![Action::Send(from, Packet::Error { code: ErrorCode::UnknownTransferId, message: "unknown transfer ID".to_string() })]
				}
			}
			Event::Datagram { from, packet } => self.handle_datagram(from, packet),
		}
	}

	fn handle_datagram(&mut self, from: SocketAddr, packet: Packet) -> Vec<Action> {
		if !self.peer.matches(from) {
			return vec![Action::Send(from, Packet::Error { code: ErrorCode::UnknownTransferId, message: "unknown transfer ID".to_string() })];
		}

		if let Packet::Error { code, message } = packet {
			let err = OperationError::PeerError { code, message };
			let outcome = Outcome::from_error(&err, self.bytes_transferred);
			return self.terminate(outcome);
		}

		match std::mem::replace(&mut self.state, TxState::Terminal) {
			TxState::AwaitingFirstReply => {
				self.peer = PeerBinding::Bound(from);
				if let Packet::OptionsAck { ref options } = packet {
					match validate_client_oack(&self.requested_options, options) {
						Ok(negotiated) => self.negotiated = negotiated,
						Err(err) => {
							let outcome = Outcome::from_error(&err, self.bytes_transferred);
							return self.terminate(outcome);
						}
					}
				}
				let grants_start = matches!(packet, Packet::OptionsAck { .. })
					|| matches!(packet, Packet::Ack { block } if block == BlockNumber::new(0));
				if !grants_start {
					let err = OperationError::Protocol(super::error::PacketError::UnexpectedOpcode(0));
					let outcome = Outcome::from_error(&err, self.bytes_transferred);
					return self.terminate(outcome);
				}
				self.attempts = 0;
				match self.send_next_block(BlockNumber::new(1)) {
					Ok(action) => vec![action, Action::ArmTimer(self.negotiated.timeout)],
					Err(err) => {
						let outcome = Outcome::from_error(&err, self.bytes_transferred);
						self.terminate(outcome)
					}
				}
			}
			TxState::WaitingAck(expected) => {
				let Packet::Ack { block } = packet else {
					self.state = TxState::WaitingAck(expected);
					return Vec::new();
				};
				if block != expected {
					// Duplicate or stale ACK: ignore, do not reset retries.
					self.state = TxState::WaitingAck(expected);
					return Vec::new();
				}
				if Self::is_short_block(&self.last_sent, self.negotiated.blksize) {
					self.state = TxState::Dallying;
					vec![Action::ArmTimer(self.dally)]
				} else {
					match self.send_next_block(expected.next()) {
						Ok(action) => vec![action, Action::ArmTimer(self.negotiated.timeout)],
						Err(err) => {
							let outcome = Outcome::from_error(&err, self.bytes_transferred);
							self.terminate(outcome)
						}
					}
				}
			}
			TxState::Dallying => {
				// A retransmitted final ACK: resend the terminal DATA once more.
				self.state = TxState::Dallying;
				vec![Action::Send(self.peer.addr().expect("bound"), self.last_sent.clone())]
			}
			TxState::Terminal => Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum RxState {
	/// Client-only mirror of `TxState::AwaitingFirstReply`, for RRQ.
	AwaitingFirstReply,
	WaitingData(BlockNumber),
	Terminal,
}

/// Drives the receiving side of a transfer: the server for WRQ, the
/// client for RRQ. Hands received blocks to a `Sink`, ACKing in order and
/// tolerating the single most-recent duplicate.
pub struct TransferRx<Si: Sink> {
	sink: Si,
	peer: PeerBinding,
	max_retries: u8,
	attempts: u8,
	negotiated: Negotiated,
	state: RxState,
	last_sent: Packet,
	bytes_transferred: u64,
	terminated: bool,
	requested_options: OptionSet,
}

impl<Si: Sink> TransferRx<Si> {
	pub fn new_established(
		mut sink: Si,
		peer: SocketAddr,
		oack_options: Option<OptionSet>,
		negotiated: Negotiated,
		max_retries: u8,
	) -> (Self, Action) {
		sink.reset();
		let packet = match oack_options {
			Some(options) => Packet::OptionsAck { options },
			None => Packet::Ack { block: BlockNumber::new(0) },
		};
		let machine = Self {
			sink,
			peer: PeerBinding::Bound(peer),
			max_retries,
			attempts: 0,
			negotiated,
			state: RxState::WaitingData(BlockNumber::new(1)),
			last_sent: packet.clone(),
			bytes_transferred: 0,
			terminated: false,
			requested_options: OptionSet::new(),
		};
		(machine, Action::Send(peer, packet))
	}

	/// `requested_options` is what the client itself asked for, used to
	/// validate the server's OACK once it arrives.
	pub fn new_awaiting_reply(
		mut sink: Si,
		server: SocketAddr,
		sent_request: Packet,
		requested_options: OptionSet,
		max_retries: u8,
	) -> Self {
		sink.reset();
		Self {
			sink,
			peer: PeerBinding::Unbound { expected_ip: server.ip() },
			max_retries,
			attempts: 0,
			negotiated: Negotiated::default(),
			state: RxState::AwaitingFirstReply,
			last_sent: sent_request,
			bytes_transferred: 0,
			terminated: false,
			requested_options,
		}
	}

	pub fn bytes_transferred(&self) -> u64 {
		self.bytes_transferred
	}

	pub fn negotiated_blksize(&self) -> u16 {
		self.negotiated.blksize
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self.state, RxState::Terminal)
	}

	fn terminate(&mut self, outcome: Outcome) -> Vec<Action> {
		self.state = RxState::Terminal;
		if !self.terminated {
			self.terminated = true;
			self.sink.finished();
		}
		vec![Action::Terminate(outcome)]
	}

	fn peer_request_dest(&self) -> SocketAddr {
		match self.peer {
			PeerBinding::Unbound { expected_ip } => SocketAddr::new(expected_ip, 69),
			PeerBinding::Bound(addr) => addr,
		}
	}

	fn accept_data(&mut self, block: BlockNumber, payload: Vec<u8>) -> Vec<Action> {
		if let Err(msg) = self.sink.receive(&payload) {
			let err = OperationError::HandlerReject(msg);
			let outcome = Outcome::from_error(&err, self.bytes_transferred);
			return self.terminate(outcome);
		}
		self.bytes_transferred += payload.len() as u64;
		let short = (payload.len() as u16) < self.negotiated.blksize;
		let ack = Packet::Ack { block };
		self.last_sent = ack.clone();
		self.attempts = 0;

		let dest = self.peer.addr().expect("peer bound before steady-state receiving");
		if short {
			let outcome = Outcome::ok(self.bytes_transferred);
			self.state = RxState::Terminal;
			if !self.terminated {
				self.terminated = true;
				self.sink.finished();
			}
			vec![Action::Send(dest, ack), Action::Terminate(outcome)]
		} else {
			self.state = RxState::WaitingData(block.next());
			vec![Action::Send(dest, ack), Action::ArmTimer(self.negotiated.timeout)]
		}
	}

	pub fn handle(&mut self, event: Event) -> Vec<Action> {
		if self.is_terminal() {
			return Vec::new();
		}

		match event {
			Event::Cancelled => {
				let outcome = Outcome::from_error(&OperationError::Cancelled, self.bytes_transferred);
				self.terminate(outcome)
			}
			Event::TimerFired => {
				if self.attempts >= self.max_retries {
					let err = OperationError::Timeout;
					let outcome = Outcome::from_error(&err, self.bytes_transferred);
					return self.terminate(outcome);
				}
				self.attempts += 1;
				vec![Action::Send(self.peer_request_dest(), self.last_sent.clone()), Action::ArmTimer(self.negotiated.timeout)]
			}
			Event::DatagramInvalid { from } => {
				if self.peer.matches(from) {
					let err = OperationError::Protocol(super::error::PacketError::Truncated);
					let outcome = Outcome::from_error(&err, self.bytes_transferred);
					self.terminate(outcome)
				} else {
					vec![Action::Send(from, Packet::Error { code: ErrorCode::UnknownTransferId, message: "unknown transfer ID".to_string() })]
				}
			}
			Event::Datagram { from, packet } => self.handle_datagram(from, packet),
		}
	}

	fn handle_datagram(&mut self, from: SocketAddr, packet: Packet) -> Vec<Action> {
		if !self.peer.matches(from) {
			return vec![Action::Send(from, Packet::Error { code: ErrorCode::UnknownTransferId, message: "unknown transfer ID".to_string() })];
		}

		if let Packet::Error { code, message } = packet {
			let err = OperationError::PeerError { code, message };
			let outcome = Outcome::from_error(&err, self.bytes_transferred);
			return self.terminate(outcome);
		}

		match std::mem::replace(&mut self.state, RxState::Terminal) {
			RxState::AwaitingFirstReply => {
				self.peer = PeerBinding::Bound(from);
				self.attempts = 0;
				match packet {
					Packet::OptionsAck { ref options } => {
						match validate_client_oack(&self.requested_options, options) {
							Ok(negotiated) => self.negotiated = negotiated,
							Err(err) => {
								let outcome = Outcome::from_error(&err, self.bytes_transferred);
								return self.terminate(outcome);
							}
						}
						let ack = Packet::Ack { block: BlockNumber::new(0) };
						self.last_sent = ack.clone();
						self.state = RxState::WaitingData(BlockNumber::new(1));
						vec![Action::Send(from, ack), Action::ArmTimer(self.negotiated.timeout)]
					}
					Packet::Data { block, payload } if block == BlockNumber::new(1) => {
						self.state = RxState::WaitingData(BlockNumber::new(1));
						self.accept_data(block, payload)
					}
					_ => {
						let err = OperationError::Protocol(super::error::PacketError::UnexpectedOpcode(0));
						let outcome = Outcome::from_error(&err, self.bytes_transferred);
						self.terminate(outcome)
					}
				}
			}
			RxState::WaitingData(expected) => {
				let Packet::Data { block, payload } = packet else {
					self.state = RxState::WaitingData(expected);
					return Vec::new();
				};
				if block == expected {
					self.accept_data(block, payload)
				} else if expected.get() > 0 && block == BlockNumber::new(expected.get().wrapping_sub(1)) {
					// Duplicate of the previous block: re-send the exact last ACK.
					self.state = RxState::WaitingData(expected);
					let dest = self.peer.addr().expect("bound");
					vec![Action::Send(dest, self.last_sent.clone())]
				} else {
					self.state = RxState::WaitingData(expected);
					Vec::new()
				}
			}
			RxState::Terminal => Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tftp::handler::{MemorySink, MemorySource};

	fn addr(port: u16) -> SocketAddr {
		SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port)
	}

	fn negotiated(blksize: u16) -> Negotiated {
		Negotiated { blksize, timeout: Duration::from_secs(1) }
	}

	#[test]
	fn scenario_simple_read_no_options() {
		let source = MemorySource::new(b"HELLO\n".to_vec());
		let (mut tx, first) = TransferTx::new_established(source, addr(4000), None, negotiated(512), 5, Duration::from_secs(1)).unwrap();
		assert_eq!(first, Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(1), payload: b"HELLO\n".to_vec() }));

		let actions = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(1) } });
		assert!(actions.iter().any(|a| matches!(a, Action::ArmTimer(_))));

		// A retransmitted final ACK arriving during the dally window re-sends
		// the terminal DATA once more, without terminating yet.
		let retried = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(1) } });
		assert_eq!(retried, vec![Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(1), payload: b"HELLO\n".to_vec() })]);
		assert!(!tx.is_terminal());

		// The dally timer firing terminates the transfer ok, regardless of
		// whether a lost final ACK was ever retried.
		let dally_actions = tx.handle(Event::TimerFired);
		assert!(matches!(&dally_actions[..], [Action::Terminate(o)] if o.kind == super::super::error::OutcomeKind::Ok));
		assert!(tx.is_terminal());
	}

	#[test]
	fn scenario_blksize_4_terminates_on_short_block() {
		let source = MemorySource::new(b"ABCDEFGHIJ".to_vec());
		let mut options = OptionSet::new();
		options.insert("blksize", "4");
		let (mut tx, first) = TransferTx::new_established(source, addr(4000), Some(options), negotiated(4), 5, Duration::from_secs(1)).unwrap();
		assert_eq!(first, Action::Send(addr(4000), Packet::OptionsAck { options: { let mut o = OptionSet::new(); o.insert("blksize", "4"); o } }));

		let a1 = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(0) } });
		assert!(a1.iter().any(|a| *a == Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(1), payload: b"ABCD".to_vec() })));

		let a2 = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(1) } });
		assert!(a2.iter().any(|a| *a == Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(2), payload: b"EFGH".to_vec() })));

		let a3 = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(2) } });
		assert!(a3.iter().any(|a| *a == Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(3), payload: b"IJ".to_vec() })));
		assert_eq!(tx.bytes_transferred(), 10);

		let a4 = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(3) } });
		assert!(a4.iter().any(|a| matches!(a, Action::ArmTimer(_))));
	}

	#[test]
	fn scenario_write_exact_multiple_terminates_on_empty_data() {
		let sink = MemorySink::new();
		let mut options = OptionSet::new();
		options.insert("blksize", "4");
		let (mut rx, first) = TransferRx::new_established(sink, addr(4000), Some(options), negotiated(4), 5);
		assert!(matches!(first, Action::Send(_, Packet::OptionsAck { .. })));

		let a1 = rx.handle(Event::Datagram { from: addr(4000), packet: Packet::Data { block: BlockNumber::new(1), payload: b"0123".to_vec() } });
		assert!(a1.iter().any(|a| *a == Action::Send(addr(4000), Packet::Ack { block: BlockNumber::new(1) })));

		let a2 = rx.handle(Event::Datagram { from: addr(4000), packet: Packet::Data { block: BlockNumber::new(2), payload: b"4567".to_vec() } });
		assert!(a2.iter().any(|a| *a == Action::Send(addr(4000), Packet::Ack { block: BlockNumber::new(2) })));

		let a3 = rx.handle(Event::Datagram { from: addr(4000), packet: Packet::Data { block: BlockNumber::new(3), payload: Vec::new() } });
		assert!(a3.iter().any(|a| *a == Action::Send(addr(4000), Packet::Ack { block: BlockNumber::new(3) })));
		assert!(a3.iter().any(|a| matches!(a, Action::Terminate(o) if o.kind == super::super::error::OutcomeKind::Ok)));
		assert_eq!(rx.bytes_transferred(), 8);
	}

	#[test]
	fn scenario_lost_ack_retransmits_without_duplicating_bytes() {
		let source = MemorySource::new(b"ABCDEFGHIJ".to_vec());
		let mut options = OptionSet::new();
		options.insert("blksize", "4");
		let (mut tx, _first) = TransferTx::new_established(source, addr(4000), Some(options), negotiated(4), 5, Duration::from_secs(1)).unwrap();
		tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(0) } });

		// ACK(1) never arrives; the timer fires instead.
		let retransmit = tx.handle(Event::TimerFired);
		assert!(retransmit.iter().any(|a| *a == Action::Send(addr(4000), Packet::Data { block: BlockNumber::new(1), payload: b"ABCD".to_vec() })));

		// ACK(1) now arrives late: transfer resumes normally, no duplication.
		tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(1) } });
		tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(2) } });
		tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(3) } });
		assert_eq!(tx.bytes_transferred(), 10);
	}

	#[test]
	fn scenario_wrong_tid_gets_error5_without_disturbing_state() {
		let source = MemorySource::new(b"HELLO\n".to_vec());
		let (mut tx, _first) = TransferTx::new_established(source, addr(4000), None, negotiated(512), 5, Duration::from_secs(1)).unwrap();

		let actions = tx.handle(Event::Datagram { from: addr(9999), packet: Packet::Data { block: BlockNumber::new(1), payload: b"XX".to_vec() } });
		assert_eq!(actions, vec![Action::Send(addr(9999), Packet::Error { code: ErrorCode::UnknownTransferId, message: "unknown transfer ID".to_string() })]);
		assert!(!tx.is_terminal());

		let resumed = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(1) } });
		assert!(!resumed.is_empty());
	}

	#[test]
	fn scenario_options_rejected_terminates_without_data() {
		let requested = {
			let mut o = OptionSet::new();
			o.insert("blksize", "3");
			o
		};
		let result = negotiate_server_options(&requested, 65464, RequestKind::Read, Some(6), |_| true);
		assert!(result.is_err());
	}

	#[test]
	fn at_most_one_outstanding_data_between_ack_n_and_ack_n_plus_1() {
		let source = MemorySource::new(vec![0u8; 20]);
		let mut options = OptionSet::new();
		options.insert("blksize", "4");
		let (mut tx, first) = TransferTx::new_established(source, addr(4000), Some(options), negotiated(4), 5, Duration::from_secs(1)).unwrap();
		assert!(matches!(first, Action::Send(_, Packet::OptionsAck { .. })));

		let a1 = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(0) } });
		let sent_block = a1.iter().find_map(|a| match a { Action::Send(_, Packet::Data { block, .. }) => Some(*block), _ => None });
		assert_eq!(sent_block, Some(BlockNumber::new(1)));

		// Stale ACK(0) again must not produce a new DATA(2).
		let stale = tx.handle(Event::Datagram { from: addr(4000), packet: Packet::Ack { block: BlockNumber::new(0) } });
		assert!(stale.is_empty());
	}

	#[test]
	fn single_finished_even_on_cancellation() {
		let source = MemorySource::new(b"x".to_vec());
		let (mut tx, _first) = TransferTx::new_established(source, addr(4000), None, negotiated(512), 5, Duration::from_secs(1)).unwrap();
		tx.handle(Event::Cancelled);
		// A second event after Terminal must not call finished() again; the
		// driver contract relies on `terminated` latching, which we assert
		// indirectly by checking no further actions are produced.
		let actions = tx.handle(Event::Cancelled);
		assert!(actions.is_empty());
	}

	#[test]
	fn duplicate_write_block_resends_exact_last_ack() {
		let sink = MemorySink::new();
		let (mut rx, _first) = TransferRx::new_established(sink, addr(4000), None, negotiated(512), 5);
		rx.handle(Event::Datagram { from: addr(4000), packet: Packet::Data { block: BlockNumber::new(1), payload: b"AB".to_vec() } });

		let dup = rx.handle(Event::Datagram { from: addr(4000), packet: Packet::Data { block: BlockNumber::new(1), payload: b"AB".to_vec() } });
		assert_eq!(dup, vec![Action::Send(addr(4000), Packet::Ack { block: BlockNumber::new(1) })]);
	}

	#[test]
	fn client_oack_validation_rejects_unrequested_option() {
		let requested = OptionSet::new();
		let mut echoed = OptionSet::new();
		echoed.insert("blksize", "1024");
		assert!(validate_client_oack(&requested, &echoed).is_err());
	}

	#[test]
	fn client_oack_validation_accepts_requested_blksize() {
		let mut requested = OptionSet::new();
		requested.insert("blksize", "1024");
		let negotiated = validate_client_oack(&requested, &requested).unwrap();
		assert_eq!(negotiated.blksize, 1024);
	}
}
