//! Core TFTP protocol implementation: block numbers, the packet codec,
//! option negotiation, data-handler contracts, and the sans-I/O operation
//! state machines. Socket plumbing lives in `operation.rs`; everything else
//! in this module tree is pure and independently testable.

pub mod consts {
	pub const TFTP_LISTEN_PORT: u16 = 69;
	pub const DEFAULT_BLOCK_SIZE: u16 = 512;
	pub const DEFAULT_TIMEOUT_SECS: u8 = 5;
	pub const DEFAULT_RETRIES: u8 = 5;

	pub const OPCODE_RRQ: u16 = 1;
	pub const OPCODE_WRQ: u16 = 2;
	pub const OPCODE_DATA: u16 = 3;
	pub const OPCODE_ACK: u16 = 4;
	pub const OPCODE_ERROR: u16 = 5;
	pub const OPCODE_OACK: u16 = 6;
}

pub mod block;
pub mod error;
pub mod handler;
pub mod operation;
pub mod options;
pub mod packet;
pub mod state;

use std::fmt;

pub use block::BlockNumber;
pub use error::{ErrorCode, OperationError, Outcome, OutcomeKind, PacketError};
pub use handler::{Sink, Source};
pub use operation::OperationConfig;
pub use options::OptionSet;
pub use packet::{Packet, PacketKind};

/// The role an operation plays: client requests a transfer, server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Client,
	Server,
}

/// Whether an operation reads from or writes to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	Read,
	Write,
}

/// RFC 1350 transfer mode. Only `Octet` is fully supported; `NetAscii` and
/// `Mail` are recognised on the wire but not translated, matching the
/// NETASCII/MAIL non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
	NetAscii,
	Octet,
	Mail,
	Invalid,
}

impl TransferMode {
	pub fn parse(input: &str) -> Self {
		match input.to_ascii_lowercase().as_str() {
			"netascii" => Self::NetAscii,
			"octet" => Self::Octet,
			"mail" => Self::Mail,
			_ => Self::Invalid,
		}
	}

	/// The uppercase wire form implementations are expected to emit.
	pub const fn as_wire_str(self) -> &'static str {
		match self {
			Self::NetAscii => "NETASCII",
			Self::Octet => "OCTET",
			Self::Mail => "MAIL",
			Self::Invalid => "INVALID",
		}
	}
}

impl fmt::Display for TransferMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_wire_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mode_parse_is_case_insensitive() {
		assert_eq!(TransferMode::parse("OCTET"), TransferMode::Octet);
		assert_eq!(TransferMode::parse("Octet"), TransferMode::Octet);
		assert_eq!(TransferMode::parse("netascii"), TransferMode::NetAscii);
	}

	#[test]
	fn mode_parse_unknown_is_invalid() {
		assert_eq!(TransferMode::parse("binary"), TransferMode::Invalid);
	}
}
