//! Error taxonomy: wire-level decode errors, the RFC 1350/2347 error codes,
//! and the internal `OperationError` categories an operation can terminate
//! with (spec'd as ProtocolError/OptionsError/TidMismatch/HandlerReject/
//! Timeout/PeerError/CancellationRequested).

use thiserror::Error;

/// Reasons `Packet::decode` or a `decode_*` helper can fail. Carries enough
/// detail to build an ERROR packet for the peer when appropriate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
	#[error("datagram too short to contain an opcode")]
	Truncated,
	#[error("opcode {0} is not valid for this packet kind")]
	UnexpectedOpcode(u16),
	#[error("{0} is not a TFTP opcode")]
	InvalidOpcode(u16),
	#[error("field is missing its NUL terminator")]
	NotNullTerminated,
	#[error("field contains non-ASCII or non-printable characters")]
	InvalidCharacters,
	#[error("DATA payload ({0} bytes) exceeds the negotiated block size ({1} bytes)")]
	PayloadTooLarge(usize, usize),
	#[error("ACK packet must be exactly 4 bytes")]
	MalformedAck,
	#[error("option list has a name with no matching value")]
	MalformedOptions,
}

/// RFC 1350 §5 / RFC 2347 error codes, wire value = discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u16)]
pub enum ErrorCode {
	#[error("not defined, see error message")]
	NotDefined = 0,
	#[error("file not found")]
	FileNotFound = 1,
	#[error("access violation")]
	AccessViolation = 2,
	#[error("disk full or allocation exceeded")]
	DiskFull = 3,
	#[error("illegal TFTP operation")]
	IllegalOperation = 4,
	#[error("unknown transfer ID")]
	UnknownTransferId = 5,
	#[error("file already exists")]
	FileExists = 6,
	#[error("no such user")]
	NoSuchUser = 7,
	#[error("option negotiation failed")]
	OptionNegotiationFailed = 8,
}

impl ErrorCode {
	pub const fn code(self) -> u16 {
		self as u16
	}
}

impl TryFrom<u16> for ErrorCode {
	type Error = PacketError;

	fn try_from(value: u16) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::NotDefined),
			1 => Ok(Self::FileNotFound),
			2 => Ok(Self::AccessViolation),
			3 => Ok(Self::DiskFull),
			4 => Ok(Self::IllegalOperation),
			5 => Ok(Self::UnknownTransferId),
			6 => Ok(Self::FileExists),
			7 => Ok(Self::NoSuchUser),
			8 => Ok(Self::OptionNegotiationFailed),
			other => Err(PacketError::InvalidOpcode(other)),
		}
	}
}

/// The category an operation terminated in. `TidMismatch` never appears
/// here — it is handled inline by the operation driver and is invisible to
/// callers, per the propagation policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
	#[error("protocol error: {0}")]
	Protocol(PacketError),
	#[error("option negotiation failed: {0}")]
	Options(String),
	#[error("data handler rejected the transfer: {0}")]
	HandlerReject(String),
	#[error("retry budget exhausted")]
	Timeout,
	#[error("peer sent error {code:?}: {message}")]
	PeerError { code: ErrorCode, message: String },
	#[error("operation was cancelled")]
	Cancelled,
}

impl OperationError {
	/// Maps this error to the wire `ErrorCode` sent to the peer, if any is
	/// sent at all (Timeout and Cancelled send nothing).
	pub fn wire_code(&self) -> Option<ErrorCode> {
		match self {
			Self::Protocol(_) => Some(ErrorCode::IllegalOperation),
			Self::Options(_) => Some(ErrorCode::OptionNegotiationFailed),
			Self::HandlerReject(_) => Some(ErrorCode::DiskFull),
			Self::Timeout | Self::Cancelled | Self::PeerError { .. } => None,
		}
	}
}

/// Outcome handed to an operation's completion callback. `finished()` on the
/// data handler is always called exactly once before this fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
	pub kind: OutcomeKind,
	pub code: Option<ErrorCode>,
	pub message: Option<String>,
	pub bytes_transferred: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
	Ok,
	Protocol,
	Options,
	HandlerReject,
	Timeout,
	PeerError,
	Cancelled,
}

impl Outcome {
	pub fn ok(bytes_transferred: u64) -> Self {
		Self { kind: OutcomeKind::Ok, code: None, message: None, bytes_transferred }
	}

	pub fn from_error(err: &OperationError, bytes_transferred: u64) -> Self {
		let kind = match err {
			OperationError::Protocol(_) => OutcomeKind::Protocol,
			OperationError::Options(_) => OutcomeKind::Options,
			OperationError::HandlerReject(_) => OutcomeKind::HandlerReject,
			OperationError::Timeout => OutcomeKind::Timeout,
			OperationError::PeerError { .. } => OutcomeKind::PeerError,
			OperationError::Cancelled => OutcomeKind::Cancelled,
		};
		let code = match err {
			OperationError::PeerError { code, .. } => Some(*code),
			other => other.wire_code(),
		};
		Self { kind, code, message: Some(err.to_string()), bytes_transferred }
	}
}
