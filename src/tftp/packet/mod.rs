//! The six TFTP packet types and their wire codec (RFC 1350 §5, RFC 2347
//! option extension). `classify` is infallible and only looks at the
//! opcode; `Packet::decode`/`Packet::encode` do the full structural
//! validation described in the codec's decoding contract.

use super::consts;
use super::error::{ErrorCode, PacketError};
use super::options::OptionSet;
use super::{BlockNumber, TransferMode};

/// Largest legal DATA payload plus its 4-byte header, bounding how large a
/// receive buffer ever needs to be.
pub const MAX_PACKET_SIZE: usize = 4 + super::options::BLKSIZE_HARD_MAX as usize;

/// Coarse classification of a raw datagram by opcode alone. Never panics,
/// never fails — anything that isn't a known opcode, or is too short to
/// carry one, is `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
	ReadRequest,
	WriteRequest,
	Data,
	Ack,
	Error,
	OptionsAck,
	Invalid,
}

pub fn classify(raw: &[u8]) -> PacketKind {
	if raw.len() < 2 {
		return PacketKind::Invalid;
	}
	match u16::from_be_bytes([raw[0], raw[1]]) {
		consts::OPCODE_RRQ => PacketKind::ReadRequest,
		consts::OPCODE_WRQ => PacketKind::WriteRequest,
		consts::OPCODE_DATA => PacketKind::Data,
		consts::OPCODE_ACK => PacketKind::Ack,
		consts::OPCODE_ERROR => PacketKind::Error,
		consts::OPCODE_OACK => PacketKind::OptionsAck,
		_ => PacketKind::Invalid,
	}
}

/// A decoded TFTP packet of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
	ReadRequest { filename: String, mode: TransferMode, options: OptionSet },
	WriteRequest { filename: String, mode: TransferMode, options: OptionSet },
	Data { block: BlockNumber, payload: Vec<u8> },
	Ack { block: BlockNumber },
	Error { code: ErrorCode, message: String },
	OptionsAck { options: OptionSet },
}

impl Packet {
	pub fn kind(&self) -> PacketKind {
		match self {
			Self::ReadRequest { .. } => PacketKind::ReadRequest,
			Self::WriteRequest { .. } => PacketKind::WriteRequest,
			Self::Data { .. } => PacketKind::Data,
			Self::Ack { .. } => PacketKind::Ack,
			Self::Error { .. } => PacketKind::Error,
			Self::OptionsAck { .. } => PacketKind::OptionsAck,
		}
	}

	/// Decodes any packet kind, enforcing `max_blksize` against DATA
	/// payloads. Callers that haven't negotiated a block size yet should
	/// pass `BLKSIZE_HARD_MAX`.
	pub fn decode(raw: &[u8], max_blksize: usize) -> Result<Self, PacketError> {
		match classify(raw) {
			PacketKind::ReadRequest => decode_request(raw, true),
			PacketKind::WriteRequest => decode_request(raw, false),
			PacketKind::Data => decode_data(raw, max_blksize),
			PacketKind::Ack => decode_ack(raw),
			PacketKind::Error => decode_error(raw),
			PacketKind::OptionsAck => decode_oack(raw),
			PacketKind::Invalid => {
				let opcode = if raw.len() >= 2 { u16::from_be_bytes([raw[0], raw[1]]) } else { 0 };
				Err(PacketError::InvalidOpcode(opcode))
			}
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			Self::ReadRequest { filename, mode, options } => {
				encode_request(consts::OPCODE_RRQ, filename, *mode, options)
			}
			Self::WriteRequest { filename, mode, options } => {
				encode_request(consts::OPCODE_WRQ, filename, *mode, options)
			}
			Self::Data { block, payload } => {
				debug_assert!(block.get() != 0, "DATA block number must never be 0");
				let mut buf = Vec::with_capacity(4 + payload.len());
				buf.extend_from_slice(&consts::OPCODE_DATA.to_be_bytes());
				buf.extend_from_slice(&block.get().to_be_bytes());
				buf.extend_from_slice(payload);
				buf
			}
			Self::Ack { block } => {
				let mut buf = Vec::with_capacity(4);
				buf.extend_from_slice(&consts::OPCODE_ACK.to_be_bytes());
				buf.extend_from_slice(&block.get().to_be_bytes());
				buf
			}
			Self::Error { code, message } => {
				let mut buf = Vec::with_capacity(5 + message.len());
				buf.extend_from_slice(&consts::OPCODE_ERROR.to_be_bytes());
				buf.extend_from_slice(&code.code().to_be_bytes());
				buf.extend_from_slice(message.as_bytes());
				buf.push(0);
				buf
			}
			Self::OptionsAck { options } => {
				let mut buf = Vec::new();
				buf.extend_from_slice(&consts::OPCODE_OACK.to_be_bytes());
				encode_options(&mut buf, options);
				buf
			}
		}
	}
}

fn encode_request(opcode: u16, filename: &str, mode: TransferMode, options: &OptionSet) -> Vec<u8> {
	let mut buf = Vec::with_capacity(2 + filename.len() + 1 + 8);
	buf.extend_from_slice(&opcode.to_be_bytes());
	buf.extend_from_slice(filename.as_bytes());
	buf.push(0);
	buf.extend_from_slice(mode.as_wire_str().as_bytes());
	buf.push(0);
	encode_options(&mut buf, options);
	buf
}

fn encode_options(buf: &mut Vec<u8>, options: &OptionSet) {
	for (name, value) in options.iter() {
		buf.extend_from_slice(name.as_bytes());
		buf.push(0);
		buf.extend_from_slice(value.as_bytes());
		buf.push(0);
	}
}

/// Reads a NUL-terminated, printable-ASCII string off the front of `buf`,
/// returning it along with the remainder after the terminator.
fn read_cstr(buf: &[u8]) -> Result<(&str, &[u8]), PacketError> {
	let pos = buf.iter().position(|&b| b == 0).ok_or(PacketError::NotNullTerminated)?;
	let field = &buf[..pos];
	if !field.iter().all(|&b| (0x20..=0x7e).contains(&b)) {
		return Err(PacketError::InvalidCharacters);
	}
	// Fields are already confirmed printable ASCII, which is valid UTF-8.
	let s = std::str::from_utf8(field).expect("printable ASCII is valid UTF-8");
	Ok((s, &buf[pos + 1..]))
}

/// Parses the option-pair tail of a request or OACK. Stops at the first
/// name/value pair it can't read cleanly and tolerates (while logging)
/// trailing garbage rather than failing the whole packet.
fn read_options(mut buf: &[u8]) -> OptionSet {
	let mut options = OptionSet::new();
	loop {
		if buf.is_empty() {
			break;
		}
		let (name, rest) = match read_cstr(buf) {
			Ok(v) => v,
			Err(_) => {
				log::debug!("trailing garbage after options ({} bytes)", buf.len());
				break;
			}
		};
		if name.is_empty() {
			break;
		}
		let (value, rest) = match read_cstr(rest) {
			Ok(v) => v,
			Err(_) => {
				log::debug!("option '{name}' has no matching value, ignoring tail");
				break;
			}
		};
		options.insert(name, value);
		buf = rest;
	}
	options
}

fn decode_request(raw: &[u8], read: bool) -> Result<Packet, PacketError> {
	let body = raw.get(2..).ok_or(PacketError::Truncated)?;
	let (filename, rest) = read_cstr(body)?;
	let (mode_str, rest) = read_cstr(rest)?;
	let mode = TransferMode::parse(mode_str);
	let options = read_options(rest);
	let filename = filename.to_string();
	Ok(if read {
		Packet::ReadRequest { filename, mode, options }
	} else {
		Packet::WriteRequest { filename, mode, options }
	})
}

fn decode_data(raw: &[u8], max_blksize: usize) -> Result<Packet, PacketError> {
	if raw.len() < 4 {
		return Err(PacketError::Truncated);
	}
	let block = BlockNumber::new(u16::from_be_bytes([raw[2], raw[3]]));
	let payload = &raw[4..];
	if payload.len() > max_blksize {
		return Err(PacketError::PayloadTooLarge(payload.len(), max_blksize));
	}
	Ok(Packet::Data { block, payload: payload.to_vec() })
}

fn decode_ack(raw: &[u8]) -> Result<Packet, PacketError> {
	if raw.len() != 4 {
		return Err(PacketError::MalformedAck);
	}
	Ok(Packet::Ack { block: BlockNumber::new(u16::from_be_bytes([raw[2], raw[3]])) })
}

fn decode_error(raw: &[u8]) -> Result<Packet, PacketError> {
	if raw.len() < 4 {
		return Err(PacketError::Truncated);
	}
	let code = ErrorCode::try_from(u16::from_be_bytes([raw[2], raw[3]]))?;
	let (message, _) = read_cstr(&raw[4..])?;
	Ok(Packet::Error { code, message: message.to_string() })
}

fn decode_oack(raw: &[u8]) -> Result<Packet, PacketError> {
	let options = read_options(raw.get(2..).unwrap_or(&[]));
	Ok(Packet::OptionsAck { options })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rrq(filename: &str, options: OptionSet) -> Packet {
		Packet::ReadRequest { filename: filename.to_string(), mode: TransferMode::Octet, options }
	}

	#[test]
	fn classify_handles_all_opcodes_and_never_panics() {
		assert_eq!(classify(&[]), PacketKind::Invalid);
		assert_eq!(classify(&[0]), PacketKind::Invalid);
		assert_eq!(classify(&[0, 0]), PacketKind::Invalid);
		assert_eq!(classify(&[0, 1]), PacketKind::ReadRequest);
		assert_eq!(classify(&[0, 2]), PacketKind::WriteRequest);
		assert_eq!(classify(&[0, 3]), PacketKind::Data);
		assert_eq!(classify(&[0, 4]), PacketKind::Ack);
		assert_eq!(classify(&[0, 5]), PacketKind::Error);
		assert_eq!(classify(&[0, 6]), PacketKind::OptionsAck);
		assert_eq!(classify(&[0, 7]), PacketKind::Invalid);
		assert_eq!(classify(&[255, 255]), PacketKind::Invalid);
	}

	#[test]
	fn round_trip_rrq_without_options() {
		let p = rrq("hello.txt", OptionSet::new());
		let encoded = p.encode();
		let decoded = Packet::decode(&encoded, super::super::options::BLKSIZE_HARD_MAX as usize).unwrap();
		assert_eq!(p, decoded);
	}

	#[test]
	fn round_trip_wrq_with_options_preserves_order() {
		let mut options = OptionSet::new();
		options.insert("tsize", "0");
		options.insert("blksize", "1024");
		let p = Packet::WriteRequest {
			filename: "a/b.bin".to_string(),
			mode: TransferMode::Octet,
			options,
		};
		let encoded = p.encode();
		let decoded = Packet::decode(&encoded, 1024).unwrap();
		assert_eq!(p, decoded);
	}

	#[test]
	fn round_trip_data_ack_error_oack() {
		let data = Packet::Data { block: BlockNumber::new(7), payload: vec![1, 2, 3, 4] };
		assert_eq!(Packet::decode(&data.encode(), 512).unwrap(), data);

		let ack = Packet::Ack { block: BlockNumber::new(0) };
		assert_eq!(Packet::decode(&ack.encode(), 512).unwrap(), ack);

		let error = Packet::Error { code: ErrorCode::FileNotFound, message: "nope".to_string() };
		assert_eq!(Packet::decode(&error.encode(), 512).unwrap(), error);

		let mut options = OptionSet::new();
		options.insert("timeout", "3");
		let oack = Packet::OptionsAck { options };
		assert_eq!(Packet::decode(&oack.encode(), 512).unwrap(), oack);
	}

	#[test]
	fn mode_is_emitted_uppercase() {
		let p = rrq("x", OptionSet::new());
		let encoded = p.encode();
		assert!(encoded.windows(5).any(|w| w == b"OCTET"));
	}

	#[test]
	fn data_payload_over_blksize_is_rejected() {
		let raw = Packet::Data { block: BlockNumber::new(1), payload: vec![0u8; 10] }.encode();
		assert!(matches!(Packet::decode(&raw, 4), Err(PacketError::PayloadTooLarge(10, 4))));
	}

	#[test]
	fn ack_wrong_length_is_malformed() {
		assert!(matches!(decode_ack(&[0, 4, 0, 1, 0]), Err(PacketError::MalformedAck)));
		assert!(matches!(decode_ack(&[0, 4, 0]), Err(PacketError::MalformedAck)));
	}

	#[test]
	fn request_missing_null_terminator_is_rejected() {
		let raw = vec![0, 1, b'a', b'b']; // no NUL after filename
		assert!(matches!(Packet::decode(&raw, 512), Err(PacketError::NotNullTerminated)));
	}

	#[test]
	fn unknown_mode_decodes_to_invalid_mode_not_an_error() {
		let mut raw = vec![0, 1];
		raw.extend_from_slice(b"x\0binary\0");
		let decoded = Packet::decode(&raw, 512).unwrap();
		assert!(matches!(decoded, Packet::ReadRequest { mode: TransferMode::Invalid, .. }));
	}

	#[test]
	fn trailing_garbage_after_options_is_tolerated() {
		let mut raw = vec![0, 1];
		raw.extend_from_slice(b"f\0octet\0blksize\0512\0");
		raw.extend_from_slice(b"\xff\xff"); // not a clean NUL-terminated pair
		let decoded = Packet::decode(&raw, 512).unwrap();
		let Packet::ReadRequest { options, .. } = decoded else { panic!("expected RRQ") };
		assert_eq!(options.get("blksize"), Some("512"));
	}

	#[test]
	fn option_parsing_stops_at_first_empty_name() {
		let mut raw = vec![0, 6];
		raw.extend_from_slice(b"blksize\0512\0");
		raw.push(0); // empty name
		raw.extend_from_slice(b"timeout\05\0"); // must be ignored
		let decoded = Packet::decode(&raw, 512).unwrap();
		let Packet::OptionsAck { options } = decoded else { panic!("expected OACK") };
		assert_eq!(options.len(), 1);
		assert!(!options.contains("timeout"));
	}

	#[test]
	fn classify_never_panics_on_arbitrary_short_input() {
		for len in 0..4 {
			let buf = vec![0xaa; len];
			let _ = classify(&buf);
		}
	}
}
