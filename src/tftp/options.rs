//! RFC 2347 option extensions: a generic, order-preserving string map plus
//! typed accessors for the three options this crate knows about
//! (`blksize`, `timeout`, `tsize` — RFC 2348/2349).

use std::fmt;

pub const OPT_BLKSIZE: &str = "blksize";
pub const OPT_TIMEOUT: &str = "timeout";
pub const OPT_TSIZE: &str = "tsize";

pub const BLKSIZE_MIN: u64 = 8;
pub const BLKSIZE_HARD_MAX: u64 = 65_464;
pub const BLKSIZE_DEFAULT: u16 = 512;

pub const TIMEOUT_MIN: u64 = 1;
pub const TIMEOUT_MAX: u64 = 255;
pub const TIMEOUT_DEFAULT: u8 = 5;

pub const TSIZE_MIN: u64 = 0;
pub const TSIZE_MAX: u64 = u64::MAX;

/// An ordered name -> value mapping, as carried in RRQ/WRQ/OACK packets.
///
/// Names are canonicalised to lowercase on insertion and lookup. The first
/// occurrence of a duplicate name wins, matching the wire decode contract.
/// Iteration order matches insertion order, which the codec relies on to
/// preserve client option order when building an OACK.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
	entries: Vec<(String, String)>,
}

impl OptionSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Inserts a name/value pair. If `name` (case-insensitively) is already
	/// present, this is a no-op — the first occurrence on the wire wins.
	pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		let name = name.as_ref().to_ascii_lowercase();
		if self.entries.iter().any(|(k, _)| *k == name) {
			return;
		}
		self.entries.push((name, value.into()));
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		let name = name.to_ascii_lowercase();
		self.entries
			.iter()
			.find(|(k, _)| *k == name)
			.map(|(_, v)| v.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Builds the subset of `self` whose names appear in `names`, preserving
	/// `self`'s insertion order. Used to answer with "exactly the accepted
	/// options, in client order" per the negotiation algorithm.
	pub fn subset_preserving_order(&self, names: &[&str]) -> Self {
		let mut out = Self::new();
		for (k, v) in &self.entries {
			if names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
				out.entries.push((k.clone(), v.clone()));
			}
		}
		out
	}
}

impl fmt::Display for OptionSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for (k, v) in self.iter() {
			if !first {
				write!(f, ", ")?;
			}
			write!(f, "{k}={v}")?;
			first = false;
		}
		Ok(())
	}
}

/// Result of resolving one known option against the client's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownOption {
	/// The option was not present at all; negotiation passes with "not set".
	Absent,
	/// Present but malformed or outside the hard RFC bounds.
	Invalid,
	/// Present, well-formed, and within bounds.
	Value(u64),
}

/// Parses and range-checks a single known option out of `options`.
pub fn known(options: &OptionSet, name: &str, min: u64, max: u64) -> KnownOption {
	match options.get(name) {
		None => KnownOption::Absent,
		Some(raw) => match raw.parse::<u64>() {
			Ok(v) if v >= min && v <= max => KnownOption::Value(v),
			_ => KnownOption::Invalid,
		},
	}
}
