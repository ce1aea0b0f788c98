#![allow(missing_docs)]

use std::{error, fmt};

/// Boxed error reported by a collaborator (usually the hardware backend).
pub type Cause = Box<dyn error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// The event name is not in the platform's supported list.
	UnknownEvent,

	/// The overflow threshold is below the configured minimum.
	ThresholdTooLow,

	/// A sub-event mask was supplied for an event (or platform) that does not
	/// take one.
	MaskUnsupported,

	/// Neither user nor kernel counting was requested.
	InvalidModeCombination,

	/// Another consumer currently owns the hardware counters.
	Busy,

	/// Every counter slot is in use.
	ResourceExhausted,

	/// The platform cannot attribute an overflow to a specific counter and
	/// already has one active enabling.
	TooManyEnablings,

	/// The backend rejected a counter set. The attempted change has been rolled
	/// back; the backend's reason is available as the [`source`].
	///
	/// [`source`]: https://doc.rust-lang.org/std/error/trait.Error.html#method.source
	ProgrammingFailed,

	/// The platform has no counters, or cannot raise overflow interrupts.
	Unsupported,

	/// A probe cannot be destroyed while it is enabled.
	StillEnabled,

	/// The probe has been destroyed.
	Destroyed,

	/// The CPU id is outside the configured CPU range.
	UnknownCpu,
}

impl ErrorKind {
	fn description(&self) -> &'static str {
		match *self {
			ErrorKind::UnknownEvent => "unknown event",
			ErrorKind::ThresholdTooLow => "overflow threshold below minimum",
			ErrorKind::MaskUnsupported => "event mask not supported",
			ErrorKind::InvalidModeCombination => "no counting mode requested",
			ErrorKind::Busy => "counters owned by another consumer",
			ErrorKind::ResourceExhausted => "no free counter slot",
			ErrorKind::TooManyEnablings => "platform allows a single enabling",
			ErrorKind::ProgrammingFailed => "failed to program counters",
			ErrorKind::Unsupported => "unsupported platform",
			ErrorKind::StillEnabled => "probe still enabled",
			ErrorKind::Destroyed => "probe destroyed",
			ErrorKind::UnknownCpu => "unknown cpu",
		}
	}

	/// The errno value a C caller expects for this kind of failure.
	pub fn errno(&self) -> libc::c_int {
		match *self {
			ErrorKind::UnknownEvent
			| ErrorKind::ThresholdTooLow
			| ErrorKind::MaskUnsupported
			| ErrorKind::InvalidModeCombination => libc::EINVAL,
			ErrorKind::Busy | ErrorKind::StillEnabled => libc::EBUSY,
			ErrorKind::ResourceExhausted => libc::ENOSPC,
			ErrorKind::TooManyEnablings => libc::EAGAIN,
			ErrorKind::ProgrammingFailed => libc::EIO,
			ErrorKind::Unsupported => libc::ENOTSUP,
			ErrorKind::UnknownCpu => libc::ENXIO,
			ErrorKind::Destroyed => libc::ENOENT,
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self.cause {
			None => None,
			Some(ref b) => Some(b.as_ref()),
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.cause {
			None => write!(f, "{}", self.kind.description()),
			Some(ref c) => write!(f, "{}: {}", self.kind.description(), c),
		}
	}
}

#[doc(hidden)]
impl PartialEq for Error {
	fn eq(&self, other: &Error) -> bool {
		self.kind == other.kind
	}
}

impl Error {
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Shorthand for `self.kind().errno()`.
	pub fn errno(&self) -> libc::c_int {
		self.kind.errno()
	}
}

pub(crate) fn new_error(kind: ErrorKind) -> Error {
	Error { kind, cause: None }
}

pub(crate) fn new_cause_error(kind: ErrorKind, cause: Cause) -> Error {
	Error {
		kind,
		cause: Some(cause),
	}
}
