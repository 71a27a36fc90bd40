use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Opaque token identifying one registered watch.
///
/// Handles are never reused by a source for a different registration, so a handle that
/// was invalidated and re-registered comes back as a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchHandle(u64);

impl WatchHandle {
	/// Handle carried by queue overflow records, which belong to no watch.
	pub const QUEUE: WatchHandle = WatchHandle(u64::MAX);

	pub fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub fn raw(self) -> u64 {
		self.0
	}
}

impl fmt::Display for WatchHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if *self == Self::QUEUE {
			write!(f, "#queue")
		} else {
			write!(f, "#{}", self.0)
		}
	}
}

/// Bitmask of event kinds, laid out like the kernel's inotify mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
	pub const MODIFY: EventMask = EventMask(0x0000_0002);
	pub const MOVED_FROM: EventMask = EventMask(0x0000_0040);
	pub const MOVED_TO: EventMask = EventMask(0x0000_0080);
	pub const CREATE: EventMask = EventMask(0x0000_0100);
	pub const DELETE: EventMask = EventMask(0x0000_0200);
	pub const DELETE_SELF: EventMask = EventMask(0x0000_0400);
	pub const Q_OVERFLOW: EventMask = EventMask(0x0000_4000);
	pub const IGNORED: EventMask = EventMask(0x0000_8000);
	pub const IS_DIR: EventMask = EventMask(0x4000_0000);

	/// Kinds requested when registering a watch.
	pub const WATCH: EventMask = EventMask(
		Self::MODIFY.0
			| Self::MOVED_FROM.0
			| Self::MOVED_TO.0
			| Self::CREATE.0
			| Self::DELETE.0
			| Self::DELETE_SELF.0,
	);

	const MODIFICATIONS: EventMask = EventMask(
		Self::MODIFY.0 | Self::MOVED_FROM.0 | Self::MOVED_TO.0 | Self::CREATE.0 | Self::DELETE.0,
	);

	pub const fn empty() -> Self {
		EventMask(0)
	}

	pub const fn from_bits(bits: u32) -> Self {
		EventMask(bits)
	}

	pub const fn bits(self) -> u32 {
		self.0
	}

	pub const fn contains(self, other: EventMask) -> bool {
		self.0 & other.0 == other.0
	}

	pub const fn intersects(self, other: EventMask) -> bool {
		self.0 & other.0 != 0
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	/// Names of the set flags, for debug logging
	pub fn names(self) -> Vec<&'static str> {
		const NAMES: [(EventMask, &str); 9] = [
			(EventMask::MODIFY, "MODIFY"),
			(EventMask::MOVED_FROM, "MOVED_FROM"),
			(EventMask::MOVED_TO, "MOVED_TO"),
			(EventMask::CREATE, "CREATE"),
			(EventMask::DELETE, "DELETE"),
			(EventMask::DELETE_SELF, "DELETE_SELF"),
			(EventMask::Q_OVERFLOW, "Q_OVERFLOW"),
			(EventMask::IGNORED, "IGNORED"),
			(EventMask::IS_DIR, "IS_DIR"),
		];
		NAMES
			.iter()
			.filter(|(flag, _)| self.contains(*flag))
			.map(|(_, name)| *name)
			.collect()
	}
}

impl BitOr for EventMask {
	type Output = EventMask;

	fn bitor(self, rhs: EventMask) -> EventMask {
		EventMask(self.0 | rhs.0)
	}
}

impl BitOrAssign for EventMask {
	fn bitor_assign(&mut self, rhs: EventMask) {
		self.0 |= rhs.0;
	}
}

/// One low-level notification as delivered by a [`NotificationSource`](crate::NotificationSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
	pub handle: WatchHandle,
	pub mask: EventMask,
	/// Entry name inside the watched directory, for events about a child
	pub name: Option<OsString>,
}

impl RawEvent {
	pub fn new(handle: WatchHandle, mask: EventMask) -> Self {
		Self { handle, mask, name: None }
	}

	pub fn with_name(mut self, name: impl Into<OsString>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn overflow() -> Self {
		Self::new(WatchHandle::QUEUE, EventMask::Q_OVERFLOW)
	}

	pub fn classify(&self) -> Classification {
		Classification::from_mask(self.mask)
	}
}

/// Semantic reading of an event mask. Every predicate is computed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
	/// The source invalidated the handle; it must not be relied on afterwards
	pub is_ignored: bool,
	/// The watched path itself was removed
	pub is_self_deleted: bool,
	/// An entry inside the watched directory was removed
	pub is_child_deleted: bool,
	/// Any content or entry change
	pub is_modification: bool,
	/// Events were dropped by the source
	pub is_overflow: bool,
	/// A directory was created or moved into the watched directory
	pub directory_appeared: bool,
}

impl Classification {
	pub fn from_mask(mask: EventMask) -> Self {
		Self {
			is_ignored: mask.contains(EventMask::IGNORED),
			is_self_deleted: mask.contains(EventMask::DELETE_SELF),
			is_child_deleted: mask.contains(EventMask::DELETE),
			is_modification: mask.intersects(EventMask::MODIFICATIONS),
			is_overflow: mask.contains(EventMask::Q_OVERFLOW),
			directory_appeared: mask.contains(EventMask::IS_DIR)
				&& mask.intersects(EventMask::CREATE | EventMask::MOVED_TO),
		}
	}
}
