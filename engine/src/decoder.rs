//! Decoding of packed inotify batches into change records.
//!
//! The kernel packs variable-length records back to back:
//!
//! ```text
//! | wd: i32 | mask: u32 | cookie: u32 | len: u32 | name: [u8; len] (NUL padded) |
//! ```
//!
//! One record may carry several logical kinds in its mask. Those are split
//! into separate [`ChangeRecord`]s, creation class first, then deletion
//! class, then self-invalidation, so a watch is only forgotten after every
//! other change it reported has been applied.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use inotify::EventMask;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::watch_table::WatchHandle;

const HEADER_LEN: usize = std::mem::size_of::<libc::inotify_event>();

/// Logical kind of one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// An entry was created inside the watched directory.
    Created,

    /// An entry was moved into the watched directory.
    MovedTo,

    /// A file inside the watched directory was written.
    Modified,

    /// An entry inside the watched directory was deleted.
    Removed,

    /// An entry was moved out of the watched directory.
    MovedFrom,

    /// The watched directory itself was renamed. Its watch stays live.
    SelfMoved,

    /// The watched directory is gone or its watch was dropped.
    SelfInvalidated,

    /// The kernel queue overflowed and events were lost.
    Overflow,
}

/// Bit-priority order used to split multi-kind records.
const PRIORITY: [(EventMask, ChangeKind); 7] = [
    (EventMask::CREATE, ChangeKind::Created),
    (EventMask::MOVED_TO, ChangeKind::MovedTo),
    (EventMask::MODIFY, ChangeKind::Modified),
    (EventMask::DELETE, ChangeKind::Removed),
    (EventMask::MOVED_FROM, ChangeKind::MovedFrom),
    (EventMask::MOVE_SELF, ChangeKind::SelfMoved),
    (
        EventMask::DELETE_SELF
            .union(EventMask::IGNORED)
            .union(EventMask::UNMOUNT),
        ChangeKind::SelfInvalidated,
    ),
];

/// A decoded change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Watch that reported the change.
    pub handle: WatchHandle,

    /// What happened.
    pub kind: ChangeKind,

    /// Entry inside the watched directory; `None` when the change concerns
    /// the directory itself.
    pub name: Option<OsString>,

    /// Whether the kernel flagged the subject as a directory.
    pub is_dir: bool,
}

/// One kernel record before kind splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    pub name: Option<&'a OsStr>,
}

impl RawEvent<'_> {
    fn record(&self, kind: ChangeKind) -> ChangeRecord {
        ChangeRecord {
            handle: self.handle,
            kind,
            name: self.name.map(OsStr::to_os_string),
            is_dir: self.mask.contains(EventMask::ISDIR),
        }
    }
}

/// Iterator over the packed records of one batch.
#[derive(Debug)]
pub struct RawEvents<'a> {
    batch: &'a [u8],
    offset: usize,
}

impl<'a> RawEvents<'a> {
    pub fn new(batch: &'a [u8]) -> Self {
        Self { batch, offset: 0 }
    }

    fn truncated(&mut self, needed: usize) -> Option<RawEvent<'a>> {
        warn!(
            "Dropping truncated inotify record at offset {} ({} bytes needed, {} left)",
            self.offset,
            needed,
            self.batch.len() - self.offset
        );
        self.offset = self.batch.len();
        None
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let field: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_ne_bytes(field))
}

impl<'a> Iterator for RawEvents<'a> {
    type Item = RawEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.batch.get(self.offset..)?;
        if rest.is_empty() {
            return None;
        }
        if rest.len() < HEADER_LEN {
            return self.truncated(HEADER_LEN);
        }

        let wd = read_u32(rest, 0)? as i32;
        let mask = EventMask::from_bits_truncate(read_u32(rest, 4)?);
        let cookie = read_u32(rest, 8)?;
        let name_len = read_u32(rest, 12)? as usize;

        let Some(name_bytes) = rest.get(HEADER_LEN..HEADER_LEN + name_len) else {
            return self.truncated(HEADER_LEN + name_len);
        };
        self.offset += HEADER_LEN + name_len;

        let name = name_bytes.split(|b| *b == 0).next().unwrap_or_default();
        Some(RawEvent {
            handle: WatchHandle::from_raw(wd),
            mask,
            cookie,
            name: (!name.is_empty()).then(|| OsStr::from_bytes(name)),
        })
    }
}

/// Lazily yields the change records of one batch, in arrival order.
#[derive(Debug)]
pub struct EventDecoder<'a> {
    raw: RawEvents<'a>,
    current: Option<RawEvent<'a>>,
    next_rule: usize,
}

impl<'a> EventDecoder<'a> {
    /// Decode `batch`, as returned by a single read of the stream.
    pub fn new(batch: &'a [u8]) -> Self {
        Self {
            raw: RawEvents::new(batch),
            current: None,
            next_rule: 0,
        }
    }
}

impl Iterator for EventDecoder<'_> {
    type Item = ChangeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.current {
                Some(event) => event,
                None => {
                    let event = self.raw.next()?;
                    self.current = Some(event);
                    self.next_rule = 0;
                    event
                }
            };

            if event.mask.contains(EventMask::Q_OVERFLOW) {
                self.current = None;
                return Some(event.record(ChangeKind::Overflow));
            }

            while let Some((bits, kind)) = PRIORITY.get(self.next_rule) {
                self.next_rule += 1;
                if event.mask.intersects(*bits) {
                    return Some(event.record(*kind));
                }
            }
            self.current = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Pack one record the way the kernel does, padding the name to 16 bytes.
    pub(crate) fn pack(wd: i32, mask: EventMask, name: Option<&str>) -> Vec<u8> {
        let mut name_bytes = name.map(|n| n.as_bytes().to_vec()).unwrap_or_default();
        if !name_bytes.is_empty() {
            name_bytes.push(0);
            while name_bytes.len() % 16 != 0 {
                name_bytes.push(0);
            }
        }
        let mut out = Vec::new();
        out.extend_from_slice(&wd.to_ne_bytes());
        out.extend_from_slice(&mask.bits().to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&(name_bytes.len() as u32).to_ne_bytes());
        out.extend_from_slice(&name_bytes);
        out
    }

    fn kinds(batch: &[u8]) -> Vec<(i32, ChangeKind, Option<String>)> {
        EventDecoder::new(batch)
            .map(|r| {
                (
                    r.handle.as_raw(),
                    r.kind,
                    r.name.map(|n| n.to_string_lossy().into_owned()),
                )
            })
            .collect()
    }

    #[test]
    fn test_splits_packed_records() {
        let mut batch = pack(1, EventMask::CREATE, Some("a.txt"));
        batch.extend(pack(2, EventMask::MODIFY, Some("a-much-longer-file-name.bin")));
        batch.extend(pack(1, EventMask::DELETE, Some("b")));

        assert_eq!(
            kinds(&batch),
            vec![
                (1, ChangeKind::Created, Some("a.txt".to_string())),
                (2, ChangeKind::Modified, Some("a-much-longer-file-name.bin".to_string())),
                (1, ChangeKind::Removed, Some("b".to_string())),
            ]
        );
    }

    #[test]
    fn test_multi_kind_record_in_priority_order() {
        let mask = EventMask::IGNORED | EventMask::DELETE | EventMask::CREATE | EventMask::MODIFY;
        let batch = pack(4, mask, Some("x"));

        let order: Vec<ChangeKind> = EventDecoder::new(&batch).map(|r| r.kind).collect();
        assert_eq!(
            order,
            vec![
                ChangeKind::Created,
                ChangeKind::Modified,
                ChangeKind::Removed,
                ChangeKind::SelfInvalidated,
            ]
        );
    }

    #[test]
    fn test_self_events_have_no_name() {
        let mut batch = pack(7, EventMask::MOVE_SELF, None);
        batch.extend(pack(7, EventMask::DELETE_SELF, None));
        batch.extend(pack(7, EventMask::IGNORED, None));

        assert_eq!(
            kinds(&batch),
            vec![
                (7, ChangeKind::SelfMoved, None),
                (7, ChangeKind::SelfInvalidated, None),
                (7, ChangeKind::SelfInvalidated, None),
            ]
        );
    }

    #[test]
    fn test_directory_flag_and_overflow() {
        let mut batch = pack(1, EventMask::CREATE | EventMask::ISDIR, Some("sub"));
        batch.extend(pack(-1, EventMask::Q_OVERFLOW, None));

        let records: Vec<ChangeRecord> = EventDecoder::new(&batch).collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_dir);
        assert_eq!(records[1].kind, ChangeKind::Overflow);
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let mut batch = pack(1, EventMask::CREATE, Some("whole"));
        let partial = pack(1, EventMask::CREATE, Some("cut"));
        batch.extend_from_slice(&partial[..partial.len() - 4]);

        assert_eq!(
            kinds(&batch),
            vec![(1, ChangeKind::Created, Some("whole".to_string()))]
        );
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(EventDecoder::new(&[]).count(), 0);
    }
}
