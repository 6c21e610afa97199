//! Commit log and checkpoint persistence.
//!
//! Durability uses two files:
//!
//! - `LOG`: an append-only sequence of framed, checksummed commit records.
//!   Each committed write transaction appends exactly one frame holding the
//!   logical operations it performed.
//! - `DATA`: a full checkpoint snapshot of the committed state, written via
//!   write-to-temp + atomic rename. Writing a checkpoint truncates the log.
//!
//! Opening an environment loads `DATA` (if present) and replays `LOG` over
//! it. A torn frame at the log tail is discarded with a warning; everything
//! before it is intact because frames carry a CRC32.

use crate::catalog::{CommittedState, Dbi, TreeInfo};
use crate::error::{EngineError, EngineResult};
use crate::flags::PutFlags;
use crate::sort::SortOrder;
use crate::tree::{DupOptions, Slot, Tree, TreeOptions};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes identifying a commit-log frame.
const LOG_MAGIC: [u8; 4] = *b"BLOG";
/// Current log format version.
const LOG_VERSION: u16 = 1;
/// Magic bytes identifying a checkpoint file.
const DATA_MAGIC: [u8; 4] = *b"BDAT";
/// Current checkpoint format version.
const DATA_VERSION: u16 = 1;

/// Frame header: magic (4) + version (2) + payload length (4).
const FRAME_HEADER: usize = 10;
/// Trailing CRC32 size.
const CRC_SIZE: usize = 4;

/// A logical operation recorded by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogOp {
    /// A tree was created.
    OpenTree {
        dbi: u32,
        name: String,
        options: TreeOptions,
    },
    /// A value was stored (upsert for single-valued trees, duplicate
    /// insert for duplicate-keyed trees).
    PutPair {
        dbi: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// All values at the key were replaced by one value.
    ReplaceAll {
        dbi: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// The key and all its values were removed.
    DelKey { dbi: u32, key: Vec<u8> },
    /// One exact pair was removed.
    DelPair {
        dbi: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// The tree was emptied (`delete == false`) or dropped entirely.
    DropTree { dbi: u32, delete: bool },
    /// The tree's sequence counter advanced.
    SequenceAdd { dbi: u32, amount: u64 },
}

impl LogOp {
    const OPEN_TREE: u8 = 1;
    const PUT_PAIR: u8 = 2;
    const REPLACE_ALL: u8 = 3;
    const DEL_KEY: u8 = 4;
    const DEL_PAIR: u8 = 5;
    const DROP_TREE: u8 = 6;
    const SEQUENCE_ADD: u8 = 7;

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            LogOp::OpenTree { dbi, name, options } => {
                out.push(Self::OPEN_TREE);
                out.extend_from_slice(&dbi.to_le_bytes());
                put_str(out, name);
                put_tree_options(out, *options);
            }
            LogOp::PutPair { dbi, key, value } => {
                out.push(Self::PUT_PAIR);
                out.extend_from_slice(&dbi.to_le_bytes());
                put_bytes(out, key);
                put_bytes(out, value);
            }
            LogOp::ReplaceAll { dbi, key, value } => {
                out.push(Self::REPLACE_ALL);
                out.extend_from_slice(&dbi.to_le_bytes());
                put_bytes(out, key);
                put_bytes(out, value);
            }
            LogOp::DelKey { dbi, key } => {
                out.push(Self::DEL_KEY);
                out.extend_from_slice(&dbi.to_le_bytes());
                put_bytes(out, key);
            }
            LogOp::DelPair { dbi, key, value } => {
                out.push(Self::DEL_PAIR);
                out.extend_from_slice(&dbi.to_le_bytes());
                put_bytes(out, key);
                put_bytes(out, value);
            }
            LogOp::DropTree { dbi, delete } => {
                out.push(Self::DROP_TREE);
                out.extend_from_slice(&dbi.to_le_bytes());
                out.push(u8::from(*delete));
            }
            LogOp::SequenceAdd { dbi, amount } => {
                out.push(Self::SEQUENCE_ADD);
                out.extend_from_slice(&dbi.to_le_bytes());
                out.extend_from_slice(&amount.to_le_bytes());
            }
        }
    }

    fn decode(reader: &mut SliceReader<'_>) -> EngineResult<Self> {
        let tag = reader.u8()?;
        let dbi = reader.u32()?;
        match tag {
            Self::OPEN_TREE => Ok(LogOp::OpenTree {
                dbi,
                name: reader.string()?,
                options: reader.tree_options()?,
            }),
            Self::PUT_PAIR => Ok(LogOp::PutPair {
                dbi,
                key: reader.bytes()?,
                value: reader.bytes()?,
            }),
            Self::REPLACE_ALL => Ok(LogOp::ReplaceAll {
                dbi,
                key: reader.bytes()?,
                value: reader.bytes()?,
            }),
            Self::DEL_KEY => Ok(LogOp::DelKey {
                dbi,
                key: reader.bytes()?,
            }),
            Self::DEL_PAIR => Ok(LogOp::DelPair {
                dbi,
                key: reader.bytes()?,
                value: reader.bytes()?,
            }),
            Self::DROP_TREE => Ok(LogOp::DropTree {
                dbi,
                delete: reader.u8()? != 0,
            }),
            Self::SEQUENCE_ADD => Ok(LogOp::SequenceAdd {
                dbi,
                amount: reader.u64()?,
            }),
            other => Err(EngineError::corrupted(format!(
                "unknown log op tag: {other}"
            ))),
        }
    }

    /// Applies this operation to recovered state.
    fn apply(&self, state: &mut CommittedState) -> EngineResult<()> {
        match self {
            LogOp::OpenTree { dbi, name, options } => {
                state.catalog.insert(name.clone(), Dbi(*dbi));
                state.infos.insert(
                    *dbi,
                    TreeInfo {
                        name: name.clone(),
                        options: *options,
                        sequence: 0,
                    },
                );
                state.trees.insert(*dbi, Arc::new(Tree::new(*options)));
                state.next_dbi = state.next_dbi.max(dbi + 1);
                Ok(())
            }
            LogOp::PutPair { dbi, key, value } => {
                let tree = recovered_tree(state, *dbi)?;
                tree.put(key, value, PutFlags::upsert())?;
                Ok(())
            }
            LogOp::ReplaceAll { dbi, key, value } => {
                let tree = recovered_tree(state, *dbi)?;
                let flags = if tree.options().allows_duplicates() {
                    PutFlags::upsert().all_dups(true)
                } else {
                    PutFlags::upsert()
                };
                tree.put(key, value, flags)?;
                Ok(())
            }
            LogOp::DelKey { dbi, key } => {
                let tree = recovered_tree(state, *dbi)?;
                tree.del_key(key)?;
                Ok(())
            }
            LogOp::DelPair { dbi, key, value } => {
                let tree = recovered_tree(state, *dbi)?;
                tree.del_pair(key, value)?;
                Ok(())
            }
            LogOp::DropTree { dbi, delete } => {
                if *delete {
                    if let Some(info) = state.infos.remove(dbi) {
                        state.catalog.remove(&info.name);
                    }
                    state.trees.remove(dbi);
                } else {
                    recovered_tree(state, *dbi)?.clear();
                }
                Ok(())
            }
            LogOp::SequenceAdd { dbi, amount } => {
                let info = state
                    .infos
                    .get_mut(dbi)
                    .ok_or_else(|| EngineError::corrupted("sequence op on unknown tree"))?;
                info.sequence += amount;
                Ok(())
            }
        }
    }
}

fn recovered_tree(state: &mut CommittedState, dbi: u32) -> EngineResult<&mut Tree> {
    let arc = state
        .trees
        .get_mut(&dbi)
        .ok_or_else(|| EngineError::corrupted("log op on unknown tree"))?;
    Ok(Arc::make_mut(arc))
}

// ---------------------------------------------------------------------------
// Commit log file
// ---------------------------------------------------------------------------

/// Append-only commit log.
#[derive(Debug)]
pub(crate) struct LogFile {
    file: File,
}

impl LogFile {
    /// Opens (creating if needed) the log for appending.
    pub(crate) fn open(path: &Path) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Appends one commit frame.
    pub(crate) fn append_commit(&mut self, ops: &[LogOp], sync: bool) -> EngineResult<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&u32::try_from(ops.len()).map_err(|_| {
            EngineError::invalid_argument("too many operations in one commit")
        })?.to_le_bytes());
        for op in ops {
            op.encode_into(&mut payload);
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        let len = u32::try_from(payload.len())
            .map_err(|_| EngineError::invalid_argument("commit frame too large"))?;
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        self.file.write_all(&frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Current log size in bytes.
    pub(crate) fn size(&self) -> EngineResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Discards all frames (after a checkpoint made them redundant).
    pub(crate) fn truncate(&mut self) -> EngineResult<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Fsyncs appended frames.
    pub(crate) fn sync(&mut self) -> EngineResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Replays the commit log at `path` over `state`.
///
/// Returns the number of frames applied. A torn or corrupt tail is
/// discarded with a warning; frames before it are applied normally.
pub(crate) fn replay_log(path: &Path, state: &mut CommittedState) -> EngineResult<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut applied = 0usize;
    let mut pos = 0usize;
    while pos < data.len() {
        let Some(frame_len) = frame_length(&data[pos..]) else {
            warn!(
                offset = pos,
                trailing = data.len() - pos,
                "discarding torn commit-log tail"
            );
            break;
        };
        let frame = &data[pos..pos + frame_len];
        let body = &frame[..frame_len - CRC_SIZE];
        let stored_crc = u32::from_le_bytes([
            frame[frame_len - 4],
            frame[frame_len - 3],
            frame[frame_len - 2],
            frame[frame_len - 1],
        ]);
        if crc32fast::hash(body) != stored_crc {
            warn!(offset = pos, "discarding commit-log tail with bad checksum");
            break;
        }

        let mut reader = SliceReader::new(&body[FRAME_HEADER..]);
        let op_count = reader.u32()?;
        for _ in 0..op_count {
            LogOp::decode(&mut reader)?.apply(state)?;
        }
        applied += 1;
        pos += frame_len;
    }
    debug!(frames = applied, "commit log replayed");
    Ok(applied)
}

/// Returns the total length of the frame at the start of `data`, or `None`
/// if the bytes cannot hold a complete frame.
fn frame_length(data: &[u8]) -> Option<usize> {
    if data.len() < FRAME_HEADER + CRC_SIZE {
        return None;
    }
    if data[..4] != LOG_MAGIC {
        return None;
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != LOG_VERSION {
        return None;
    }
    let payload_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let total = FRAME_HEADER + payload_len + CRC_SIZE;
    (data.len() >= total).then_some(total)
}

// ---------------------------------------------------------------------------
// Checkpoint file
// ---------------------------------------------------------------------------

/// Writes a full checkpoint of `state` to `path` atomically.
///
/// Uses write-to-temp + rename, then fsyncs the containing directory so the
/// rename is durable.
pub(crate) fn write_checkpoint(path: &Path, state: &CommittedState) -> EngineResult<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&state.next_dbi.to_le_bytes());
    body.extend_from_slice(&u32::try_from(state.catalog.len()).map_err(|_| {
        EngineError::invalid_argument("too many trees to checkpoint")
    })?.to_le_bytes());

    for (name, dbi) in &state.catalog {
        let info = state
            .info(*dbi)
            .ok_or_else(|| EngineError::corrupted("catalog entry without info"))?;
        let tree = state
            .tree(*dbi)
            .ok_or_else(|| EngineError::corrupted("catalog entry without tree"))?;

        body.extend_from_slice(&dbi.as_u32().to_le_bytes());
        put_str(&mut body, name);
        put_tree_options(&mut body, info.options);
        body.extend_from_slice(&info.sequence.to_le_bytes());
        match tree.fixed_size() {
            Some(size) => {
                body.push(1);
                body.extend_from_slice(&(size as u32).to_le_bytes());
            }
            None => {
                body.push(0);
                body.extend_from_slice(&0u32.to_le_bytes());
            }
        }

        body.extend_from_slice(&(tree.key_count() as u64).to_le_bytes());
        for (key, slot) in tree.entries() {
            put_bytes(&mut body, &key.bytes);
            body.extend_from_slice(&(slot.len() as u32).to_le_bytes());
            for i in 0..slot.len() {
                if let Some(value) = slot.value_at(i) {
                    put_bytes(&mut body, value);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(6 + body.len() + CRC_SIZE);
    out.extend_from_slice(&DATA_MAGIC);
    out.extend_from_slice(&DATA_VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());

    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&out)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    sync_parent_dir(path)?;
    debug!(path = %path.display(), bytes = out.len(), "checkpoint written");
    Ok(())
}

/// Loads a checkpoint, or `None` if the file does not exist.
pub(crate) fn read_checkpoint(path: &Path) -> EngineResult<Option<CommittedState>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < 6 + CRC_SIZE || data[..4] != DATA_MAGIC {
        return Err(EngineError::corrupted("checkpoint header invalid"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != DATA_VERSION {
        return Err(EngineError::corrupted(format!(
            "unsupported checkpoint version {version}"
        )));
    }
    let body_end = data.len() - CRC_SIZE;
    let stored_crc = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    if crc32fast::hash(&data[..body_end]) != stored_crc {
        return Err(EngineError::corrupted("checkpoint checksum mismatch"));
    }

    let mut reader = SliceReader::new(&data[6..body_end]);
    let mut state = CommittedState {
        next_dbi: reader.u32()?,
        ..CommittedState::default()
    };
    let tree_count = reader.u32()?;
    for _ in 0..tree_count {
        let dbi = reader.u32()?;
        let name = reader.string()?;
        let options = reader.tree_options()?;
        let sequence = reader.u64()?;
        let fixed_present = reader.u8()? != 0;
        let fixed = reader.u32()? as usize;

        let mut tree = Tree::new(options);
        let key_count = reader.u64()?;
        for _ in 0..key_count {
            let key = reader.bytes()?;
            let value_count = reader.u32()?;
            for _ in 0..value_count {
                let value = reader.bytes()?;
                tree.put(&key, &value, PutFlags::upsert())?;
            }
        }
        // Restore the learned fixed width even if the tree is now empty.
        if fixed_present {
            tree.set_fixed_size(Some(fixed));
        }

        state.catalog.insert(name.clone(), Dbi(dbi));
        state.infos.insert(
            dbi,
            TreeInfo {
                name,
                options,
                sequence,
            },
        );
        state.trees.insert(dbi, Arc::new(tree));
    }
    Ok(Some(state))
}

fn sync_parent_dir(path: &Path) -> EngineResult<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if parent.as_os_str().is_empty() {
                return Ok(());
            }
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_tree_options(out: &mut Vec<u8>, options: TreeOptions) {
    out.push(options.key_order.as_byte());
    match options.duplicates {
        None => {
            out.push(0);
            out.push(0);
            out.push(0);
        }
        Some(DupOptions { order, fixed }) => {
            out.push(1);
            out.push(order.as_byte());
            out.push(u8::from(fixed));
        }
    }
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(EngineError::corrupted("record truncated"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> EngineResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> EngineResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn bytes(&mut self) -> EngineResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> EngineResult<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| EngineError::corrupted("invalid UTF-8 in tree name"))
    }

    fn tree_options(&mut self) -> EngineResult<TreeOptions> {
        let key_order = SortOrder::from_byte(self.u8()?)?;
        let has_dup = self.u8()? != 0;
        let dup_order = self.u8()?;
        let fixed = self.u8()? != 0;
        let mut options = TreeOptions::new(key_order);
        if has_dup {
            options = options.with_duplicates(SortOrder::from_byte(dup_order)?, fixed);
        }
        Ok(options)
    }
}
