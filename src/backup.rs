//! Backup and Recovery Protocol (spec.md §4.6): a write-ahead backup layout
//! with status-field fencing that survives crashes at any instant, and
//! supports per-operation undo and full post-crash recovery.
//!
//! The on-disk layout is (de)serialized through an explicit byte-oriented
//! codec rather than a `#[repr(packed)]` struct read directly off disk
//! (spec.md §9 DESIGN NOTES): every multi-byte integer is little-endian,
//! documented here rather than left to host alignment/endianness.

use crate::error::HexpeekError;
use crate::fileservice::{file_copy, FileHandle};
use crate::offset::{ceil_bound, Offset, PAGE_SIZE};

pub const MAX_BACKUP_DEPTH: usize = 32;
pub const ADJ_SLOT: usize = MAX_BACKUP_DEPTH;
const OP_COUNT: usize = MAX_BACKUP_DEPTH + 1;

const HDR_MAGIC_SZ: usize = 16;
const HDR_MAGIC: &[u8; HDR_MAGIC_SZ] = b"hexpeek bk v0\0\0\0";

const OPINFO_MAGIC_SZ: usize = 15;
const OP_SIZE: usize = 256;
const OP_ORIGCMD_SIZE: usize = OP_SIZE - (OPINFO_MAGIC_SZ + 1 + 8 * 6);
const OP_CMD_TRUNCATED: u8 = b'~';

/// Total on-disk size of the header + all op slots; the payload region
/// begins immediately after, page-aligned (spec.md §3).
pub const HEADER_SIZE: usize = 0x4000;
pub const PAYLOAD_START: Offset = HEADER_SIZE as Offset;

pub const STATUS_EMPTY: u8 = 0;
pub const STATUS_BACKUP_START: u8 = 0xB0;
pub const STATUS_BACKUP_DONE: u8 = 0xBD;
pub const STATUS_RECOVERY_DONE: u8 = 0xDD;

fn opinfo_magic() -> [u8; OPINFO_MAGIC_SZ] {
    let mut m = [0xFFu8; OPINFO_MAGIC_SZ];
    m[12] = 0;
    m[13] = 0;
    m[14] = 0;
    m
}

/// Offset within the backup file of op slot `idx`'s record.
fn op_offset(idx: usize) -> Offset {
    ((1 + idx) * OP_SIZE) as Offset
}

/// Kind of write-class command a backup record protects, matching
/// `ppc->cmd` in `makeBackup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Replace,
    Insert,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOp {
    pub status: u8,
    pub size_orig: Offset,
    pub size_adj: Offset,
    pub last_at: Offset,
    pub saved_from: Offset,
    pub saved_at: Offset,
    pub saved_len: Offset,
    pub origcmd: String,
}

impl Default for BackupOp {
    fn default() -> Self {
        BackupOp {
            status: STATUS_EMPTY,
            size_orig: 0,
            size_adj: 0,
            last_at: 0,
            saved_from: 0,
            saved_at: 0,
            saved_len: 0,
            origcmd: String::new(),
        }
    }
}

impl BackupOp {
    fn to_bytes(&self) -> [u8; OP_SIZE] {
        let mut buf = [0u8; OP_SIZE];
        buf[..OPINFO_MAGIC_SZ].copy_from_slice(&opinfo_magic());
        buf[OPINFO_MAGIC_SZ] = self.status;
        let mut off = OPINFO_MAGIC_SZ + 1;
        for v in [
            self.size_orig,
            self.size_adj,
            self.last_at,
            self.saved_from,
            self.saved_at,
            self.saved_len,
        ] {
            buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
            off += 8;
        }
        let cmd_bytes = self.origcmd.as_bytes();
        let truncated = cmd_bytes.len() > OP_ORIGCMD_SIZE - 1;
        let copy_len = std::cmp::min(cmd_bytes.len(), OP_ORIGCMD_SIZE - 1);
        buf[off..off + copy_len].copy_from_slice(&cmd_bytes[..copy_len]);
        if truncated {
            buf[off + OP_ORIGCMD_SIZE - 2] = OP_CMD_TRUNCATED;
        }
        buf
    }

    fn from_bytes(buf: &[u8; OP_SIZE]) -> Result<Self, HexpeekError> {
        if buf[..OPINFO_MAGIC_SZ] != opinfo_magic()[..] {
            if buf[OPINFO_MAGIC_SZ] == STATUS_EMPTY && buf.iter().all(|&b| b == 0) {
                return Ok(BackupOp::default());
            }
            return Err(HexpeekError::state("backup op magic mismatch"));
        }
        let status = buf[OPINFO_MAGIC_SZ];
        let mut off = OPINFO_MAGIC_SZ + 1;
        let mut read_i64 = || {
            let v = i64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
            off += 8;
            v
        };
        let size_orig = read_i64();
        let size_adj = read_i64();
        let last_at = read_i64();
        let saved_from = read_i64();
        let saved_at = read_i64();
        let saved_len = read_i64();
        let cmd_slice = &buf[off..off + OP_ORIGCMD_SIZE];
        let nul = cmd_slice.iter().position(|&b| b == 0).unwrap_or(cmd_slice.len());
        let origcmd = String::from_utf8_lossy(&cmd_slice[..nul]).into_owned();
        Ok(BackupOp {
            status,
            size_orig,
            size_adj,
            last_at,
            saved_from,
            saved_at,
            saved_len,
            origcmd,
        })
    }

    fn validate(&self, prev: Option<&BackupOp>) -> Result<(), HexpeekError> {
        if self.status == STATUS_EMPTY {
            return Ok(());
        }
        if self.size_orig < 0 {
            return Err(HexpeekError::state("backup op size_orig negative"));
        }
        if self.saved_from < 0 {
            return Err(HexpeekError::state("backup op saved_from negative"));
        }
        if self.saved_at < HEADER_SIZE as Offset {
            return Err(HexpeekError::state("backup op saved_at before payload region"));
        }
        if self.saved_len < 0 {
            return Err(HexpeekError::state("backup op saved_len negative"));
        }
        if let Some(p) = prev {
            if self.saved_len > 0 && p.status != STATUS_EMPTY && self.saved_at < p.saved_at + p.saved_len {
                return Err(HexpeekError::state("backup op payload regions overlap"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BackupHeader {
    pub firstop: u64,
    pub ops: Vec<BackupOp>,
}

impl BackupHeader {
    pub fn new(firstop: u64) -> Self {
        BackupHeader {
            firstop,
            ops: (0..OP_COUNT).map(|_| BackupOp::default()).collect(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..HDR_MAGIC_SZ].copy_from_slice(HDR_MAGIC);
        buf[HDR_MAGIC_SZ..HDR_MAGIC_SZ + 8].copy_from_slice(&self.firstop.to_le_bytes());
        for (i, op) in self.ops.iter().enumerate() {
            let off = op_offset(i) as usize;
            buf[off..off + OP_SIZE].copy_from_slice(&op.to_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, HexpeekError> {
        if buf.len() < HEADER_SIZE {
            return Err(HexpeekError::state("backup header truncated"));
        }
        if buf[..HDR_MAGIC_SZ] != HDR_MAGIC[..] {
            return Err(HexpeekError::state("backup header magic mismatch"));
        }
        let firstop = u64::from_le_bytes(buf[HDR_MAGIC_SZ..HDR_MAGIC_SZ + 8].try_into().unwrap());
        let mut ops = Vec::with_capacity(OP_COUNT);
        for i in 0..OP_COUNT {
            let off = op_offset(i) as usize;
            let chunk: [u8; OP_SIZE] = buf[off..off + OP_SIZE].try_into().unwrap();
            ops.push(BackupOp::from_bytes(&chunk)?);
        }
        let header = BackupHeader { firstop, ops };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), HexpeekError> {
        let most_recent = self.most_recent_op();
        if self.ops[ADJ_SLOT].status != STATUS_EMPTY {
            self.ops[ADJ_SLOT].validate(most_recent.map(|i| &self.ops[i]))?;
        }
        let mut prev: Option<usize> = None;
        if let Some(max) = most_recent {
            for ix in (0..=max).rev() {
                self.ops[ix].validate(prev.map(|p| &self.ops[p]))?;
                prev = Some(ix);
            }
        }
        Ok(())
    }

    /// Highest-indexed normal (non-ADJ) op slot that is not empty, mirroring
    /// `mostRecentOp`.
    pub fn most_recent_op(&self) -> Option<usize> {
        (0..MAX_BACKUP_DEPTH).rev().find(|&i| self.ops[i].status != STATUS_EMPTY)
    }

    fn next_payload_offset(&self) -> Offset {
        match self.most_recent_op() {
            None => ceil_bound(HEADER_SIZE as Offset, PAGE_SIZE),
            Some(max) => ceil_bound(self.ops[max].saved_at + self.ops[max].saved_len, PAGE_SIZE),
        }
    }
}

/// Read and validate a backup file's header.
fn read_header(backup: &FileHandle) -> Result<BackupHeader, HexpeekError> {
    let mut buf = vec![0u8; HEADER_SIZE];
    backup.read_at(0, &mut buf)?;
    BackupHeader::from_bytes(&buf)
}

/// Read the header and ensure no ADJ record is in flight (a precondition
/// for `make_backup`), returning the header and next free payload offset.
fn get_header(backup: &FileHandle) -> Result<(BackupHeader, Offset), HexpeekError> {
    let header = read_header(backup)?;
    if header.ops[ADJ_SLOT].status != STATUS_EMPTY {
        return Err(HexpeekError::state(
            "cannot make backup with incomplete file adjustment",
        ));
    }
    let next_at = header.next_payload_offset();
    Ok((header, next_at))
}

fn write_op_header(backup: &FileHandle, idx: usize, op: &BackupOp) -> Result<(), HexpeekError> {
    backup.write_at(op_offset(idx), &op.to_bytes())
}

fn write_status(backup: &FileHandle, idx: usize, status: u8) -> Result<(), HexpeekError> {
    let status_off = op_offset(idx) + OPINFO_MAGIC_SZ as Offset;
    backup.write_at(status_off, &[status])
}

fn sync_if(backup: &FileHandle, backup_sync: bool) -> Result<(), HexpeekError> {
    if backup_sync {
        backup.sync()?;
    }
    Ok(())
}

/// Write-ahead an op record: the header record with `BACKUP_START`, its
/// payload, an fsync, then the `BACKUP_DONE` status byte, then another
/// fsync (spec.md §4.6 steps 1-5).
fn write_op(
    data: &FileHandle,
    backup: &FileHandle,
    idx: usize,
    op: &mut BackupOp,
    backup_sync: bool,
) -> Result<(), HexpeekError> {
    write_op_header(backup, idx, op)?;
    file_copy(data, op.saved_from, op.saved_len, backup, op.saved_at, op.saved_len, None)?;
    sync_if(backup, backup_sync)?;
    op.status = STATUS_BACKUP_DONE;
    write_status(backup, idx, STATUS_BACKUP_DONE)?;
    sync_if(backup, backup_sync)?;
    Ok(())
}

/// `active_file(k) = (k div depth) mod 2`; `k` is the infile's current
/// operation counter (spec.md §8 property 3).
pub fn active_backup_index(opcnt: u64, depth: u32) -> usize {
    ((opcnt / depth as u64) % 2) as usize
}

/// Write the backup record for a replace/insert/kill command (spec.md
/// §4.6, `makeBackup`). `saved_from`/`len` come from the command's target
/// filezone *before* the mutation has been applied; `prior_at` is the
/// infile's current offset before the command ran (`last_at`).
pub fn make_backup(
    data: &FileHandle,
    backup: &FileHandle,
    opcnt: u64,
    depth: u32,
    kind: OpKind,
    saved_from: Offset,
    len: Offset,
    prior_at: Offset,
    origcmd: &str,
    backup_sync: bool,
) -> Result<(), HexpeekError> {
    if depth == 0 {
        return Ok(());
    }
    if opcnt == u64::MAX {
        return Err(HexpeekError::state(
            "64 bit operation counter would overflow, aborting",
        ));
    }

    let opix = (opcnt % depth as u64) as usize;
    let (mut header, sv_at) = if opix == 0 {
        let header = BackupHeader::new(opcnt);
        backup.truncate(0)?;
        backup.write_at(0, &header.to_bytes())?;
        (header, ceil_bound(HEADER_SIZE as Offset, PAGE_SIZE))
    } else {
        let (header, sv_at) = get_header(backup)?;
        let existing = &header.ops[opix];
        if existing.status != STATUS_EMPTY && existing.status != STATUS_RECOVERY_DONE {
            return Err(HexpeekError::state(
                "backup header is malformed: unexpected operation present",
            ));
        }
        (header, sv_at)
    };

    let size_orig = data.size()?;
    let (size_adj, mut saved_len) = match kind {
        OpKind::Replace => (0, len),
        OpKind::Insert => (len, 0),
        OpKind::Kill => (-len, len),
    };
    if saved_from + saved_len > size_orig {
        saved_len = std::cmp::max(0, size_orig - saved_from);
    }

    let mut op = BackupOp {
        status: STATUS_BACKUP_START,
        size_orig,
        size_adj,
        last_at: prior_at,
        saved_from,
        saved_at: sv_at,
        saved_len,
        origcmd: origcmd.to_string(),
    };

    write_op(data, backup, opix, &mut op, backup_sync)?;
    header.ops[opix] = op;
    Ok(())
}

/// Write the ADJ-slot backup record that fences an in-progress size
/// adjustment (`makeAdjBackup`).
pub fn make_adj_backup(
    data: &FileHandle,
    backup: &FileHandle,
    sv_from: Offset,
    backup_sync: bool,
) -> Result<(), HexpeekError> {
    let (_, sv_at) = get_header_allow_adj(backup)?;
    let size = data.size()?;
    let mut op = BackupOp {
        status: STATUS_BACKUP_START,
        saved_from: sv_from,
        saved_at: sv_at,
        saved_len: std::cmp::max(0, size - sv_from),
        ..Default::default()
    };
    write_op(data, backup, ADJ_SLOT, &mut op, backup_sync)
}

/// Like [`get_header`] but callable while the ADJ slot is occupied (used
/// only by `make_adj_backup` itself, which is what fills that slot).
fn get_header_allow_adj(backup: &FileHandle) -> Result<(BackupHeader, Offset), HexpeekError> {
    let header = read_header(backup)?;
    let next_at = header.next_payload_offset();
    Ok((header, next_at))
}

/// Clear the ADJ slot once a size adjustment has completed, truncating the
/// backup file's payload region back to the slot's saved offset
/// (`clearAdjBackup`).
pub fn clear_adj_backup(backup: &FileHandle, backup_sync: bool) -> Result<(), HexpeekError> {
    let header = read_header_ignoring_adj(backup)?;
    let adj = &header.ops[ADJ_SLOT];
    let sv_at = if adj.status != STATUS_EMPTY && adj.saved_len > 0 {
        Some(adj.saved_at)
    } else {
        None
    };
    write_op_header(backup, ADJ_SLOT, &BackupOp::default())?;
    if let Some(at) = sv_at {
        backup.truncate(at)?;
    }
    sync_if(backup, backup_sync)
}

fn read_header_ignoring_adj(backup: &FileHandle) -> Result<BackupHeader, HexpeekError> {
    read_header(backup)
}

/// Statistics accumulated while recovering one backup file (`RecoveryCounts`).
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryCounts {
    pub total: u32,
    pub prev: u32,
    pub reverted: u32,
    pub noncompl: u32,
    pub failed: u32,
}

/// Outcome of a single recovered op, giving the caller enough to roll the
/// infile's `at`/`opcnt` back (`recoverOp` side effects).
pub struct RecoveredState {
    pub last_at: Offset,
}

/// Recover (or report) a single normal op slot. `ask` is called only when
/// prompting is requested; returning `false` aborts recovery at that point
/// (mirrors `consoleAsk` + `RC_DONE`).
#[allow(clippy::too_many_arguments)]
pub fn recover_op(
    data: &FileHandle,
    backup: &FileHandle,
    header: &mut BackupHeader,
    opix: usize,
    ask: Option<&mut dyn FnMut(&BackupOp) -> bool>,
    counts: &mut RecoveryCounts,
    backup_sync: bool,
) -> Result<Option<RecoveredState>, HexpeekError> {
    let op = header.ops[opix].clone();
    match op.status {
        STATUS_BACKUP_START => {
            counts.noncompl += 1;
            Ok(None)
        }
        STATUS_BACKUP_DONE => {
            if op.size_adj < 0 && op.saved_len == 0 {
                return Err(HexpeekError::state("backup record has no data"));
            }
            if let Some(ask) = ask {
                if !ask(&op) {
                    return Ok(None);
                }
            }

            let f_sz = data.size()?;
            let post_sz = op.size_orig + op.size_adj;
            if f_sz == op.size_orig {
                // Nothing to do.
            } else if f_sz == post_sz {
                reverse_adjust_size(data, backup, op.saved_from, -op.size_adj, backup_sync)?;
            } else if op.size_adj >= 0
                && op.saved_from + op.saved_len >= op.size_orig
                && f_sz > op.size_orig
            {
                data.truncate(op.size_orig)?;
            } else {
                return Err(HexpeekError::state("data file size is wrong"));
            }

            file_copy(backup, op.saved_at, op.saved_len, data, op.saved_from, op.saved_len, None)?;
            header.ops[opix].status = STATUS_RECOVERY_DONE;
            write_status(backup, opix, STATUS_RECOVERY_DONE)?;
            sync_if(backup, backup_sync)?;

            counts.reverted += 1;
            Ok(Some(RecoveredState { last_at: op.last_at }))
        }
        STATUS_RECOVERY_DONE => {
            counts.prev += 1;
            Ok(None)
        }
        _ => Err(HexpeekError::state("backup record has unknown status")),
    }
}

/// Recover the ADJ slot if present (`recoverAdjOp`).
pub fn recover_adj_op(
    data: &FileHandle,
    backup: &FileHandle,
    header: &mut BackupHeader,
    ask: Option<&mut dyn FnMut() -> bool>,
    counts: &mut RecoveryCounts,
    backup_sync: bool,
) -> Result<bool, HexpeekError> {
    let adj = header.ops[ADJ_SLOT].clone();
    if adj.status == STATUS_EMPTY {
        return Ok(true);
    }
    counts.total += 1;
    match adj.status {
        STATUS_BACKUP_START => {
            counts.noncompl += 1;
            Ok(true)
        }
        STATUS_BACKUP_DONE => {
            if let Some(ask) = ask {
                if !ask() {
                    return Ok(false);
                }
            }
            data.truncate(adj.saved_from + adj.saved_len)?;
            file_copy(backup, adj.saved_at, adj.saved_len, data, adj.saved_from, adj.saved_len, None)?;
            sync_if(backup, backup_sync)?;
            clear_adj_backup(backup, backup_sync)?;
            header.ops[ADJ_SLOT] = BackupOp::default();
            counts.reverted += 1;
            Ok(true)
        }
        STATUS_RECOVERY_DONE => {
            counts.prev += 1;
            Ok(true)
        }
        _ => Err(HexpeekError::state(
            "backup record for file size adjustment has unknown status",
        )),
    }
}

/// Reverse a completed size adjustment: shift the tail back by `-amt` and
/// truncate/extend accordingly. Equivalent to calling `adjust_size` with the
/// negated amount, without re-fencing via a fresh ADJ record (recovery is
/// already fenced by the op being recovered).
fn reverse_adjust_size(
    data: &FileHandle,
    _backup: &FileHandle,
    pos: Offset,
    amt: Offset,
    backup_sync: bool,
) -> Result<(), HexpeekError> {
    let f_sz = data.size()?;
    let mut pos = pos;
    if amt < 0 {
        pos -= amt;
    }
    if pos < f_sz {
        file_copy(data, pos, f_sz - pos, data, pos + amt, f_sz - pos, None)?;
    }
    if amt < 0 {
        data.truncate(f_sz + amt)?;
    }
    let _ = backup_sync;
    Ok(())
}

/// Sort the two backup files newest-first by `firstop` (spec.md §4.6).
pub fn sort_newest_first(headers: Vec<(usize, BackupHeader)>) -> Vec<(usize, BackupHeader)> {
    let mut v = headers;
    v.sort_by(|a, b| b.1.firstop.cmp(&a.1.firstop));
    v
}

pub fn read_and_validate(backup: &FileHandle) -> Result<Option<BackupHeader>, HexpeekError> {
    let size = backup.size()?;
    if size == 0 {
        return Ok(None);
    }
    Ok(Some(read_header(backup)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn handle_with(contents: &[u8]) -> FileHandle {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        FileHandle::open_path(f.path(), true, false).unwrap()
    }

    fn empty_backup() -> (NamedTempFile, FileHandle) {
        let f = NamedTempFile::new().unwrap();
        let h = FileHandle::open_path(f.path(), true, false).unwrap();
        (f, h)
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let header = BackupHeader::new(7);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = BackupHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.firstop, 7);
        assert_eq!(parsed.most_recent_op(), None);
    }

    #[test]
    fn op_round_trips_with_truncated_command() {
        let long_cmd = "x".repeat(500);
        let op = BackupOp {
            status: STATUS_BACKUP_DONE,
            size_orig: 10,
            size_adj: 0,
            last_at: 0,
            saved_from: 0,
            saved_at: HEADER_SIZE as Offset,
            saved_len: 3,
            origcmd: long_cmd,
        };
        let bytes = op.to_bytes();
        let parsed = BackupOp::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.status, STATUS_BACKUP_DONE);
        assert_eq!(parsed.saved_len, 3);
        assert!(parsed.origcmd.ends_with('~'));
    }

    #[test]
    fn active_backup_index_rotates_every_depth_ops() {
        assert_eq!(active_backup_index(0, 8), 0);
        assert_eq!(active_backup_index(7, 8), 0);
        assert_eq!(active_backup_index(8, 8), 1);
        assert_eq!(active_backup_index(16, 8), 0);
    }

    #[test]
    fn make_backup_then_recover_restores_replace() {
        let data = handle_with(b"\x00\x01\x02\x03\x04\x05\x06\x07");
        let (_bf, backup) = empty_backup();

        make_backup(
            &data,
            &backup,
            0,
            8,
            OpKind::Replace,
            0,
            3,
            0,
            "0,3 r aabbcc",
            false,
        )
        .unwrap();

        // Simulate the mutation the backup protected.
        data.write_at(0, &[0xaa, 0xbb, 0xcc]).unwrap();

        let mut header = read_header(&backup).unwrap();
        assert_eq!(header.ops[0].status, STATUS_BACKUP_DONE);

        let mut counts = RecoveryCounts::default();
        let result = recover_op(&data, &backup, &mut header, 0, None, &mut counts, false).unwrap();
        assert!(result.is_some());
        assert_eq!(counts.reverted, 1);

        let mut buf = [0u8; 3];
        data.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x01, 0x02]);
    }

    #[test]
    fn recover_skips_incomplete_backup_start() {
        let data = handle_with(b"\x00\x01\x02\x03");
        let (_bf, backup) = empty_backup();
        make_backup(&data, &backup, 0, 8, OpKind::Replace, 0, 2, 0, "cmd", false).unwrap();
        let mut header = read_header(&backup).unwrap();
        header.ops[0].status = STATUS_BACKUP_START;

        let mut counts = RecoveryCounts::default();
        let result = recover_op(&data, &backup, &mut header, 0, None, &mut counts, false).unwrap();
        assert!(result.is_none());
        assert_eq!(counts.noncompl, 1);
    }

    #[test]
    fn recover_adj_op_restores_tail_after_crash_before_move() {
        // A 0x1000-byte file about to have 0x1000 bytes inserted at 0x100:
        // adjust_size records the tail it's about to shift via an ADJ
        // backup, then the process dies before the grow/shift itself runs.
        // Recovery finds the ADJ slot BACKUP_DONE and undoes nothing more
        // than truncating/restoring it back to its pre-adjustment state,
        // since the data file was never actually touched.
        let orig: Vec<u8> = (0u8..=255).cycle().take(0x1000).collect();
        let data = handle_with(&orig);
        let (_bf, backup) = empty_backup();

        make_adj_backup(&data, &backup, 0x100, false).unwrap();

        let mut header = read_header(&backup).unwrap();
        assert_eq!(header.ops[ADJ_SLOT].status, STATUS_BACKUP_DONE);

        let mut counts = RecoveryCounts::default();
        let proceed = recover_adj_op(&data, &backup, &mut header, None, &mut counts, false).unwrap();
        assert!(proceed);
        assert_eq!(counts.total, 1);
        assert_eq!(counts.reverted, 1);

        assert_eq!(data.size().unwrap(), 0x1000);
        let mut buf = vec![0u8; 0x1000];
        data.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, orig);

        let header = read_header(&backup).unwrap();
        assert_eq!(header.ops[ADJ_SLOT].status, STATUS_EMPTY);
    }

    #[test]
    fn recover_adj_op_counts_noncompl_when_backup_itself_never_finished() {
        // If the crash lands before the ADJ record's own write completes
        // (status stuck at BACKUP_START), there's no trustworthy saved tail
        // to replay -- the data file was never reached either, since
        // adjust_size only begins moving bytes after make_adj_backup
        // returns, so the right move is to flag it and leave the file alone.
        let data = handle_with(b"\x00\x01\x02\x03");
        let (_bf, backup) = empty_backup();
        make_adj_backup(&data, &backup, 1, false).unwrap();

        let mut header = read_header(&backup).unwrap();
        header.ops[ADJ_SLOT].status = STATUS_BACKUP_START;

        let mut counts = RecoveryCounts::default();
        let proceed = recover_adj_op(&data, &backup, &mut header, None, &mut counts, false).unwrap();
        assert!(proceed);
        assert_eq!(counts.noncompl, 1);
        assert_eq!(counts.reverted, 0);

        assert_eq!(data.size().unwrap(), 4);
        let mut buf = [0u8; 4];
        data.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x01, 0x02, 0x03]);
    }
}
