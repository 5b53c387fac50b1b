//! Session Controller (spec.md §4.8 in this crate / §2 "Session
//! Controller"): owns the open infiles and process-wide `Settings`,
//! implements [`FileZoneContext`]/[`CommandContext`] so the parser and
//! mutation engine stay pure functions over `&mut Session`, and dispatches
//! each parsed command to the Mutation Engine or Pretty Printer.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};

use crate::backup::{self, BackupHeader, OpKind, RecoveryCounts};
use crate::codec::{wildcard_matches, Tables};
use crate::command::{parse_command, CommandContext, CommandKind, LineArgKind, SettingToggle};
use crate::error::{CmdOutcome, ControlFlow, HexpeekError};
use crate::fileservice::FileHandle;
use crate::filezone::{FileZoneContext, RawFileZone, ScalarBase};
use crate::mutation::{self, MutationContext, Payload};
use crate::offset::{display_optional, Offset};
use crate::printer;
use crate::settings::{Margin, Settings};

const MAX_SEARCH_WINDOW: Offset = 256 * 1024 * 1024;

/// One backup-file slot of an infile's rotating pair.
pub struct BackupSlot {
    pub display_name: String,
    pub handle: Option<FileHandle>,
}

/// One open file (spec.md §3 `Infile`).
pub struct Infile {
    pub path: Option<PathBuf>,
    pub display_name: String,
    pub read_write: bool,
    pub handle: FileHandle,
    pub at: Cell<Option<Offset>>,
    pub last_at: Cell<Offset>,
    pub opcnt: Cell<u64>,
    pub created: bool,
    pub backups: [BackupSlot; 2],
}

impl Infile {
    fn active_backup(&self, depth: u32) -> Option<&FileHandle> {
        if depth == 0 {
            return None;
        }
        let idx = backup::active_backup_index(self.opcnt.get(), depth);
        self.backups[idx].handle.as_ref()
    }

    fn record_prior_offset(&self) {
        self.last_at.set(self.at.get().unwrap_or(0));
    }
}

/// Top-level session state: settings plus up to two open infiles.
pub struct Session {
    pub settings: Settings,
    pub infiles: Vec<Infile>,
    pub tables: Tables,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        Session {
            settings,
            infiles: Vec::new(),
            tables: Tables::new(),
        }
    }

    fn infile(&self, fi: usize) -> Result<&Infile, HexpeekError> {
        self.infiles
            .get(fi)
            .ok_or_else(|| HexpeekError::user(format!("no such file $${fi}")))
    }

    /// Resolve a [`RawFileZone`] to a concrete zone using `default_len`,
    /// clamping the length to the file's size when `tolerate_eof`/`max`
    /// was requested.
    fn finalize_zone(
        &self,
        raw: RawFileZone,
        default_len: Offset,
    ) -> Result<crate::filezone::FileZone, HexpeekError> {
        Ok(raw.finalize(default_len))
    }

    /// Clamp `fz.len` to the file's current size when `tolerate_eof`/`max`
    /// was requested, erroring instead when it wasn't.
    fn clamp_zone_to_size(
        &self,
        fz: crate::filezone::FileZone,
    ) -> Result<crate::filezone::FileZone, HexpeekError> {
        let size = self.infile(fz.fi)?.handle.size()?;
        let mut len = fz.len;
        if fz.tolerate_eof || len == crate::offset::OFFSET_MAX {
            len = std::cmp::max(0, size - fz.start);
        } else if fz.start + len > size {
            return Err(HexpeekError::user("filezone extends past end of file"));
        }
        Ok(crate::filezone::FileZone { len, ..fz })
    }

    fn read_zone(&self, fz: crate::filezone::FileZone) -> Result<Vec<u8>, HexpeekError> {
        let fz = self.clamp_zone_to_size(fz)?;
        let infile = self.infile(fz.fi)?;
        let mut buf = vec![0u8; fz.len as usize];
        if fz.len > 0 {
            infile.handle.read_at(fz.start, &mut buf)?;
        }
        Ok(buf)
    }

    /// Linear wildcard search within `[start, start+len)`, bounded to
    /// [`MAX_SEARCH_WINDOW`] bytes read into memory at a time.
    fn search(
        &self,
        fi: usize,
        start: Offset,
        len: Offset,
        pattern: &[u8],
        mask: &[u8],
    ) -> Result<Option<Offset>, HexpeekError> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let infile = self.infile(fi)?;
        let size = infile.handle.size()?;
        let end = std::cmp::min(start.saturating_add(len), size);
        if end <= start {
            return Ok(None);
        }
        if end - start > MAX_SEARCH_WINDOW {
            return Err(HexpeekError::state("search region too large to scan in one pass"));
        }
        let mut buf = vec![0u8; (end - start) as usize];
        infile.handle.read_at(start, &mut buf)?;
        for i in 0..buf.len() {
            if i + pattern.len() > buf.len() {
                break;
            }
            if wildcard_matches(&buf[i..], pattern, mask) {
                return Ok(Some(start + i as Offset));
            }
        }
        Ok(None)
    }

    /// Execute one line of input text, returning rendered text to display
    /// (if any). Mirrors the original's per-command dispatch loop.
    pub fn execute_line(&mut self, input: &str) -> Result<Option<String>, CmdOutcome> {
        let cmd = match parse_command(input, self) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("command parse failed: {e}");
                return Err(e.into());
            }
        };
        trace!("parsed command: {:?}", cmd.kind);

        // Match on a reference: `CommandKind` carries `String` payloads and
        // is not `Copy`, and `cmd` is still needed whole (via `&cmd`) below.
        match &cmd.kind {
            CommandKind::Quit => return Err(CmdOutcome::Done(ControlFlow::Quit)),
            CommandKind::Stop => return Err(CmdOutcome::Done(ControlFlow::Stop)),
            CommandKind::Help => return Ok(Some(help_text())),
            CommandKind::Files => return Ok(Some(self.render_files())),
            CommandKind::Reset(fi) => {
                self.reset(*fi)?;
                return Ok(None);
            }
            CommandKind::ShowSettings => return Ok(Some(format!("{:#?}", self.settings))),
            CommandKind::SetEndian(big) => {
                self.settings.endian_big = *big;
                return Ok(None);
            }
            CommandKind::SetHexCase(upper) => {
                self.settings.hex_case = if *upper {
                    crate::codec::HexCase::Upper
                } else {
                    crate::codec::HexCase::Lower
                };
                return Ok(None);
            }
            CommandKind::SetBits => {
                self.settings.disp_mode = crate::codec::DisplayMode::Bits;
                return Ok(None);
            }
            CommandKind::SetLineArg(kind, value) => {
                self.set_line_arg(*kind, *value)?;
                return Ok(None);
            }
            CommandKind::SetMargin(text) => {
                self.settings.margin = parse_margin(text)?;
                return Ok(None);
            }
            CommandKind::SetScalar(value) => {
                self.settings.scalar_base = match value {
                    0 => ScalarBase::CStyle,
                    16 => ScalarBase::Hex,
                    _ => return Err(HexpeekError::user("scalar base must be 0 or 16").into()),
                };
                return Ok(None);
            }
            CommandKind::Toggle(which, on) => {
                match which {
                    SettingToggle::Autoskip => self.settings.autoskip = *on,
                    SettingToggle::Diffskip => self.settings.diffskip = *on,
                    SettingToggle::Ruler => self.settings.ruler = *on,
                    SettingToggle::Prefix => self.settings.print_prefix = *on,
                }
                return Ok(None);
            }
            CommandKind::SetText(enc, on) => {
                self.settings.print_text = *on;
                if let Some(enc) = enc {
                    self.settings.text_encoding = *enc;
                }
                return Ok(None);
            }
            CommandKind::Ops => return Ok(Some(self.render_ops())),
            CommandKind::Undo(depth) => {
                let n = depth.unwrap_or(1);
                let undone = self.undo(n)?;
                return Ok(Some(format!("undid {undone} operation(s)")));
            }
            CommandKind::PageForward => {}
            CommandKind::Print { .. }
            | CommandKind::Offset
            | CommandKind::Search
            | CommandKind::Diff
            | CommandKind::DiffSearch
            | CommandKind::Replace
            | CommandKind::Insert
            | CommandKind::Kill => {}
        }

        let Some(raw_fz) = cmd.target_fz.clone() else {
            return Err(HexpeekError::user("command requires a filezone").into());
        };
        let fi = raw_fz.fi;
        {
            let infile = self.infile(fi)?;
            infile.record_prior_offset();
        }

        let result = self.execute_targeted(&cmd, raw_fz);
        match result {
            Ok(out) => Ok(out),
            Err(e) => {
                // Command execution is atomic: rewind the offset on failure
                // (spec.md §5).
                if let Ok(infile) = self.infile(fi) {
                    infile.at.set(Some(infile.last_at.get()));
                }
                Err(e)
            }
        }
    }

    fn execute_targeted(
        &mut self,
        cmd: &crate::command::ParsedCommand,
        raw_fz: RawFileZone,
    ) -> Result<Option<String>, CmdOutcome> {
        match &cmd.kind {
            CommandKind::Print { verbose } => {
                let fz = self.finalize_zone(raw_fz, self.settings.print_default_len())?;
                let data = self.read_zone(fz)?;
                let out = if *verbose {
                    printer::show_verbose(&data, fz.start, &self.settings)
                } else {
                    printer::show(&data, fz.start, &self.settings, &self.tables)
                };
                self.advance_offset(fz.fi, fz.start, fz.len, cmd.pre_increment, cmd.post_increment)?;
                Ok(Some(out))
            }
            CommandKind::Offset => {
                let fz = raw_fz.finalize(1);
                self.advance_offset(fz.fi, fz.start, 0, false, false)?;
                let infile = self.infile(fz.fi)?;
                Ok(Some(display_optional(infile.at.get())))
            }
            CommandKind::Search => {
                let fz = self.finalize_zone(raw_fz, self.settings.search_default_len())?;
                let converted = cmd
                    .arg_converted
                    .clone()
                    .ok_or_else(|| HexpeekError::user("search requires a pattern"))?;
                let found = self.search(fz.fi, fz.start, fz.len, &converted.octets, &converted.masks)?;
                match found {
                    Some(at) => {
                        self.infile(fz.fi)?.at.set(Some(at));
                        Ok(Some(format!("{at:#x}")))
                    }
                    None => Err(HexpeekError::user("pattern not found").into()),
                }
            }
            CommandKind::Diff | CommandKind::DiffSearch => {
                let other_raw = cmd
                    .other_fz
                    .clone()
                    .ok_or_else(|| HexpeekError::state("diff command missing second filezone"))?;
                let default_len = self.settings.print_default_len();
                let fz_a = self.finalize_zone(raw_fz, default_len)?;
                let fz_b = self.finalize_zone(other_raw, fz_a.len)?;
                let a = self.read_zone(fz_a)?;
                let b = self.read_zone(fz_b)?;
                let (rendered, diffs) =
                    printer::show_diff(&a, &b, fz_a.start, &self.settings, &self.tables);
                if !diffs.is_empty() {
                    if matches!(cmd.kind, CommandKind::DiffSearch) {
                        self.infile(fz_a.fi)?.at.set(Some(diffs[0]));
                    }
                    return Err(HexpeekError::Diff { at: diffs[0] }.into());
                }
                Ok(Some(rendered))
            }
            CommandKind::Replace => self.run_write_command(cmd, raw_fz, OpKind::Replace),
            CommandKind::Insert => self.run_write_command(cmd, raw_fz, OpKind::Insert),
            CommandKind::Kill => {
                if !self.settings.allow_ik {
                    return Err(HexpeekError::user("insert/kill is disabled").into());
                }
                let mut fz = self.finalize_zone(raw_fz, 1)?;
                let size = self.infile(fz.fi)?.handle.size()?;
                if fz.start + fz.len > size {
                    // An explicit `:LIMIT` zone or a lenient (non-pedantic)
                    // session silently clamps to EOF; a pedantic one rejects
                    // a delete length that runs past the file.
                    if fz.tolerate_eof || self.settings.infer {
                        fz.len = std::cmp::max(0, size - fz.start);
                    } else {
                        return Err(HexpeekError::user("excessive delete length").into());
                    }
                }
                self.run_mutation(fz.fi, fz, Payload::Literal(&[]), OpKind::Kill, &cmd.origcmd)?;
                Ok(None)
            }
            _ => unreachable!("non-targeted commands are handled in execute_line"),
        }
    }

    /// Build the `Payload` for a replace/insert command: a literal byte
    /// string when the argument converted directly, or a (possibly
    /// same-file) source filezone when the argument led with `$`/`@`/`,`
    /// (spec.md §4.2/§4.5 "source-zone argument").
    fn run_write_command(
        &self,
        cmd: &crate::command::ParsedCommand,
        raw_fz: RawFileZone,
        kind: OpKind,
    ) -> Result<Option<String>, CmdOutcome> {
        if let Some(converted) = &cmd.arg_converted {
            let fz = self.finalize_zone(raw_fz, converted.octets.len() as Offset)?;
            self.run_mutation(fz.fi, fz, Payload::Literal(&converted.octets), kind, &cmd.origcmd)?;
            return Ok(None);
        }

        let text = cmd
            .arg_text
            .as_deref()
            .ok_or_else(|| HexpeekError::user("missing argument"))?;
        let (src_raw, rest) = crate::filezone::parse_filezone(text, self)?;
        if !rest.is_empty() {
            return Err(HexpeekError::user("unexpected trailing text after source filezone").into());
        }
        let src_fz = self.finalize_zone(src_raw, self.settings.print_default_len())?;
        let src_fz = self.clamp_zone_to_size(src_fz)?;
        let fz = self.finalize_zone(raw_fz, src_fz.len)?;
        let src_handle = &self.infile(src_fz.fi)?.handle;
        self.run_mutation(
            fz.fi,
            fz,
            Payload::Source { handle: src_handle, start: src_fz.start, len: src_fz.len },
            kind,
            &cmd.origcmd,
        )?;
        Ok(None)
    }

    fn run_mutation(
        &self,
        fi: usize,
        fz: crate::filezone::FileZone,
        payload: Payload,
        kind: OpKind,
        origcmd: &str,
    ) -> Result<(), HexpeekError> {
        let infile = self.infile(fi)?;
        if !infile.read_write {
            return Err(HexpeekError::user("command requires a read-write file"));
        }
        let prior_at = infile.last_at.get();
        let opcnt = infile.opcnt.get();
        let depth = self.settings.backup_depth;
        let backup = infile.active_backup(depth);
        let ctx = MutationContext {
            data: &infile.handle,
            backup,
            opcnt,
            backup_depth: depth,
            backup_sync: self.settings.backup_sync,
            prior_at,
        };

        let next_at = match kind {
            OpKind::Replace => mutation::replace(&ctx, fz, payload, origcmd)?,
            OpKind::Insert => mutation::insert(&ctx, fz, payload, origcmd)?,
            OpKind::Kill => mutation::kill(&ctx, fz, origcmd)?,
        };

        infile.opcnt.set(opcnt + 1);
        infile.at.set(Some(next_at));
        info!("{:?} at {:#x} on file $${fi}, opcnt now {}", kind, fz.start, opcnt + 1);
        Ok(())
    }

    fn advance_offset(
        &self,
        fi: usize,
        start: Offset,
        len: Offset,
        pre: bool,
        post: bool,
    ) -> Result<(), HexpeekError> {
        let infile = self.infile(fi)?;
        let next = if pre || post { start + len } else { start };
        infile.at.set(Some(next));
        Ok(())
    }

    fn set_line_arg(&mut self, kind: LineArgKind, value: i64) -> Result<(), HexpeekError> {
        if value <= 0 {
            return Err(HexpeekError::user("value must be positive"));
        }
        let idx = match self.settings.disp_mode {
            crate::codec::DisplayMode::Hex => 0,
            crate::codec::DisplayMode::Bits => 1,
        };
        match kind {
            LineArgKind::PrintDefaultLen => self.settings.mode_print_defs[idx] = value,
            LineArgKind::SearchDefaultLen => self.settings.mode_search_defs[idx] = value,
            LineArgKind::LineWidth => self.settings.mode_lines[idx] = value,
            LineArgKind::GroupWidth => self.settings.mode_groups[idx] = value,
        }
        Ok(())
    }

    fn render_files(&self) -> String {
        self.infiles
            .iter()
            .enumerate()
            .map(|(i, f)| {
                format!(
                    "${i} {} ({}) at {}",
                    f.display_name,
                    if f.read_write { "rw" } else { "ro" },
                    display_optional(f.at.get())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_ops(&self) -> String {
        self.infiles
            .iter()
            .enumerate()
            .map(|(i, f)| format!("${i}: {} operation(s) performed", f.opcnt.get()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reset the current offset of one (or all, if `fi` is `None`) infile
    /// back to unset, mirroring `reset [$fi]`.
    fn reset(&mut self, fi: Option<usize>) -> Result<(), HexpeekError> {
        match fi {
            Some(fi) => self.infile(fi)?.at.set(None),
            None => {
                for infile in &self.infiles {
                    infile.at.set(None);
                }
            }
        }
        Ok(())
    }

    /// Undo `n` most-recent write-class operations across both infiles,
    /// newest-first by their backup file's `firstop` (spec.md §4.6 "Undo
    /// depth N").
    fn undo(&mut self, n: u32) -> Result<u32, HexpeekError> {
        let mut undone = 0;
        for infile in &self.infiles {
            if undone >= n {
                break;
            }
            let depth = self.settings.backup_depth;
            if depth == 0 {
                continue;
            }
            let mut rounds: Vec<(usize, BackupHeader)> = Vec::new();
            for (idx, slot) in infile.backups.iter().enumerate() {
                if let Some(h) = &slot.handle {
                    if let Some(header) = backup::read_and_validate(h)? {
                        rounds.push((idx, header));
                    }
                }
            }
            let rounds = backup::sort_newest_first(rounds);
            for (idx, mut header) in rounds {
                let Some(backup_handle) = infile.backups[idx].handle.as_ref() else {
                    continue;
                };
                if undone >= n {
                    break;
                }
                let Some(max) = header.most_recent_op() else {
                    continue;
                };
                for opix in (0..=max).rev() {
                    if undone >= n {
                        break;
                    }
                    let mut counts = RecoveryCounts::default();
                    let result = backup::recover_op(
                        &infile.handle,
                        backup_handle,
                        &mut header,
                        opix,
                        None,
                        &mut counts,
                        self.settings.backup_sync,
                    )?;
                    if let Some(state) = result {
                        infile.at.set(Some(state.last_at));
                        let cnt = infile.opcnt.get();
                        infile.opcnt.set(cnt.saturating_sub(1));
                        undone += 1;
                    }
                }
            }
        }
        Ok(undone)
    }

    /// Run backup/ADJ recovery across every infile at startup (`-recover`).
    pub fn recover_all(&mut self, interactive: bool) -> Result<RecoveryCounts, HexpeekError> {
        let mut totals = RecoveryCounts::default();
        for infile in &self.infiles {
            for slot in &infile.backups {
                let Some(backup_handle) = &slot.handle else {
                    continue;
                };
                let Some(mut header) = backup::read_and_validate(backup_handle)? else {
                    continue;
                };
                let mut ask_adj: Option<&mut dyn FnMut() -> bool> = None;
                let mut always_yes = || true;
                if interactive {
                    ask_adj = Some(&mut always_yes);
                }
                backup::recover_adj_op(
                    &infile.handle,
                    backup_handle,
                    &mut header,
                    ask_adj,
                    &mut totals,
                    self.settings.backup_sync,
                )?;
                if let Some(max) = header.most_recent_op() {
                    for opix in (0..=max).rev() {
                        backup::recover_op(
                            &infile.handle,
                            backup_handle,
                            &mut header,
                            opix,
                            None,
                            &mut totals,
                            self.settings.backup_sync,
                        )?;
                    }
                }
            }
            infile.handle.sync()?;
        }
        debug!("recovery complete: {totals:?}");
        Ok(totals)
    }
}

fn parse_margin(text: &str) -> Result<Margin, HexpeekError> {
    match text {
        "0" => Ok(Margin::Off),
        "full" => Ok(Margin::Full),
        other => {
            let n: u32 = other
                .parse()
                .map_err(|_| HexpeekError::user("malformed margin width"))?;
            Ok(Margin::Digits(n))
        }
    }
}

fn help_text() -> String {
    "hexpeek: interactive hex/bits editor. Type 'files' to list open files, \
     'settings' to view current settings, 'quit' to exit."
        .to_string()
}

impl FileZoneContext for Session {
    fn open_file_count(&self) -> usize {
        self.infiles.len()
    }

    fn current_offset(&self, fi: usize) -> Option<Offset> {
        self.infiles.get(fi).and_then(|f| f.at.get())
    }

    fn file_size(&self, fi: usize) -> Result<Offset, HexpeekError> {
        self.infile(fi)?.handle.size()
    }

    fn is_seekable(&self, fi: usize) -> bool {
        self.infiles.get(fi).map(|f| f.handle.is_seekable()).unwrap_or(false)
    }

    fn infer(&self) -> bool {
        self.settings.infer
    }

    fn scalar_base(&self) -> ScalarBase {
        self.settings.scalar_base
    }
}

impl CommandContext for Session {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn is_read_write(&self, fi: usize) -> bool {
        self.infiles.get(fi).map(|f| f.read_write).unwrap_or(false)
    }
}

/// Derive the two backup file paths for a path-bound infile (spec.md §6
/// "Backup file naming").
pub fn backup_paths_for(path: &Path, program_name: &str) -> [PathBuf; 2] {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let ext = format!("{program_name}-backup");
    [
        dir.join(format!(".{base}.f0.{ext}")),
        dir.join(format!(".{base}.f1.{ext}")),
    ]
}

/// Derive the two backup file paths for a descriptor-bound infile.
pub fn backup_paths_for_fd(fd: i32, ppid: u32, program_name: &str) -> [PathBuf; 2] {
    let ext = format!("{program_name}-backup");
    [
        PathBuf::from(format!(".{ppid}-{fd}.d0.{ext}")),
        PathBuf::from(format!(".{ppid}-{fd}.d1.{ext}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn infile_with(contents: &[u8]) -> Infile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        let handle = FileHandle::open_path(f.path(), true, false).unwrap();
        Infile {
            path: Some(f.path().to_path_buf()),
            display_name: "test".to_string(),
            read_write: true,
            handle,
            at: Cell::new(Some(0)),
            last_at: Cell::new(0),
            opcnt: Cell::new(0),
            created: false,
            backups: [
                BackupSlot { display_name: String::new(), handle: None },
                BackupSlot { display_name: String::new(), handle: None },
            ],
        }
    }

    fn session_with(contents: &[u8]) -> Session {
        let mut s = Session::new(Settings::default());
        s.infiles.push(infile_with(contents));
        s
    }

    /// Like [`infile_with`], but with real (temp-file-backed) backup slots
    /// so write-class commands actually leave a recoverable trail (needed
    /// to exercise undo/recovery from outside `backup.rs` itself).
    fn infile_with_backups(contents: &[u8]) -> Infile {
        let mut infile = infile_with(contents);
        let slot = |_| {
            let f = NamedTempFile::new().unwrap();
            let handle = FileHandle::open_path(f.path(), true, false).unwrap();
            BackupSlot { display_name: f.path().display().to_string(), handle: Some(handle) }
        };
        infile.backups = [slot(0), slot(1)];
        infile
    }

    fn session_with_backups(contents: &[u8]) -> Session {
        let mut s = Session::new(Settings::default());
        s.infiles.push(infile_with_backups(contents));
        s
    }

    #[test]
    fn print_renders_bytes_at_offset() {
        let mut s = session_with(b"\x00\x01\x02\x03\x04\x05\x06\x07");
        let out = s.execute_line("@0,8").unwrap().unwrap();
        assert!(out.contains("00 01"));
    }

    #[test]
    fn replace_then_print_shows_new_bytes() {
        let mut s = session_with(b"\x00\x01\x02\x03\x04\x05\x06\x07");
        s.execute_line("@0,3 r aabbcc").unwrap();
        let out = s.execute_line("@0,8").unwrap().unwrap();
        assert!(out.to_lowercase().contains("aa bb cc"));
        assert_eq!(s.infiles[0].opcnt.get(), 1);
    }

    #[test]
    fn quit_returns_done_control_flow() {
        let mut s = session_with(b"\x00");
        let err = s.execute_line("quit").unwrap_err();
        match err {
            CmdOutcome::Done(ControlFlow::Quit) => {}
            other => panic!("expected Done(Quit), got {other:?}"),
        }
    }

    #[test]
    fn search_sets_current_offset_on_match() {
        let mut s = session_with(b"\x00\x01\xaa\xbb\x02");
        let out = s.execute_line("@0/aabb").unwrap().unwrap();
        assert_eq!(out, "0x2");
        assert_eq!(s.infiles[0].at.get(), Some(2));
    }

    #[test]
    fn failed_command_rewinds_offset() {
        let mut s = session_with(b"\x00\x01\x02\x03");
        s.infiles[0].at.set(Some(1));
        let err = s.execute_line("@10,4").unwrap_err();
        assert!(matches!(err, CmdOutcome::Err(_)));
        assert_eq!(s.infiles[0].at.get(), Some(1));
    }

    #[test]
    fn kill_shrinks_file_and_moves_offset_to_start() {
        let mut s = session_with(b"0123456789");
        s.execute_line("@2,3 k").unwrap();
        assert_eq!(s.infiles[0].handle.size().unwrap(), 7);
        assert_eq!(s.infiles[0].at.get(), Some(2));
    }

    #[test]
    fn insert_with_self_source_zone_copies_before_hole_opens() {
        let mut s = session_with(b"\x00\x11\x22\x33");
        s.execute_line("@2 i @0,2").unwrap();
        assert_eq!(s.infiles[0].handle.size().unwrap(), 6);
        let mut buf = [0u8; 6];
        s.infiles[0].handle.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"\x00\x11\x00\x11\x22\x33");
    }

    #[test]
    fn kill_past_eof_clamps_when_lenient_errors_when_pedantic() {
        let mut s = session_with(b"0123456789");
        s.execute_line("@8,5 k").unwrap();
        assert_eq!(s.infiles[0].handle.size().unwrap(), 8);

        let mut strict = session_with(b"0123456789");
        strict.settings.infer = false;
        let err = strict.execute_line("@8,5 k").unwrap_err();
        match err {
            CmdOutcome::Err(HexpeekError::User(msg)) => assert_eq!(msg, "excessive delete length"),
            other => panic!("expected excessive delete length UserError, got {other:?}"),
        }
        assert_eq!(strict.infiles[0].handle.size().unwrap(), 10);
    }

    #[test]
    fn diff_search_reports_first_differing_offset_and_signals_diff() {
        let mut s = Session::new(Settings::default());
        s.infiles.push(infile_with(b"\xaa\xbb\xcc"));
        s.infiles.push(infile_with(b"\xaa\xbd\xcc"));
        let err = s.execute_line("$0@0,3/~$1@0,3").unwrap_err();
        match err {
            CmdOutcome::Err(e @ HexpeekError::Diff { at }) => {
                assert_eq!(at, 1);
                assert_eq!(e.exit_code(), 1);
            }
            other => panic!("expected Diff error, got {other:?}"),
        }
        assert_eq!(s.infiles[0].at.get(), Some(1));
    }

    #[test]
    fn undo_two_ops_restores_original_content_and_backup_status() {
        let mut s = session_with_backups(b"\x11\x22\x33\x44");
        s.execute_line("@0,1 r ff").unwrap();
        s.execute_line("@1,1 r ee").unwrap();
        assert_eq!(s.infiles[0].opcnt.get(), 2);

        s.execute_line("u 2").unwrap();
        assert_eq!(s.infiles[0].opcnt.get(), 0);

        let mut buf = [0u8; 4];
        s.infiles[0].handle.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);

        let backup = s.infiles[0].backups[0].handle.as_ref().unwrap();
        let header = backup::read_and_validate(backup).unwrap().unwrap();
        assert_eq!(header.ops[0].status, backup::STATUS_RECOVERY_DONE);
        assert_eq!(header.ops[1].status, backup::STATUS_RECOVERY_DONE);
    }

    #[test]
    fn reset_clears_current_offset() {
        let mut s = session_with(b"\x00\x01\x02\x03");
        s.infiles[0].at.set(Some(2));
        s.execute_line("reset").unwrap();
        assert_eq!(s.infiles[0].at.get(), None);
    }

    #[test]
    fn backup_paths_follow_naming_convention() {
        let paths = backup_paths_for(Path::new("/tmp/data.bin"), "hexpeek");
        assert_eq!(paths[0].file_name().unwrap().to_str().unwrap(), ".data.bin.f0.hexpeek-backup");
        assert_eq!(paths[1].file_name().unwrap().to_str().unwrap(), ".data.bin.f1.hexpeek-backup");
    }
}
