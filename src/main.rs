// vim: tw=80
//! Entry point: parses argv (`cli.rs`), opens infiles and their backup
//! pairs, then runs either one-shot batch mode (`-x`/`-dump`/`-pack`/
//! `-diff`) or the interactive REPL over a [`session::Session`].

mod backup;
mod cli;
mod codec;
mod command;
mod error;
mod fileservice;
mod filezone;
mod mutation;
mod offset;
mod printer;
mod session;
mod settings;

use std::env;
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info};

use cli::{BackupMode, Immediate, InfileSource, Invocation, OutputTarget};
use error::{CmdOutcome, ControlFlow, HexpeekError};
use fileservice::FileHandle;
use session::{BackupSlot, Infile, Session};
use settings::Settings;

const PROGRAM_NAME: &str = "hexpeek";
const HELP_TEXT: &str = "usage: hexpeek [options] [--] file [file]\n\
     Run with -help for the full command reference.\n";
const VERSION_LINE: &str = concat!("hexpeek ", env!("CARGO_PKG_VERSION"), "\n");
const LICENSE_TEXT: &str =
    "hexpeek is distributed under the BSD 3-Clause License. See the LICENSE file \
     for the full text.\n";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let program_name = args
        .first()
        .map(|a| Path::new(a).file_name().and_then(|n| n.to_str()).unwrap_or(PROGRAM_NAME).to_string())
        .unwrap_or_else(|| PROGRAM_NAME.to_string());

    let inv = match cli::parse_args(&args[1..]) {
        Ok(inv) => inv,
        Err(e) => {
            eprint!("{e}");
            eprintln!("Run with -help for help with arguments.");
            return ExitCode::from(4);
        }
    };

    init_logging(&inv);

    if let Some(immediate) = inv.immediate {
        print_immediate(immediate);
        return ExitCode::SUCCESS;
    }

    match run(program_name, inv) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(inv: &Invocation) {
    let mut builder = env_logger::Builder::new();
    builder.parse_env("HEXPEEK_LOG").format_timestamp(None);
    if let Some(path) = &inv.trace_path {
        if let Ok(f) = File::create(path) {
            builder.target(env_logger::Target::Pipe(Box::new(f)));
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    let _ = builder.try_init();
}

fn print_immediate(which: Immediate) {
    match which {
        Immediate::Help => print!("{HELP_TEXT}"),
        Immediate::Version => print!("{VERSION_LINE}"),
        Immediate::License => print!("{LICENSE_TEXT}"),
    }
}

/// Build `Settings` from defaults, an optional `-f` config file, and the
/// parsed CLI flags (CLI always wins, matching the teacher's `Config::load`
/// then `config.validate(&cli)` ordering).
fn build_settings(inv: &Invocation) -> Result<Settings, HexpeekError> {
    let mut settings = Settings::default();
    if let Some(path) = &inv.config_path {
        settings.apply_config_file(path)?;
    }

    if inv.bits_mode {
        settings.disp_mode = codec::DisplayMode::Bits;
    }
    if let Some(cols) = inv.cols {
        let idx = match settings.disp_mode {
            codec::DisplayMode::Hex => 0,
            codec::DisplayMode::Bits => 1,
        };
        settings.mode_lines[idx] = cols;
    }
    if let Some(group) = inv.group {
        let idx = match settings.disp_mode {
            codec::DisplayMode::Hex => 0,
            codec::DisplayMode::Bits => 1,
        };
        settings.mode_groups[idx] = group;
    }
    if inv.plain {
        settings.margin = settings::Margin::Off;
        settings.ruler = false;
        settings.print_prefix = false;
        settings.print_text = false;
    }
    if inv.omit_lineterm {
        settings.line_term = String::new();
    }
    if let Some(fmt) = &inv.format {
        apply_format_template(&mut settings, fmt)?;
    }
    if inv.pedantic {
        settings.infer = false;
    }
    if inv.permissive {
        settings.permissive = true;
    }
    if let Some(allow) = inv.allow_ik {
        settings.allow_ik = allow;
    }
    if !inv.unique_check {
        settings.assume_unique_infiles = true;
    }
    if inv.assume_ttys {
        settings.assume_ttys = true;
    }
    if let Some(strict) = inv.fail_strict {
        settings.fail_strict = strict;
    }
    match inv.backup {
        Some(BackupMode::Depth(d)) => settings.backup_depth = d,
        Some(BackupMode::Sync) => settings.backup_sync = true,
        None => {}
    }
    settings.recover_interactive = inv.recover;
    settings.recover_auto = inv.recover_auto;
    settings.command = inv.command.clone();
    settings.do_pack = inv.do_pack;

    Ok(settings)
}

/// `-format FMT`: a group delimiter template containing `%_g` (where each
/// group's octets go) and optionally `%_l?` marking a distinct pre-delimiter
/// for the first group on a line (spec.md §6).
fn apply_format_template(settings: &mut Settings, fmt: &str) -> Result<(), HexpeekError> {
    let (pre, term) = fmt
        .split_once("%_g")
        .ok_or_else(|| HexpeekError::user("-format template must contain \"%_g\""))?;
    if let Some((line_pre, group_pre)) = pre.split_once("%_l?") {
        settings.group_pre = [line_pre.to_string(), group_pre.to_string()];
    } else {
        settings.group_pre = [pre.to_string(), pre.to_string()];
    }
    settings.group_term = term.to_string();
    Ok(())
}

fn open_infile(arg: &cli::InfileArg, backup_depth: u32) -> Result<Infile, HexpeekError> {
    let (handle, display_name, path, created) = match &arg.source {
        InfileSource::Path(path) => {
            let existed = path.exists();
            let handle = FileHandle::open_path(path, arg.read_write, arg.create)?;
            (handle, path.display().to_string(), Some(path.clone()), arg.create && !existed)
        }
        InfileSource::Fd(fd) => {
            // SAFETY: the caller passed this fd on the command line for us
            // to own for the rest of the process (spec.md §6 `-d FD`).
            let handle = unsafe { FileHandle::from_raw_fd(*fd) }?;
            (handle, format!("<fd {fd}>"), None, false)
        }
    };

    let backups = open_backup_slots(&arg.source, path.as_deref(), backup_depth)?;

    Ok(Infile {
        path,
        display_name,
        read_write: arg.read_write,
        handle,
        at: std::cell::Cell::new(None),
        last_at: std::cell::Cell::new(0),
        opcnt: std::cell::Cell::new(0),
        created,
        backups,
    })
}

fn open_backup_slots(
    source: &InfileSource,
    path: Option<&Path>,
    backup_depth: u32,
) -> Result<[BackupSlot; 2], HexpeekError> {
    if backup_depth == 0 {
        return Ok([
            BackupSlot { display_name: String::new(), handle: None },
            BackupSlot { display_name: String::new(), handle: None },
        ]);
    }

    let paths: [PathBuf; 2] = match (source, path) {
        (InfileSource::Path(_), Some(p)) => session::backup_paths_for(p, PROGRAM_NAME),
        (InfileSource::Fd(fd), _) => {
            let ppid = std::process::id();
            session::backup_paths_for_fd(*fd, ppid, PROGRAM_NAME)
        }
        _ => unreachable!("path-bound infiles always carry a path"),
    };

    let mut slots = Vec::with_capacity(2);
    for p in paths {
        let handle = FileHandle::open_path(&p, true, true)?;
        slots.push(BackupSlot { display_name: p.display().to_string(), handle: Some(handle) });
    }
    Ok([slots.remove(0), slots.remove(0)])
}

fn open_output(target: &OutputTarget) -> Result<Box<dyn Write>, HexpeekError> {
    match target {
        OutputTarget::Stdout => Ok(Box::new(io::stdout())),
        OutputTarget::Path(p) => {
            let f = File::create(p).map_err(|e| HexpeekError::Io(format!("error opening {p:?}: {e}")))?;
            Ok(Box::new(f))
        }
        OutputTarget::Fd(fd) => {
            let f = unsafe { File::from_raw_fd(*fd) };
            Ok(Box::new(f))
        }
    }
}

/// Build the synthetic `-x` command string for `-dump`/`-list`/`-diff`,
/// honoring `-s START -l LEN` when given (spec.md §6).
fn synthesize_command(inv: &Invocation) -> Option<String> {
    if let Some(cmd) = &inv.command {
        return Some(cmd.clone());
    }
    let zone = |fi: usize| -> String {
        match (inv.start, inv.len) {
            (Some(s), Some(l)) => format!("${fi}@{s:#x},{l:#x}"),
            (Some(s), None) => format!("${fi}@{s:#x}:max"),
            (None, Some(l)) => format!("${fi}@0,{l:#x}"),
            (None, None) => format!("${fi}@0:max"),
        }
    };
    if inv.do_diff {
        return Some(format!("{}~{}", zone(0), zone(1)));
    }
    if inv.do_dump {
        return Some(zone(0));
    }
    None
}

fn run(program_name: String, mut inv: Invocation) -> Result<i32, HexpeekError> {
    cli::apply_program_name_defaults(&program_name, &mut inv);
    let settings = build_settings(&inv)?;
    let backup_depth = settings.backup_depth;

    if inv.infiles.is_empty() && !settings.recover_interactive && !settings.recover_auto {
        return Err(HexpeekError::user(
            "no data file to open! run with -help for help with arguments",
        ));
    }
    if inv.do_diff && inv.infiles.len() != 2 {
        return Err(HexpeekError::user("-diff requires exactly two infiles"));
    }

    let mut infiles = Vec::with_capacity(inv.infiles.len());
    for arg in &inv.infiles {
        infiles.push(open_infile(arg, backup_depth)?);
    }

    let mut session = Session::new(settings);
    session.infiles = infiles;

    if session.settings.recover_interactive || session.settings.recover_auto {
        let counts = session.recover_all(session.settings.recover_interactive)?;
        info!("recovery complete: {counts:?}");
        println!(
            "recovered {} of {} outstanding operation(s); {} failed",
            counts.reverted, counts.total, counts.failed
        );
        return Ok(0);
    }

    let mut out = open_output(&inv.out)?;

    if session.settings.do_pack {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| HexpeekError::Io(format!("error reading stdin: {e}")))?;
        let bytes = printer::pack(&text, &session.settings)?;
        let infile = session
            .infiles
            .first()
            .ok_or_else(|| HexpeekError::user("no data file to pack into"))?;
        infile.handle.truncate(bytes.len() as offset::Offset)?;
        if !bytes.is_empty() {
            infile.handle.write_at(0, &bytes)?;
        }
        return Ok(0);
    }

    let interactive = session.settings.command.is_none() && synthesize_command(&inv).is_none();
    let fail_strict = inv.fail_strict.unwrap_or(!interactive);

    match synthesize_command(&inv) {
        Some(script) => run_batch(&mut session, &script, fail_strict, &mut out),
        None => run_interactive(&mut session, &mut out),
    }
}

fn run_batch(
    session: &mut Session,
    script: &str,
    fail_strict: bool,
    out: &mut dyn Write,
) -> Result<i32, HexpeekError> {
    let mut last_diff_code = 0;
    for line in script.split(';') {
        match session.execute_line(line) {
            Ok(Some(text)) => {
                let _ = writeln!(out, "{text}");
            }
            Ok(None) => {}
            Err(CmdOutcome::Done(flow)) => return Ok(flow.exit_code()),
            Err(CmdOutcome::Err(e)) => {
                if matches!(e, HexpeekError::Diff { .. }) {
                    let _ = writeln!(out, "{e}");
                    last_diff_code = e.exit_code();
                    continue;
                }
                if fail_strict {
                    return Err(e);
                }
                eprintln!("{e}");
            }
        }
    }
    Ok(last_diff_code)
}

fn run_interactive(session: &mut Session, out: &mut dyn Write) -> Result<i32, HexpeekError> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| HexpeekError::Io(format!("error reading stdin: {e}")))?;
        match session.execute_line(&line) {
            Ok(Some(text)) => {
                let _ = writeln!(out, "{text}");
            }
            Ok(None) => {}
            Err(CmdOutcome::Done(flow)) => return Ok(flow.exit_code()),
            Err(CmdOutcome::Err(e)) => eprintln!("{e}"),
        }
    }
    Ok(ControlFlow::Quit.exit_code())
}
