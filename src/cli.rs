//! Argument parsing (spec.md §6). The option grammar is a stateful,
//! left-to-right scan in the style of traditional `getopt` argument lists
//! rather than a declarative flag set: `-r`/`-w`/`-W` change the mode of
//! *subsequently* named infiles, and `-d FD`/bare paths are interleaved
//! positionally with those mode flags. That shape does not fit clap's
//! derive model, so this module walks `argv` by hand (mirroring
//! `parseArgv` in the original source) while still raising [`clap::Error`]
//! for malformed input, matching the diagnostic style the teacher crate
//! uses for its own hand-validated `-m FROM:TO` option.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Error as ClapError;

use crate::settings::MAX_BACKUP_DEPTH;

/// One infile named on the command line, in the order it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfileSource {
    Path(PathBuf),
    Fd(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfileArg {
    pub source: InfileSource,
    pub read_write: bool,
    pub create: bool,
}

/// Where `-o` redirects rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    Path(PathBuf),
    Fd(i32),
}

impl Default for OutputTarget {
    fn default() -> Self {
        OutputTarget::Stdout
    }
}

/// What to print and exit immediately for, before opening any files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    Help,
    Version,
    License,
}

/// `-backup {0..32|max|sync}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    Depth(u32),
    Sync,
}

/// Fully parsed command line, ready to be turned into a `Session`.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub immediate: Option<Immediate>,
    pub infiles: Vec<InfileArg>,
    pub allow_ik: Option<bool>,
    pub command: Option<String>,
    pub do_dump: bool,
    pub do_pack: bool,
    pub do_diff: bool,
    pub start: Option<i64>,
    pub len: Option<i64>,
    pub out: OutputTarget,
    pub bits_mode: bool,
    pub cols: Option<i64>,
    pub group: Option<i64>,
    pub plain: bool,
    pub omit_lineterm: bool,
    pub format: Option<String>,
    pub unique_check: bool,
    pub assume_ttys: bool,
    pub pedantic: bool,
    pub permissive: bool,
    pub fail_strict: Option<bool>,
    pub backup: Option<BackupMode>,
    pub recover: bool,
    pub recover_auto: bool,
    pub trace_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

fn next_value(args: &[String], idx: &mut usize, flag: &str) -> Result<String, ClapError> {
    *idx += 1;
    args.get(*idx).cloned().ok_or_else(|| {
        ClapError::raw(ErrorKind::MissingRequiredArgument, format!("{flag} requires an argument\n"))
    })
}

fn parse_fd(text: &str, flag: &str) -> Result<i32, ClapError> {
    text.parse::<i32>()
        .map_err(|_| ClapError::raw(ErrorKind::InvalidValue, format!("{flag} expects a numeric file descriptor\n")))
}

fn parse_offset(text: &str, flag: &str) -> Result<i64, ClapError> {
    let (text, radix) = if let Some(stripped) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (stripped, 16)
    } else {
        (text, 10)
    };
    i64::from_str_radix(text, radix)
        .map_err(|_| ClapError::raw(ErrorKind::InvalidValue, format!("{flag} expects a number\n")))
}

/// Program name aliases change defaults: `*view` is read-only, `*dump`/
/// `*list` imply `-dump`, `*pack` implies `-pack`, `*diff` implies `-diff`
/// (spec.md §6 "Program name aliases").
pub fn apply_program_name_defaults(program_name: &str, inv: &mut Invocation) {
    if program_name.ends_with("view") {
        inv.allow_ik = Some(false);
    }
    if program_name.ends_with("dump") || program_name.ends_with("list") {
        inv.do_dump = true;
    }
    if program_name.ends_with("pack") {
        inv.do_pack = true;
    }
    if program_name.ends_with("diff") {
        inv.do_diff = true;
    }
}

/// Parse `argv[1..]` into an [`Invocation`] (spec.md §6). Does not touch the
/// filesystem or open any descriptor; `main` does that once parsing
/// succeeds.
pub fn parse_args(args: &[String]) -> Result<Invocation, ClapError> {
    let mut inv = Invocation::default();
    let mut mode_read_write = true;
    let mut mode_create = true;

    let mut idx = 0;
    while idx < args.len() {
        let arg = args[idx].as_str();
        match arg {
            "--" => {
                idx += 1;
                while idx < args.len() {
                    inv.infiles.push(InfileArg {
                        source: InfileSource::Path(PathBuf::from(&args[idx])),
                        read_write: mode_read_write,
                        create: mode_create,
                    });
                    idx += 1;
                }
                break;
            }
            "-h" | "-help" => {
                inv.immediate = Some(Immediate::Help);
                return Ok(inv);
            }
            "-v" | "-version" => {
                inv.immediate = Some(Immediate::Version);
                return Ok(inv);
            }
            "-license" => {
                inv.immediate = Some(Immediate::License);
                return Ok(inv);
            }
            "-d" => {
                let fd = parse_fd(&next_value(args, &mut idx, "-d")?, "-d")?;
                inv.infiles.push(InfileArg {
                    source: InfileSource::Fd(fd),
                    read_write: mode_read_write,
                    create: mode_create,
                });
            }
            "-r" => {
                mode_read_write = false;
                mode_create = false;
            }
            "-w" => {
                mode_read_write = true;
                mode_create = true;
            }
            "-W" => {
                mode_read_write = true;
                mode_create = false;
            }
            "-ik" => inv.allow_ik = Some(true),
            "+ik" => inv.allow_ik = Some(false),
            "-x" => inv.command = Some(next_value(args, &mut idx, "-x")?),
            "-dump" | "-list" => inv.do_dump = true,
            "-pack" => inv.do_pack = true,
            "-diff" => inv.do_diff = true,
            "-s" => inv.start = Some(parse_offset(&next_value(args, &mut idx, "-s")?, "-s")?),
            "-l" => inv.len = Some(parse_offset(&next_value(args, &mut idx, "-l")?, "-l")?),
            "-o" => {
                let v = next_value(args, &mut idx, "-o")?;
                inv.out = if v == "-d" {
                    OutputTarget::Fd(parse_fd(&next_value(args, &mut idx, "-o -d")?, "-o -d")?)
                } else {
                    OutputTarget::Path(PathBuf::from(v))
                };
            }
            "-b" => inv.bits_mode = true,
            "-c" => inv.cols = Some(parse_offset(&next_value(args, &mut idx, "-c")?, "-c")?),
            "-g" => inv.group = Some(parse_offset(&next_value(args, &mut idx, "-g")?, "-g")?),
            "-p" => inv.plain = true,
            "+lineterm" => inv.omit_lineterm = true,
            "-format" => {
                let fmt = next_value(args, &mut idx, "-format")?;
                if !fmt.contains("%_g") {
                    return Err(ClapError::raw(
                        ErrorKind::InvalidValue,
                        "-format template must contain \"%_g\"\n",
                    ));
                }
                inv.format = Some(fmt);
            }
            "-unique" => inv.unique_check = false,
            "+tty" => inv.assume_ttys = true,
            "-pedantic" => inv.pedantic = true,
            "-permissive" => inv.permissive = true,
            "-strict" => inv.fail_strict = Some(true),
            "+strict" => inv.fail_strict = Some(false),
            "-backup" => {
                let v = next_value(args, &mut idx, "-backup")?;
                inv.backup = Some(match v.as_str() {
                    "max" => BackupMode::Depth(MAX_BACKUP_DEPTH),
                    "sync" => BackupMode::Sync,
                    n => {
                        let depth: u32 = n.parse().map_err(|_| {
                            ClapError::raw(ErrorKind::InvalidValue, "-backup expects 0..32, \"max\", or \"sync\"\n")
                        })?;
                        if depth > MAX_BACKUP_DEPTH {
                            return Err(ClapError::raw(
                                ErrorKind::InvalidValue,
                                "-backup depth exceeds the maximum of 32\n",
                            ));
                        }
                        BackupMode::Depth(depth)
                    }
                });
            }
            "-recover" => inv.recover = true,
            "-AutoRecover" => inv.recover_auto = true,
            "-trace" => inv.trace_path = Some(PathBuf::from(next_value(args, &mut idx, "-trace")?)),
            "-f" => inv.config_path = Some(PathBuf::from(next_value(args, &mut idx, "-f")?)),
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(ClapError::raw(
                    ErrorKind::UnknownArgument,
                    format!("unrecognized option '{other}'\n"),
                ));
            }
            path => {
                inv.infiles.push(InfileArg {
                    source: InfileSource::Path(PathBuf::from(path)),
                    read_write: mode_read_write,
                    create: mode_create,
                });
            }
        }
        idx += 1;
    }

    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_path_is_a_read_write_infile_by_default() {
        let inv = parse_args(&args(&["data.bin"])).unwrap();
        assert_eq!(inv.infiles.len(), 1);
        assert!(inv.infiles[0].read_write);
        assert_eq!(inv.infiles[0].source, InfileSource::Path(PathBuf::from("data.bin")));
    }

    #[test]
    fn dash_r_applies_only_to_subsequent_infiles() {
        let inv = parse_args(&args(&["a.bin", "-r", "b.bin"])).unwrap();
        assert!(inv.infiles[0].read_write);
        assert!(!inv.infiles[1].read_write);
    }

    #[test]
    fn dash_d_opens_a_descriptor_infile() {
        let inv = parse_args(&args(&["-d", "3"])).unwrap();
        assert_eq!(inv.infiles[0].source, InfileSource::Fd(3));
    }

    #[test]
    fn dash_x_captures_the_batch_command_string() {
        let inv = parse_args(&args(&["-x", "0:max", "a.bin"])).unwrap();
        assert_eq!(inv.command.as_deref(), Some("0:max"));
        assert_eq!(inv.infiles.len(), 1);
    }

    #[test]
    fn dash_s_and_dash_l_parse_hex_and_decimal() {
        let inv = parse_args(&args(&["-s", "0x10", "-l", "16"])).unwrap();
        assert_eq!(inv.start, Some(0x10));
        assert_eq!(inv.len, Some(16));
    }

    #[test]
    fn dash_backup_rejects_depth_above_max() {
        let err = parse_args(&args(&["-backup", "99"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn dash_backup_accepts_max_and_sync() {
        let inv = parse_args(&args(&["-backup", "max"])).unwrap();
        assert_eq!(inv.backup, Some(BackupMode::Depth(MAX_BACKUP_DEPTH)));
        let inv = parse_args(&args(&["-backup", "sync"])).unwrap();
        assert_eq!(inv.backup, Some(BackupMode::Sync));
    }

    #[test]
    fn double_dash_ends_option_processing() {
        let inv = parse_args(&args(&["-r", "--", "-oddname"])).unwrap();
        assert_eq!(inv.infiles[0].source, InfileSource::Path(PathBuf::from("-oddname")));
        assert!(!inv.infiles[0].read_write);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = parse_args(&args(&["-bogus"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn program_name_aliases_set_defaults() {
        let mut inv = Invocation::default();
        apply_program_name_defaults("hexview", &mut inv);
        assert_eq!(inv.allow_ik, Some(false));

        let mut inv = Invocation::default();
        apply_program_name_defaults("hexdump", &mut inv);
        assert!(inv.do_dump);
    }
}
