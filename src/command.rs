//! Command Parser (spec.md §4.3): turns one line of input text into a
//! typed [`ParsedCommand`], using the Filezone Parser and Octet Codec to
//! realize arguments, and checking the legality rules (space-before-
//! argument, seekability, write-permission, forbidden combinations).

use crate::codec::{text_to_octets, ConvertedLiteral, TextEncoding};
use crate::error::HexpeekError;
use crate::filezone::{parse_filezone, FileZoneContext, RawFileZone};
use crate::settings::Settings;

/// Extends [`FileZoneContext`] with the bits the command parser needs that
/// the filezone grammar itself does not: per-file write permission and a
/// settings handle for command defaults and legality checks.
pub trait CommandContext: FileZoneContext {
    fn settings(&self) -> &Settings;
    fn is_read_write(&self, fi: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingToggle {
    Autoskip,
    Diffskip,
    Ruler,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Quit,
    Stop,
    Help,
    Files,
    Reset(Option<usize>),
    ShowSettings,
    SetEndian(bool),
    SetHexCase(bool),
    SetBits,
    SetLineArg(LineArgKind, i64),
    SetMargin(String),
    SetScalar(i64),
    Toggle(SettingToggle, bool),
    SetText(Option<TextEncoding>, bool),
    Print { verbose: bool },
    Offset,
    Search,
    Diff,
    DiffSearch,
    Replace,
    Insert,
    Kill,
    Ops,
    Undo(Option<u32>),
    PageForward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineArgKind {
    PrintDefaultLen,
    SearchDefaultLen,
    LineWidth,
    GroupWidth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub origcmd: String,
    pub kind: CommandKind,
    pub target_fz: Option<RawFileZone>,
    pub pre_increment: bool,
    pub post_increment: bool,
    pub diff_search: bool,
    pub arg_text: Option<String>,
    pub arg_converted: Option<ConvertedLiteral>,
    /// Second filezone of a `~`/`/~` diff command; unused by every other
    /// kind.
    pub other_fz: Option<RawFileZone>,
}

/// Split `"word rest"` on the first space; `rest` is `None` when there is
/// no space at all, `Some("")` when the line ends right at the space.
fn split_first_word(s: &str) -> (&str, Option<&str>) {
    match s.find(' ') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    }
}

/// Every literal word the dispatch `match` below recognizes. Checked before
/// treating a hex-digit lead as a bare filezone offset, since several of
/// these (`bits`, `cols`, `diff`, `delete`, `endianb`, `endianl`,
/// `autoskip`, `diffskip`, `files`) themselves begin with a hex-digit
/// letter.
const KEYWORDS: &[&str] = &[
    "diff", "quit", "q", "stop", "help", "h", "files", "reset", "settings",
    "endianb", "endianl", "hexl", "hexu", "bits", "rlen", "slen", "line",
    "cols", "group", "margin", "scalar", "prefix", "+prefix", "autoskip",
    "+autoskip", "diffskip", "+diffskip", "ruler", "+ruler", "text", "+text",
    "print", "p", "pv", "v", "offset", "replace", "r", "insert", "i", "kill",
    "k", "delete", "ops", "undo", "u",
];

fn starts_with_keyword(s: &str) -> bool {
    let (word, _) = split_first_word(s);
    KEYWORDS.contains(&word)
}

/// True if `s` begins with a bare (no `$`/`@`/`,` marker) filezone offset: a
/// leading `-`, hex digit, or the `len` literal, mirroring the original's
/// `startOfFz`. Checked only once a known command keyword has been ruled
/// out, since the keyword test above takes priority.
fn is_bare_offset_lead(s: &str) -> bool {
    if starts_with_keyword(s) {
        return false;
    }
    matches!(s.chars().next(), Some(c) if c == '-' || c.is_ascii_hexdigit()) || s.starts_with("len")
}

/// True if `s` begins a filezone: either an explicit `$`/`@`/`,` marker, or
/// (per `startOfFz`) a bare offset with none of those markers.
fn is_filezone_lead(s: &str) -> bool {
    matches!(s.chars().next(), Some('$') | Some('@') | Some(',')) || is_bare_offset_lead(s)
}

fn require_no_arg(word: &str, rest: Option<&str>) -> Result<(), HexpeekError> {
    if rest.is_some() {
        return Err(HexpeekError::user(format!(
            "'{word}' does not take an argument"
        )));
    }
    Ok(())
}

fn require_arg<'a>(word: &str, rest: Option<&'a str>) -> Result<&'a str, HexpeekError> {
    match rest {
        Some(r) if !r.is_empty() => Ok(r),
        _ => Err(HexpeekError::user(format!("'{word}' requires an argument"))),
    }
}

fn parse_bool_flag(word: &str) -> (bool, &str) {
    if let Some(rest) = word.strip_prefix('+') {
        (false, rest)
    } else {
        (true, word)
    }
}

fn parse_i64(text: &str) -> Result<i64, HexpeekError> {
    text.parse::<i64>()
        .or_else(|_| i64::from_str_radix(text.trim_start_matches("0x"), 16))
        .map_err(|_| HexpeekError::user(format!("malformed number: {text}")))
}

/// Parse one input line into a [`ParsedCommand`] (spec.md §4.3). Returns a
/// `UserError` for any malformed or ambiguous command.
pub fn parse_command(input: &str, ctx: &dyn CommandContext) -> Result<ParsedCommand, HexpeekError> {
    let origcmd = input.to_string();
    let trimmed = input.trim_end_matches(['\n', '\r']).trim_start();

    if trimmed.is_empty() {
        return Ok(ParsedCommand {
            origcmd,
            kind: CommandKind::PageForward,
            target_fz: None,
            pre_increment: true,
            post_increment: false,
            diff_search: false,
            arg_text: None,
            arg_converted: None,
            other_fz: None,
        });
    }

    let mut rest = trimmed;
    let pre_increment = if let Some(stripped) = rest.strip_prefix('+') {
        if is_filezone_lead(stripped) {
            rest = stripped;
            true
        } else {
            false
        }
    } else {
        false
    };

    let has_filezone_lead = is_filezone_lead(rest);

    let (target_fz, mut post_increment, remainder) = if has_filezone_lead {
        let (fz, after) = parse_filezone(rest, ctx)?;
        let (post, after2) = if let Some(stripped) = after.strip_prefix('+') {
            (true, stripped)
        } else {
            (false, after)
        };
        (Some(fz), post, after2)
    } else {
        (None, false, rest)
    };

    let remainder = remainder.trim_start();

    if remainder.is_empty() {
        if target_fz.is_some() {
            return Ok(ParsedCommand {
                origcmd,
                kind: CommandKind::Print { verbose: false },
                target_fz,
                pre_increment,
                post_increment,
                diff_search: false,
                arg_text: None,
                arg_converted: None,
                other_fz: None,
            });
        }
        return Err(HexpeekError::user("empty command"));
    }

    if let Some(pat) = remainder.strip_prefix('~') {
        return build_diff(origcmd, target_fz, pre_increment, post_increment, pat, ctx, false);
    }
    if let Some(pat) = remainder.strip_prefix("/~") {
        return build_diff(origcmd, target_fz, pre_increment, post_increment, pat, ctx, true);
    }
    if let Some(pat) = remainder.strip_prefix('/') {
        return Ok(ParsedCommand {
            origcmd,
            kind: CommandKind::Search,
            target_fz,
            pre_increment,
            post_increment,
            diff_search: false,
            arg_text: Some(pat.to_string()),
            arg_converted: Some(text_to_octets(pat, ctx.settings().mode(), &ctx.settings().group_delims(), true)?),
            other_fz: None,
        });
    }

    let (word, arg_rest) = split_first_word(remainder);

    let kind = match word {
        "diff" if !ctx.settings().permissive => {
            return Err(HexpeekError::user(
                "'diff' is ambiguous; use 'd i ff' or the '~' diff operator",
            ))
        }
        "quit" | "q" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Quit
        }
        "stop" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Stop
        }
        "help" | "h" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Help
        }
        "files" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Files
        }
        "reset" => {
            let fi = match arg_rest {
                None => None,
                Some(a) => Some(
                    a.strip_prefix('$')
                        .unwrap_or(a)
                        .parse::<usize>()
                        .map_err(|_| HexpeekError::user("malformed file index"))?,
                ),
            };
            CommandKind::Reset(fi)
        }
        "settings" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::ShowSettings
        }
        "endianb" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::SetEndian(true)
        }
        "endianl" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::SetEndian(false)
        }
        "hexl" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::SetHexCase(false)
        }
        "hexu" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::SetHexCase(true)
        }
        "bits" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::SetBits
        }
        "rlen" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetLineArg(LineArgKind::PrintDefaultLen, parse_i64(a)?)
        }
        "slen" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetLineArg(LineArgKind::SearchDefaultLen, parse_i64(a)?)
        }
        "line" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetLineArg(LineArgKind::LineWidth, parse_i64(a)?)
        }
        "cols" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetLineArg(LineArgKind::LineWidth, parse_i64(a)?)
        }
        "group" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetLineArg(LineArgKind::GroupWidth, parse_i64(a)?)
        }
        "margin" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetMargin(a.to_string())
        }
        "scalar" => {
            let a = require_arg(word, arg_rest)?;
            CommandKind::SetScalar(parse_i64(a)?)
        }
        "prefix" | "+prefix" => {
            require_no_arg(word, arg_rest)?;
            let (on, _) = parse_bool_flag(word);
            CommandKind::Toggle(SettingToggle::Prefix, on)
        }
        "autoskip" | "+autoskip" => {
            require_no_arg(word, arg_rest)?;
            let (on, _) = parse_bool_flag(word);
            CommandKind::Toggle(SettingToggle::Autoskip, on)
        }
        "diffskip" | "+diffskip" => {
            require_no_arg(word, arg_rest)?;
            let (on, _) = parse_bool_flag(word);
            CommandKind::Toggle(SettingToggle::Diffskip, on)
        }
        "ruler" | "+ruler" => {
            require_no_arg(word, arg_rest)?;
            let (on, _) = parse_bool_flag(word);
            CommandKind::Toggle(SettingToggle::Ruler, on)
        }
        "text" | "+text" => {
            let (on, _) = parse_bool_flag(word);
            let enc = match arg_rest {
                None => None,
                Some(a) => match a.strip_prefix('=') {
                    Some("ascii") => Some(TextEncoding::Ascii),
                    Some("ebcdic") => Some(TextEncoding::Ebcdic),
                    _ => return Err(HexpeekError::user("invalid text encoding")),
                },
            };
            CommandKind::SetText(enc, on)
        }
        "print" | "p" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Print { verbose: false }
        }
        "pv" | "v" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Print { verbose: true }
        }
        "offset" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Offset
        }
        "replace" | "r" => {
            let a = require_arg(word, arg_rest)?;
            return build_write_command(origcmd, CommandKind::Replace, target_fz, pre_increment, &mut post_increment, a, ctx, false);
        }
        "insert" | "i" => {
            let a = require_arg(word, arg_rest)?;
            return build_write_command(origcmd, CommandKind::Insert, target_fz, pre_increment, &mut post_increment, a, ctx, true);
        }
        "kill" | "k" | "delete" => {
            require_no_arg(word, arg_rest)?;
            if pre_increment || post_increment {
                return Err(HexpeekError::user("kill does not accept '+'"));
            }
            CommandKind::Kill
        }
        "ops" => {
            require_no_arg(word, arg_rest)?;
            CommandKind::Ops
        }
        "undo" | "u" => {
            let depth = match arg_rest {
                Some(a) => Some(
                    a.parse::<u32>()
                        .map_err(|_| HexpeekError::user("malformed undo depth"))?,
                ),
                None => None,
            };
            CommandKind::Undo(depth)
        }
        other => {
            return Err(HexpeekError::user(format!("unrecognized command '{other}'")))
        }
    };

    Ok(ParsedCommand {
        origcmd,
        kind,
        target_fz,
        pre_increment,
        post_increment,
        diff_search: false,
        arg_text: None,
        arg_converted: None,
        other_fz: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_diff(
    origcmd: String,
    target_fz: Option<RawFileZone>,
    pre_increment: bool,
    post_increment: bool,
    pat: &str,
    ctx: &dyn CommandContext,
    is_search: bool,
) -> Result<ParsedCommand, HexpeekError> {
    // With a zone already given before the operator (`$0@0,3/~$1@0,3`),
    // `pat` names only the right-hand side. With none (`/~$0@0,3~$1@0,3`),
    // `pat` carries both sides joined by `~`, and the left zone becomes this
    // command's own target.
    let (left_fz, other_fz) = match target_fz {
        Some(left_fz) => {
            let (other_fz, remainder) = parse_filezone(pat, ctx)?;
            if !remainder.is_empty() {
                return Err(HexpeekError::user("trailing text after diff filezone"));
            }
            (left_fz, other_fz)
        }
        None => {
            let (left_fz, remainder) = parse_filezone(pat, ctx)?;
            let Some(remainder) = remainder.strip_prefix('~') else {
                return Err(HexpeekError::user("diff operator requires a second filezone"));
            };
            let (other_fz, remainder) = parse_filezone(remainder, ctx)?;
            if !remainder.is_empty() {
                return Err(HexpeekError::user("trailing text after diff filezone"));
            }
            (left_fz, other_fz)
        }
    };
    Ok(ParsedCommand {
        origcmd,
        kind: if is_search { CommandKind::DiffSearch } else { CommandKind::Diff },
        target_fz: Some(left_fz),
        pre_increment,
        post_increment,
        diff_search: is_search,
        arg_text: Some(pat.to_string()),
        arg_converted: None,
        other_fz: None,
    }
    .with_other_zone(other_fz))
}

impl ParsedCommand {
    /// Stash the diff's second filezone in `arg_converted`'s slot isn't
    /// appropriate (different type), so diff commands instead carry it via
    /// this dedicated field, set after construction to keep the match arm
    /// above readable.
    fn with_other_zone(mut self, other: RawFileZone) -> Self {
        self.other_fz = Some(other);
        self
    }
}

#[allow(clippy::too_many_arguments)]
fn build_write_command(
    origcmd: String,
    kind: CommandKind,
    target_fz: Option<RawFileZone>,
    pre_increment: bool,
    post_increment: &mut bool,
    arg: &str,
    ctx: &dyn CommandContext,
    allow_source_zone: bool,
) -> Result<ParsedCommand, HexpeekError> {
    let Some(fz) = target_fz else {
        return Err(HexpeekError::user(format!("{:?} requires a filezone", kind)));
    };
    if !ctx.is_read_write(fz.fi) {
        return Err(HexpeekError::user("command requires a read-write file"));
    }
    if pre_increment || *post_increment {
        return Err(HexpeekError::user("this command does not accept '+'"));
    }

    let leads_with_zone = matches!(arg.chars().next(), Some(c) if c == '$' || c == '@' || c == ',');
    let (arg_text, arg_converted) = if allow_source_zone && leads_with_zone {
        (Some(arg.to_string()), None)
    } else {
        let converted = text_to_octets(arg, ctx.settings().mode(), &ctx.settings().group_delims(), false)?;
        (Some(arg.to_string()), Some(converted))
    };

    Ok(ParsedCommand {
        origcmd,
        kind,
        target_fz: Some(fz),
        pre_increment: false,
        post_increment: false,
        diff_search: false,
        arg_text,
        arg_converted,
        other_fz: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filezone::ScalarBase;
    use crate::offset::Offset;

    struct MockCtx {
        settings: Settings,
        open: usize,
        rw: [bool; 2],
    }

    impl Default for MockCtx {
        fn default() -> Self {
            MockCtx {
                settings: Settings::default(),
                open: 1,
                rw: [true, true],
            }
        }
    }

    impl FileZoneContext for MockCtx {
        fn open_file_count(&self) -> usize {
            self.open
        }
        fn current_offset(&self, _fi: usize) -> Option<Offset> {
            Some(0)
        }
        fn file_size(&self, _fi: usize) -> Result<Offset, HexpeekError> {
            Ok(16)
        }
        fn is_seekable(&self, _fi: usize) -> bool {
            true
        }
        fn infer(&self) -> bool {
            self.settings.infer
        }
        fn scalar_base(&self) -> ScalarBase {
            self.settings.scalar_base
        }
    }

    impl CommandContext for MockCtx {
        fn settings(&self) -> &Settings {
            &self.settings
        }
        fn is_read_write(&self, fi: usize) -> bool {
            self.rw[fi]
        }
    }

    #[test]
    fn empty_line_means_page_forward() {
        let ctx = MockCtx::default();
        let cmd = parse_command("", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::PageForward);
        assert!(cmd.pre_increment);
    }

    #[test]
    fn bare_filezone_is_implicit_print() {
        let ctx = MockCtx::default();
        let cmd = parse_command("@0,4", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::Print { verbose: false });
        assert!(cmd.target_fz.is_some());
    }

    #[test]
    fn bare_word_diff_is_rejected_as_ambiguous() {
        let ctx = MockCtx::default();
        assert!(parse_command("diff", &ctx).is_err());
    }

    #[test]
    fn permissive_allows_bare_diff_word() {
        let mut ctx = MockCtx::default();
        ctx.settings.permissive = true;
        // "diff" alone still has no target filezone/arg structure to build a
        // Diff command from in this grammar; permissive only lifts the
        // ambiguity rejection, it falls through to "unrecognized command".
        let err = parse_command("diff", &ctx).unwrap_err();
        match err {
            HexpeekError::User(msg) => assert!(msg.contains("unrecognized")),
            _ => panic!("expected a user error"),
        }
    }

    #[test]
    fn replace_converts_literal_argument() {
        let ctx = MockCtx::default();
        let cmd = parse_command("@0,3 r aabbcc", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::Replace);
        let converted = cmd.arg_converted.unwrap();
        assert_eq!(converted.octets, vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn replace_on_readonly_file_is_rejected() {
        let mut ctx = MockCtx::default();
        ctx.rw[0] = false;
        assert!(parse_command("@0,3 r aabbcc", &ctx).is_err());
    }

    #[test]
    fn kill_rejects_plus_forms() {
        let ctx = MockCtx::default();
        assert!(parse_command("+@0,3 k", &ctx).is_err());
    }

    #[test]
    fn undo_parses_optional_depth() {
        let ctx = MockCtx::default();
        let cmd = parse_command("undo 3", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::Undo(Some(3)));
        let cmd2 = parse_command("u", &ctx).unwrap();
        assert_eq!(cmd2.kind, CommandKind::Undo(None));
    }

    #[test]
    fn diff_operator_captures_both_zones() {
        let ctx = MockCtx::default();
        let cmd = parse_command("@0,3~@4,3", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::Diff);
        assert!(cmd.other_fz.is_some());
    }

    #[test]
    fn diff_search_with_no_leading_zone_splits_both_sides_from_pattern() {
        let ctx = MockCtx::default();
        let cmd = parse_command("/~@0,3~@4,3", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::DiffSearch);
        let fz = cmd.target_fz.unwrap();
        assert_eq!(fz.start, 0);
        assert_eq!(fz.len, Some(3));
        let other = cmd.other_fz.unwrap();
        assert_eq!(other.start, 4);
        assert_eq!(other.len, Some(3));
    }

    #[test]
    fn bare_offset_with_no_marker_is_a_filezone_lead() {
        let ctx = MockCtx::default();
        let cmd = parse_command("0,3 r aabbcc", &ctx).unwrap();
        assert_eq!(cmd.kind, CommandKind::Replace);
        let fz = cmd.target_fz.unwrap();
        assert_eq!(fz.start, 0);
        assert_eq!(fz.len, Some(3));
    }

    #[test]
    fn keyword_beginning_with_hex_digit_letter_is_not_mistaken_for_an_offset() {
        let ctx = MockCtx::default();
        let cmd = parse_command("cols 5", &ctx).unwrap();
        match cmd.kind {
            CommandKind::SetLineArg(LineArgKind::LineWidth, n) => assert_eq!(n, 5),
            other => panic!("expected SetLineArg(LineWidth, _), got {other:?}"),
        }
    }

    #[test]
    fn quit_rejects_trailing_argument() {
        let ctx = MockCtx::default();
        assert!(parse_command("quit now", &ctx).is_err());
    }
}
