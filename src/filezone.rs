//! Filezone Parser (spec.md §4.2): `$fi @ start , len` / `… : limit` / `len`
//! / `max`, with `@@` meaning current offset and negatives meaning
//! from-EOF.

use crate::error::HexpeekError;
use crate::offset::{Offset, OFFSET_MAX};

/// Scalar base for numeric fields (`Settings::scalar_base`): either a fixed
/// base of 16, or 0 for C-style `0x`/`0` prefix sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarBase {
    Hex,
    CStyle,
}

/// Everything the filezone parser needs to know about currently open files,
/// kept as a trait so this module does not depend on `Session`/`Infile`.
pub trait FileZoneContext {
    /// Number of infiles currently open (1 or 2).
    fn open_file_count(&self) -> usize;
    /// Current offset of file `fi`, or `None` if unset.
    fn current_offset(&self, fi: usize) -> Option<Offset>;
    /// Current size of file `fi`.
    fn file_size(&self, fi: usize) -> Result<Offset, HexpeekError>;
    /// Whether file `fi` supports seeking (and thus negative/from-EOF
    /// offsets).
    fn is_seekable(&self, fi: usize) -> bool;
    /// `Settings::infer`: whether an omitted `$fi` defaults to 0 even with
    /// two files open.
    fn infer(&self) -> bool;
    fn scalar_base(&self) -> ScalarBase;
}

/// A filezone before command-specific length defaulting has been applied.
/// `len` is `None` when the command text supplied neither `,len` nor
/// `:limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFileZone {
    pub fi: usize,
    pub start: Offset,
    pub len: Option<Offset>,
    pub tolerate_eof: bool,
}

/// A filezone after inference: `start` is non-negative, `len` is
/// non-negative (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileZone {
    pub fi: usize,
    pub start: Offset,
    pub len: Offset,
    pub tolerate_eof: bool,
}

impl RawFileZone {
    /// Apply a command-specific default length when none was given in the
    /// text, producing a finalized [`FileZone`].
    pub fn finalize(self, default_len: Offset) -> FileZone {
        FileZone {
            fi: self.fi,
            start: self.start,
            len: self.len.unwrap_or(default_len),
            tolerate_eof: self.tolerate_eof,
        }
    }
}

/// Parse a number with an optional leading `-` in the given scalar base,
/// returning the value and the remaining unparsed text.
fn parse_number<'a>(
    text: &'a str,
    base: ScalarBase,
) -> Result<(i64, &'a str), HexpeekError> {
    let mut rest = text;
    let negative = if let Some(stripped) = rest.strip_prefix('-') {
        rest = stripped;
        true
    } else {
        false
    };

    let (radix, rest2) = match base {
        ScalarBase::Hex => (16u32, rest),
        ScalarBase::CStyle => {
            if let Some(stripped) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
                (16u32, stripped)
            } else if rest.starts_with('0') && rest.len() > 1 {
                (8u32, &rest[1..])
            } else {
                (10u32, rest)
            }
        }
    };

    let digit_len = rest2
        .char_indices()
        .take_while(|(_, c)| c.is_digit(radix))
        .count();
    if digit_len == 0 {
        return Err(HexpeekError::user("malformed number"));
    }
    let digits = &rest2[..digit_len];
    let value = i64::from_str_radix(digits, radix)
        .map_err(|_| HexpeekError::user("malformed number: out of range"))?;
    let value = if negative { -value } else { value };
    Ok((value, &rest2[digit_len..]))
}

/// Resolve an offset field against the file size: non-negative values are
/// used verbatim, negative values are added to the file size (from-EOF).
/// Negative offsets on non-seekable files are rejected.
fn resolve_offset(
    value: i64,
    fi: usize,
    ctx: &dyn FileZoneContext,
) -> Result<Offset, HexpeekError> {
    if value >= 0 {
        return Ok(value);
    }
    if !ctx.is_seekable(fi) {
        return Err(HexpeekError::user(
            "negative offsets are not allowed on non-seekable files",
        ));
    }
    let size = ctx.file_size(fi)?;
    Ok(size + value)
}

/// True if `s` begins with a bare (no `@`) offset: a leading `-`, hex digit,
/// or the `len` literal. Mirrors the original's `startOfFz`, which lets an
/// offset appear with no leading marker at all.
fn is_offset_lead(s: &str) -> bool {
    matches!(s.chars().next(), Some(c) if c == '-' || c.is_ascii_hexdigit()) || s.starts_with("len")
}

/// Parse an offset field: either the `len` literal (the file's current
/// size) or a signed number resolved against the file size.
fn parse_offset_field<'a>(
    text: &'a str,
    fi: usize,
    ctx: &dyn FileZoneContext,
) -> Result<(Offset, &'a str), HexpeekError> {
    if let Some(rest) = text.strip_prefix("len") {
        return Ok((ctx.file_size(fi)?, rest));
    }
    let (value, rest) = parse_number(text, ctx.scalar_base())?;
    Ok((resolve_offset(value, fi, ctx)?, rest))
}

/// Parse one filezone starting at the front of `input`, returning the
/// parsed zone and the unconsumed remainder of `input`.
pub fn parse_filezone<'a>(
    input: &'a str,
    ctx: &dyn FileZoneContext,
) -> Result<(RawFileZone, &'a str), HexpeekError> {
    let mut rest = input;

    // ['$' HEX_INDEX]
    let fi = if let Some(stripped) = rest.strip_prefix('$') {
        let (value, r) = parse_number(stripped, ctx.scalar_base())?;
        rest = r;
        if value < 0 {
            return Err(HexpeekError::user("file index cannot be negative"));
        }
        value as usize
    } else if ctx.open_file_count() == 1 || ctx.infer() {
        0
    } else {
        return Err(HexpeekError::user(
            "ambiguous file index: specify $0 or $1",
        ));
    };

    // ['@' (HEX_OFFSET | '@')] or a bare (no '@') offset, per `startOfFz`.
    let mut tolerate_eof = false;
    let start = if let Some(stripped) = rest.strip_prefix('@') {
        if let Some(r) = stripped.strip_prefix('@') {
            rest = r;
            ctx.current_offset(fi).unwrap_or(0)
        } else if is_offset_lead(stripped) {
            let (value, r) = parse_offset_field(stripped, fi, ctx)?;
            rest = r;
            value
        } else {
            return Err(HexpeekError::user("invalid file offset after '@'"));
        }
    } else if is_offset_lead(rest) {
        let (value, r) = parse_offset_field(rest, fi, ctx)?;
        rest = r;
        value
    } else if ctx.infer() {
        ctx.current_offset(fi).unwrap_or(0)
    } else {
        return Err(HexpeekError::user(
            "ambiguous file offset: specify an explicit offset",
        ));
    };

    // [ ',' HEX_LEN | ':' LIMIT ]
    let len = if let Some(stripped) = rest.strip_prefix(',') {
        let (value, r) = parse_number(stripped, ctx.scalar_base())?;
        rest = r;
        Some(value)
    } else if let Some(stripped) = rest.strip_prefix(':') {
        if let Some(r) = stripped.strip_prefix("max") {
            rest = r;
            tolerate_eof = true;
            Some(OFFSET_MAX)
        } else if let Some(r) = stripped.strip_prefix("len") {
            rest = r;
            let size = ctx.file_size(fi)?;
            Some(size - start)
        } else {
            let (value, r) = parse_number(stripped, ctx.scalar_base())?;
            rest = r;
            let limit = resolve_offset(value, fi, ctx)?;
            Some(limit - start)
        }
    } else {
        None
    };

    Ok((
        RawFileZone {
            fi,
            start,
            len,
            tolerate_eof,
        },
        rest,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct MockCtx {
        open: usize,
        cur: [Option<Offset>; 2],
        size: [Offset; 2],
        seekable: [bool; 2],
        infer: bool,
        base: ScalarBase,
        calls: Cell<usize>,
    }

    impl Default for MockCtx {
        fn default() -> Self {
            MockCtx {
                open: 1,
                cur: [Some(0), Some(0)],
                size: [8, 8],
                seekable: [true, true],
                infer: true,
                base: ScalarBase::Hex,
                calls: Cell::new(0),
            }
        }
    }

    impl FileZoneContext for MockCtx {
        fn open_file_count(&self) -> usize {
            self.open
        }
        fn current_offset(&self, fi: usize) -> Option<Offset> {
            self.calls.set(self.calls.get() + 1);
            self.cur[fi]
        }
        fn file_size(&self, fi: usize) -> Result<Offset, HexpeekError> {
            Ok(self.size[fi])
        }
        fn is_seekable(&self, fi: usize) -> bool {
            self.seekable[fi]
        }
        fn infer(&self) -> bool {
            self.infer
        }
        fn scalar_base(&self) -> ScalarBase {
            self.base
        }
    }

    #[test]
    fn parses_full_form() {
        let ctx = MockCtx::default();
        let (fz, rest) = parse_filezone("$0@0,3", &ctx).unwrap();
        assert_eq!(fz.fi, 0);
        assert_eq!(fz.start, 0);
        assert_eq!(fz.len, Some(3));
        assert_eq!(rest, "");
    }

    #[test]
    fn infers_missing_file_index() {
        let ctx = MockCtx::default();
        let (fz, _) = parse_filezone("@0,3", &ctx).unwrap();
        assert_eq!(fz.fi, 0);
    }

    #[test]
    fn double_at_means_current_offset() {
        let mut ctx = MockCtx::default();
        ctx.cur[0] = Some(5);
        let (fz, _) = parse_filezone("@@,2", &ctx).unwrap();
        assert_eq!(fz.start, 5);
    }

    #[test]
    fn negative_offset_is_from_eof() {
        let ctx = MockCtx::default();
        let (fz, _) = parse_filezone("@-2,1", &ctx).unwrap();
        assert_eq!(fz.start, 6);
    }

    #[test]
    fn negative_offset_rejected_on_non_seekable() {
        let mut ctx = MockCtx::default();
        ctx.seekable[0] = false;
        assert!(parse_filezone("@-2,1", &ctx).is_err());
    }

    #[test]
    fn max_sets_len_and_tolerate_eof() {
        let ctx = MockCtx::default();
        let (fz, _) = parse_filezone("@0:max", &ctx).unwrap();
        assert_eq!(fz.len, Some(OFFSET_MAX));
        assert!(fz.tolerate_eof);
    }

    #[test]
    fn len_alias_means_to_eof() {
        let ctx = MockCtx::default();
        let (fz, _) = parse_filezone("@2:len", &ctx).unwrap();
        assert_eq!(fz.len, Some(6));
    }

    #[test]
    fn limit_form_computes_length() {
        let ctx = MockCtx::default();
        let (fz, _) = parse_filezone("@1:4", &ctx).unwrap();
        assert_eq!(fz.start, 1);
        assert_eq!(fz.len, Some(3));
    }

    #[test]
    fn ambiguous_file_index_rejected() {
        let mut ctx = MockCtx::default();
        ctx.open = 2;
        ctx.infer = false;
        assert!(parse_filezone("@0,1", &ctx).is_err());
    }

    #[test]
    fn unspecified_offset_defaults_to_current() {
        let mut ctx = MockCtx::default();
        ctx.cur[0] = None;
        let (fz, _) = parse_filezone(",2", &ctx).unwrap();
        assert_eq!(fz.start, 0);
    }

    #[test]
    fn cstyle_base_parses_prefixed_numbers() {
        let mut ctx = MockCtx::default();
        ctx.base = ScalarBase::CStyle;
        let (fz, _) = parse_filezone("@0x10,0x5", &ctx).unwrap();
        assert_eq!(fz.start, 0x10);
        assert_eq!(fz.len, Some(5));
    }
}
