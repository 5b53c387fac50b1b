//! Pretty Printer (spec.md §4.7): line/verbose/large/diff renderers,
//! autoskip, ruler, text column, and pack mode (the inverse of print).

use crate::codec::{encode_octet, endianize, text_to_octets, Tables};
use crate::error::HexpeekError;
use crate::offset::Offset;
use crate::settings::{Margin, Settings};

const LARGE_LINE_THRESHOLD: Offset = 0x10000;

fn format_margin(settings: &Settings, offset: Offset) -> String {
    match settings.margin {
        Margin::Off => String::new(),
        Margin::Digits(n) => format!("{:0width$x}: ", offset, width = n as usize),
        Margin::Full => format!("{:016x}: ", offset),
    }
}

/// Render one line's octets, applying the configured group delimiters and
/// (when little-endian) reversing each group before rendering.
fn render_groups(data: &[u8], settings: &Settings, tables: &Tables) -> String {
    let mut buf = data.to_vec();
    let gw = std::cmp::max(settings.group_width(), 1) as usize;
    if !settings.endian_big {
        endianize(&mut buf, gw);
    }
    let mut s = String::new();
    s.push_str(&settings.group_pre[0]);
    for (gi, chunk) in buf.chunks(gw).enumerate() {
        if gi > 0 {
            s.push_str(&settings.group_pre[1]);
        }
        for &b in chunk {
            s.push_str(tables.render_octet(settings.mode(), settings.hex_case, b));
        }
    }
    s.push_str(&settings.group_term);
    s
}

/// The two-space-prefixed text column (DESIGN NOTES §9: the separator lets
/// `pack` recognize and strip it unambiguously).
fn render_text_column(data: &[u8], settings: &Settings) -> String {
    if !settings.print_text {
        return String::new();
    }
    let mut s = String::from("  ");
    for &b in data {
        s.push(encode_octet(settings.text_encoding, b));
    }
    s
}

/// Build one content line (groups + optional text column, no margin).
fn content_line(data: &[u8], settings: &Settings, tables: &Tables, with_text: bool) -> String {
    let mut s = render_groups(data, settings, tables);
    if with_text {
        s.push_str(&render_text_column(data, settings));
    }
    s
}

/// Collapse runs of identical consecutive content lines to a single `*`,
/// except the final line is always rendered in full (one-line lookahead,
/// spec.md §4.7).
fn apply_autoskip(lines: &[String]) -> Vec<Option<usize>> {
    // Returns, for each output row, Some(source_index) to render normally,
    // or None for a collapsed "*" row.
    let mut out = Vec::new();
    let mut prev: Option<&str> = None;
    let mut in_run = false;
    for (i, line) in lines.iter().enumerate() {
        let is_last = i + 1 == lines.len();
        if !is_last && prev == Some(line.as_str()) {
            if !in_run {
                out.push(None);
                in_run = true;
            }
            prev = Some(line.as_str());
            continue;
        }
        in_run = false;
        out.push(Some(i));
        prev = Some(line.as_str());
    }
    out
}

fn render_dump(
    data: &[u8],
    start_offset: Offset,
    settings: &Settings,
    tables: &Tables,
    allow_autoskip: bool,
    with_text: bool,
) -> String {
    let line_width = std::cmp::max(settings.line_width(), 1) as usize;
    let content: Vec<String> = data
        .chunks(line_width)
        .map(|chunk| content_line(chunk, settings, tables, with_text))
        .collect();

    let mut out = String::new();
    if settings.ruler {
        out.push_str(&render_ruler(settings));
        out.push_str(&settings.line_term);
    }

    let plan = if settings.autoskip && allow_autoskip {
        apply_autoskip(&content)
    } else {
        (0..content.len()).map(Some).collect()
    };

    for entry in plan {
        match entry {
            Some(i) => {
                let offset = start_offset + (i as Offset) * (line_width as Offset);
                out.push_str(&format_margin(settings, offset));
                out.push_str(&content[i]);
            }
            None => out.push('*'),
        }
        out.push_str(&settings.line_term);
    }
    out
}

/// A simple column ruler above the dump, marking group boundaries.
fn render_ruler(settings: &Settings) -> String {
    let line_width = std::cmp::max(settings.line_width(), 1);
    let per_octet = settings.mode().chars_per_octet();
    let margin_width = match settings.margin {
        Margin::Off => 0,
        Margin::Digits(n) => n as usize + 2,
        Margin::Full => 18,
    };
    let mut ruler = " ".repeat(margin_width);
    for i in 0..line_width {
        ruler.push_str(&format!("{:>w$x}", i, w = per_octet));
        ruler.push(' ');
    }
    ruler
}

/// Line-oriented renderer for line widths at or below 64 KiB, with autoskip
/// and a text column (spec.md §4.7 `show_normal`).
pub fn show_normal(data: &[u8], start_offset: Offset, settings: &Settings, tables: &Tables) -> String {
    render_dump(data, start_offset, settings, tables, true, true)
}

/// Renderer used when the configured line width exceeds 64 KiB: no
/// autoskip, no text column (spec.md §4.7 `show_large`).
pub fn show_large(data: &[u8], start_offset: Offset, settings: &Settings, tables: &Tables) -> String {
    render_dump(data, start_offset, settings, tables, false, false)
}

/// Dispatch to `show_normal` or `show_large` based on the configured line
/// width, matching the original's selection rule.
pub fn show(data: &[u8], start_offset: Offset, settings: &Settings, tables: &Tables) -> String {
    if settings.line_width() > LARGE_LINE_THRESHOLD {
        show_large(data, start_offset, settings, tables)
    } else {
        show_normal(data, start_offset, settings, tables)
    }
}

/// One octet per line with hex/dec/oct/bits/high-bit/low-bit/popcount/text
/// (spec.md §4.7 `show_verbose`).
pub fn show_verbose(data: &[u8], start_offset: Offset, settings: &Settings) -> String {
    let mut out = String::new();
    for (i, &b) in data.iter().enumerate() {
        let offset = start_offset + i as Offset;
        out.push_str(&format_margin(settings, offset));
        out.push_str(&format!(
            "hex={:02x} dec={:>3} oct={:>3o} bits={:08b} hi={} lo={} pop={:>2} '{}'",
            b,
            b,
            b,
            b,
            (b >> 7) & 1,
            b & 1,
            b.count_ones(),
            encode_octet(settings.text_encoding, b),
        ));
        out.push_str(&settings.line_term);
    }
    out
}

/// Diff renderer: positions where `a[i] == b[i]` render as underscores
/// (one underscore per rendered character of that octet), everything else
/// renders `a`'s value. Returns the rendered text alongside every
/// differing offset relative to `start_offset` (spec.md §8 property 4/S4).
pub fn show_diff(
    a: &[u8],
    b: &[u8],
    start_offset: Offset,
    settings: &Settings,
    tables: &Tables,
) -> (String, Vec<Offset>) {
    let len = std::cmp::min(a.len(), b.len());
    let mut diffs = Vec::new();
    let per_octet = settings.mode().chars_per_octet();
    let underscores = "_".repeat(per_octet);

    let line_width = std::cmp::max(settings.line_width(), 1) as usize;
    let mut out = String::new();
    for (line_idx, chunk_start) in (0..len).step_by(line_width).enumerate() {
        let chunk_end = std::cmp::min(chunk_start + line_width, len);
        let offset = start_offset + (line_idx as Offset) * (line_width as Offset);
        out.push_str(&format_margin(settings, offset));
        out.push_str(&settings.group_pre[0]);
        let gw = std::cmp::max(settings.group_width(), 1) as usize;
        for (gi, g_start) in (chunk_start..chunk_end).step_by(gw).enumerate() {
            if gi > 0 {
                out.push_str(&settings.group_pre[1]);
            }
            let g_end = std::cmp::min(g_start + gw, chunk_end);
            for i in g_start..g_end {
                if a[i] == b[i] {
                    out.push_str(&underscores);
                } else {
                    out.push_str(tables.render_octet(settings.mode(), settings.hex_case, a[i]));
                    diffs.push(start_offset + i as Offset);
                }
            }
        }
        out.push_str(&settings.group_term);
        out.push_str(&settings.line_term);
    }
    (out, diffs)
}

/// Parse a previously rendered dump back into binary (spec.md §4.7 pack
/// mode, §8 property 4 round-trip). Requires `margin` be `Off` (sequential
/// positions from 0) or `Full` (explicit per-line offsets); any other
/// margin width cannot be parsed back unambiguously.
pub fn pack(text: &str, settings: &Settings) -> Result<Vec<u8>, HexpeekError> {
    match settings.margin {
        Margin::Digits(n) if n != 16 => {
            return Err(HexpeekError::user(
                "pack requires margin to be full (16) or disabled",
            ))
        }
        _ => {}
    }

    let mut out: Vec<u8> = Vec::new();
    let mut next_seq: Offset = 0;

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        if line.trim() == "*" {
            return Err(HexpeekError::user(
                "cannot pack a dump containing autoskip '*' lines",
            ));
        }
        if line.is_empty() {
            continue;
        }

        let (offset, rest) = match settings.margin {
            Margin::Full => {
                let (hex, rest) = line
                    .split_once(": ")
                    .ok_or_else(|| HexpeekError::user("malformed margin in packed input"))?;
                let off = Offset::from_str_radix(hex.trim(), 16)
                    .map_err(|_| HexpeekError::user("malformed margin offset"))?;
                (off, rest)
            }
            _ => (next_seq, line),
        };

        // Strip the text column: it always follows a "  " separator.
        let hex_part = match rest.find("  ") {
            Some(idx) => &rest[..idx],
            None => rest,
        };

        let converted = text_to_octets(hex_part, settings.mode(), &settings.group_delims(), false)?;
        if offset < out.len() as Offset {
            return Err(HexpeekError::user("packed input offsets go backwards"));
        }
        while (out.len() as Offset) < offset {
            out.push(0);
        }
        out.extend_from_slice(&converted.octets);
        next_seq = offset + converted.octets.len() as Offset;
    }

    Ok(out)
}
