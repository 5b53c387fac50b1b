//! Process-wide configuration (spec.md §3 `Settings`), expressed as a plain
//! value owned by `Session` rather than a global (spec.md §9 DESIGN NOTES).
//! An optional TOML config file supplies defaults the way the teacher
//! crate's `Config::load` does (`examples/asomers-fsx-rs/src/main.rs`).

use std::fs;
use std::path::Path;

use serde_derive::Deserialize;

use crate::codec::{DisplayMode, HexCase, TextEncoding};
use crate::error::HexpeekError;
use crate::filezone::ScalarBase;
use crate::offset::Offset;

pub const MAX_BACKUP_DEPTH: u32 = 32;
pub const DEFAULT_BACKUP_DEPTH: u32 = 8;
pub const TERMINAL_WIDTH: usize = 80;

/// `Settings::margin`: number of hex digits of margin offset shown, 0
/// disables it, `Full` means 16 digits (`HOFF_HEX_FULL_WIDTH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Margin {
    Off,
    Digits(u32),
    Full,
}

impl Margin {
    pub fn width(self) -> u32 {
        match self {
            Margin::Off => 0,
            Margin::Digits(n) => n,
            Margin::Full => 16,
        }
    }
}

/// Largest power-of-two octet count whose rendered hex line (2 chars/octet
/// plus one separating space per octet, plus an 8-digit margin and ": ")
/// fits within `TERMINAL_WIDTH` columns. Mirrors the original's
/// `outputWidth`-driven default line-width computation.
fn default_line_width(mode: DisplayMode) -> Offset {
    let per_octet = mode.chars_per_octet() + 1; // digits + one space
    let overhead = 8 + 2; // margin digits + ": "
    let mut best: Offset = 1;
    let mut n: Offset = 1;
    while n <= crate::offset::PAGE_SIZE {
        let width = overhead + (n as usize) * per_octet;
        if width > TERMINAL_WIDTH {
            break;
        }
        best = n;
        n *= 2;
    }
    best
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub scalar_base: ScalarBase,
    pub disp_mode: DisplayMode,
    pub hex_case: HexCase,
    pub mode_print_defs: [Offset; 2],
    pub mode_search_defs: [Offset; 2],
    pub mode_lines: [Offset; 2],
    pub mode_groups: [Offset; 2],
    pub endian_big: bool,
    pub margin: Margin,
    pub autoskip: bool,
    pub diffskip: bool,
    pub line_term: String,
    pub group_pre: [String; 2],
    pub group_term: String,
    pub print_text: bool,
    pub text_encoding: TextEncoding,
    pub ruler: bool,
    pub print_prefix: bool,
    pub allow_ik: bool,
    pub infer: bool,
    pub tolerate_eof: bool,
    pub assume_unique_infiles: bool,
    pub assume_ttys: bool,
    pub recover_interactive: bool,
    pub recover_auto: bool,
    pub backup_depth: u32,
    pub backup_sync: bool,
    pub permissive: bool,
    pub fail_strict: bool,
    pub editable_console: bool,
    pub command: Option<String>,
    pub do_pack: bool,
}

impl Settings {
    pub fn mode(&self) -> DisplayMode {
        self.disp_mode
    }

    pub fn print_default_len(&self) -> Offset {
        self.mode_print_defs[self.mode_index()]
    }

    pub fn search_default_len(&self) -> Offset {
        self.mode_search_defs[self.mode_index()]
    }

    pub fn line_width(&self) -> Offset {
        self.mode_lines[self.mode_index()]
    }

    pub fn group_width(&self) -> Offset {
        self.mode_groups[self.mode_index()]
    }

    fn mode_index(&self) -> usize {
        match self.disp_mode {
            DisplayMode::Hex => 0,
            DisplayMode::Bits => 1,
        }
    }

    pub fn group_delims(&self) -> Vec<&str> {
        vec![self.group_pre[0].as_str(), self.group_pre[1].as_str(), self.group_term.as_str()]
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scalar_base: ScalarBase::Hex,
            disp_mode: DisplayMode::Hex,
            hex_case: HexCase::Lower,
            mode_print_defs: [default_line_width(DisplayMode::Hex), default_line_width(DisplayMode::Bits)],
            mode_search_defs: [crate::offset::OFFSET_MAX, crate::offset::OFFSET_MAX],
            mode_lines: [default_line_width(DisplayMode::Hex), default_line_width(DisplayMode::Bits)],
            mode_groups: [2, 1],
            endian_big: true,
            margin: Margin::Digits(8),
            autoskip: false,
            diffskip: false,
            line_term: "\n".to_string(),
            group_pre: [String::new(), " ".to_string()],
            group_term: String::new(),
            print_text: true,
            text_encoding: TextEncoding::Ascii,
            ruler: false,
            print_prefix: false,
            allow_ik: true,
            infer: true,
            tolerate_eof: false,
            assume_unique_infiles: false,
            assume_ttys: false,
            recover_interactive: false,
            recover_auto: false,
            backup_depth: DEFAULT_BACKUP_DEPTH,
            backup_sync: false,
            permissive: false,
            fail_strict: false,
            editable_console: false,
            command: None,
            do_pack: false,
        }
    }
}

/// TOML schema for the optional `-f PATH` config file (spec.md §4.10,
/// SPEC_FULL.md §3 "Config file schema"). Every field is optional; absent
/// fields keep [`Settings`]'s built-in default.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub defaults: ConfigDefaults,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConfigDefaults {
    pub scalar_base: Option<String>,
    pub disp_mode: Option<String>,
    pub hex_case: Option<String>,
    pub endian_big: Option<bool>,
    pub margin: Option<String>,
    pub autoskip: Option<bool>,
    pub diffskip: Option<bool>,
    pub print_text: Option<bool>,
    pub ruler: Option<bool>,
    pub print_prefix: Option<bool>,
    pub backup_depth: Option<u32>,
    pub backup_sync: Option<bool>,
    pub pedantic: Option<bool>,
    pub permissive: Option<bool>,
}

impl Settings {
    /// Load a TOML config file and apply any fields it sets as overrides of
    /// the built-in defaults. CLI flags are applied by the caller after this
    /// and therefore always win.
    pub fn apply_config_file(&mut self, path: &Path) -> Result<(), HexpeekError> {
        let text = fs::read_to_string(path)
            .map_err(|e| HexpeekError::user(format!("error reading config file: {e}")))?;
        let cfg: ConfigFile = toml::from_str(&text)
            .map_err(|e| HexpeekError::user(format!("error parsing config file: {e}")))?;
        let d = cfg.defaults;

        if let Some(s) = d.scalar_base {
            self.scalar_base = match s.as_str() {
                "0" | "cstyle" => ScalarBase::CStyle,
                "16" | "hex" => ScalarBase::Hex,
                other => return Err(HexpeekError::user(format!("invalid scalar_base: {other}"))),
            };
        }
        if let Some(s) = d.disp_mode {
            self.disp_mode = match s.as_str() {
                "hex" => DisplayMode::Hex,
                "bits" => DisplayMode::Bits,
                other => return Err(HexpeekError::user(format!("invalid disp_mode: {other}"))),
            };
        }
        if let Some(s) = d.hex_case {
            self.hex_case = match s.as_str() {
                "lower" => HexCase::Lower,
                "upper" => HexCase::Upper,
                other => return Err(HexpeekError::user(format!("invalid hex_case: {other}"))),
            };
        }
        if let Some(b) = d.endian_big {
            self.endian_big = b;
        }
        if let Some(s) = d.margin {
            self.margin = match s.as_str() {
                "0" => Margin::Off,
                "full" => Margin::Full,
                other => Margin::Digits(
                    other
                        .parse()
                        .map_err(|_| HexpeekError::user(format!("invalid margin: {other}")))?,
                ),
            };
        }
        if let Some(b) = d.autoskip {
            self.autoskip = b;
        }
        if let Some(b) = d.diffskip {
            self.diffskip = b;
        }
        if let Some(b) = d.print_text {
            self.print_text = b;
        }
        if let Some(b) = d.ruler {
            self.ruler = b;
        }
        if let Some(b) = d.print_prefix {
            self.print_prefix = b;
        }
        if let Some(n) = d.backup_depth {
            if n > MAX_BACKUP_DEPTH {
                return Err(HexpeekError::user("backup_depth exceeds MAX_BACKUP_DEPTH"));
            }
            self.backup_depth = n;
        }
        if let Some(b) = d.backup_sync {
            self.backup_sync = b;
        }
        if let Some(true) = d.pedantic {
            self.infer = false;
        }
        if let Some(b) = d.permissive {
            self.permissive = b;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_line_width_is_power_of_two_fitting_80_cols() {
        let w = default_line_width(DisplayMode::Hex);
        assert!(w.is_power_of_two() || w == 1);
        assert!(w <= 16);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[defaults]\nhex_case = \"upper\"\nbackup_depth = 4\n").unwrap();
        let mut s = Settings::default();
        s.apply_config_file(&path).unwrap();
        assert_eq!(s.hex_case, HexCase::Upper);
        assert_eq!(s.backup_depth, 4);
    }

    #[test]
    fn config_file_rejects_oversized_backup_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[defaults]\nbackup_depth = 99\n").unwrap();
        let mut s = Settings::default();
        assert!(s.apply_config_file(&path).is_err());
    }
}
