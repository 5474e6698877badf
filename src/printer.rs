//! Epson ESC-sequence + CR-overprint decoder: turns a raw print-stream byte
//! feed into styled `RichLine`s.
//!
//! Grounded on `original_source/src/poverhlp.cpp`'s `PrintOverlayHelper`:
//! the one/two/multi-character escape-sequence classification, the
//! CR-collects-an-overlay / LF-reconciles-them state machine, and the
//! backspace-driven in-place character/style overwrite rule are ported
//! byte-for-byte rather than redesigned, since the original's overwrite
//! precedence (`_` underlines, `-` strikes through, anything else only
//! replaces a space) is exactly what printed FLEX listings depend on.

use bitflags::bitflags;

bitflags! {
    /// Per-character print style, mirroring `poverhlp.h`'s `CharProperty`.
    pub struct Style: u16 {
        const UNDERLINED     = 1 << 0;
        const DOUBLE_STRIKE  = 1 << 1;
        const EMPHASIZED     = 1 << 2;
        const ITALIC         = 1 << 3;
        const DOUBLE_WIDTH   = 1 << 4;
        const SUB_SCRIPT     = 1 << 5;
        const SUPER_SCRIPT   = 1 << 6;
        const STRIKE_THROUGH = 1 << 7;
        const PAGE_BREAK     = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RichCharacter {
    pub character: u8,
    pub style: Style,
}

pub type RichLine = Vec<RichCharacter>;

pub fn rich_line_to_string(line: &RichLine) -> String {
    line.iter().map(|rc| rc.character as char).collect()
}

const NUL: u8 = 0x00;
const BEL: u8 = 0x07;
const BS: u8 = 0x08;
const LF: u8 = 0x0a;
const FF: u8 = 0x0c;
const CR: u8 = 0x0d;
const SO: u8 = 0x0e;
const SI: u8 = 0x0f;
const DC1: u8 = 0x11;
const DC2: u8 = 0x12;
const DC3: u8 = 0x13;
const DC4: u8 = 0x14;
const CAN: u8 = 0x18;
const ESC: u8 = 0x1b;

const TWO_CHAR_ESCAPES: &[u8] = b"-SAC";
const MULTI_CHAR_ESCAPES: &[u8] = b"BD";

/// Decodes one print-stream connection's worth of bytes into a sequence of
/// `RichLine`s, reconciling CR-overprint passes on each `LF`.
pub struct PrintOverlayHelper {
    overlays: Vec<Vec<u8>>,
    current_overlay: Vec<u8>,
    rich_line: RichLine,
    current_rich_line: RichLine,
    current_style: Style,
    is_escape_sequence: bool,
    escape_sequence: Vec<u8>,
    backspace_count: usize,
}

impl PrintOverlayHelper {
    pub fn new() -> Self {
        PrintOverlayHelper {
            overlays: Vec::new(),
            current_overlay: Vec::with_capacity(80),
            rich_line: RichLine::new(),
            current_rich_line: RichLine::new(),
            current_style: Style::empty(),
            is_escape_sequence: false,
            escape_sequence: Vec::new(),
            backspace_count: 0,
        }
    }

    /// Feeds one byte. Returns true when `rich_line()` holds a freshly
    /// completed line (i.e. this byte was the `LF` ending it).
    /// `PAGE_BREAK` is cleared unconditionally at the top of every call, so
    /// it never survives from an `FF` byte to the next pushed character —
    /// matching the original verbatim. Live page-break marking is a no-op
    /// by construction; the statistical detector in `pagedet` is what
    /// actually places `PAGE_BREAK` on a finished document's lines.
    pub fn add_character(&mut self, character: u8) -> bool {
        self.current_style.remove(Style::PAGE_BREAK);

        if self.is_escape_sequence {
            self.advance_escape_sequence(character);
            return false;
        }

        match character {
            CR => {
                self.backspace_count = 0;
                self.add_overlay();
                false
            }
            LF => {
                let index = self.current_overlay.len().saturating_sub(self.backspace_count);
                self.backspace_count = 0;
                self.evaluate_overlays();
                if index > 0 {
                    self.current_overlay = vec![b' '; index];
                    self.current_rich_line = vec![RichCharacter { character: b' ', style: Style::empty() }; index];
                }
                true
            }
            ESC => {
                self.is_escape_sequence = true;
                self.escape_sequence.clear();
                false
            }
            0x20..=0x7e => {
                self.add_printable(character);
                false
            }
            SO => {
                self.current_style.insert(Style::DOUBLE_WIDTH);
                false
            }
            DC4 => {
                self.current_style.remove(Style::DOUBLE_WIDTH);
                false
            }
            FF => {
                self.current_style.insert(Style::PAGE_BREAK);
                false
            }
            BS => {
                if self.current_overlay.len() > self.backspace_count {
                    self.backspace_count += 1;
                }
                false
            }
            // NUL/BEL/HT/VT/SI/DC1/DC2/DC3/CAN/DEL and anything else
            // unprintable: no-op, matching the original's ignored set.
            NUL | BEL | SI | DC1 | DC2 | DC3 | CAN => false,
            _ => false,
        }
    }

    fn advance_escape_sequence(&mut self, character: u8) {
        if self.escape_sequence.is_empty() {
            if TWO_CHAR_ESCAPES.contains(&character) || MULTI_CHAR_ESCAPES.contains(&character) {
                self.escape_sequence.push(character);
                return;
            }
            match character {
                SO => self.current_style.insert(Style::DOUBLE_WIDTH),
                DC4 => self.current_style.remove(Style::DOUBLE_WIDTH),
                b'4' => self.current_style.insert(Style::ITALIC),
                b'5' => self.current_style.remove(Style::ITALIC),
                b'E' => self.current_style.insert(Style::EMPHASIZED),
                b'F' => self.current_style.remove(Style::EMPHASIZED),
                b'G' => self.current_style.insert(Style::DOUBLE_STRIKE),
                b'H' => self.current_style.remove(Style::DOUBLE_STRIKE),
                b'T' => self.current_style.remove(Style::SUB_SCRIPT | Style::SUPER_SCRIPT),
                _ => {}
            }
        } else if self.escape_sequence.len() == 1 {
            match self.escape_sequence[0] {
                b'-' => {
                    if character == b'1' {
                        self.current_style.insert(Style::UNDERLINED);
                    } else if character == b'0' {
                        self.current_style.remove(Style::UNDERLINED);
                    }
                }
                b'S' => {
                    if character == b'1' {
                        self.current_style.insert(Style::SUB_SCRIPT);
                    } else if character == b'0' {
                        self.current_style.insert(Style::SUPER_SCRIPT);
                    }
                }
                _ => {}
            }
        } else if character != NUL {
            self.escape_sequence.push(character);
            return;
        }
        self.is_escape_sequence = false;
    }

    fn add_printable(&mut self, character: u8) {
        let bs = self.backspace_count;

        if bs == 0 {
            self.current_overlay.push(character);
        } else {
            let index = self.current_overlay.len().saturating_sub(bs);
            if self.current_overlay.get(index) == Some(&b' ') {
                self.current_overlay[index] = character;
            }
        }

        if self.overlays.is_empty() {
            if bs == 0 || self.current_rich_line.is_empty() {
                self.current_rich_line.push(RichCharacter { character, style: self.current_style });
            } else {
                let len = self.current_rich_line.len();
                let index = if len > bs { len - bs } else { 0 };
                match character {
                    b'_' => self.current_rich_line[index].style.insert(Style::UNDERLINED),
                    b'-' => self.current_rich_line[index].style.insert(Style::STRIKE_THROUGH),
                    _ => {
                        if self.current_rich_line[index].character == b' ' {
                            self.current_rich_line[index].character = character;
                        }
                    }
                }
            }
        }

        if bs != 0 {
            self.backspace_count -= 1;
        }
    }

    fn add_overlay(&mut self) {
        if !self.current_overlay.is_empty() {
            self.overlays.push(std::mem::take(&mut self.current_overlay));
        }
    }

    fn max_overlay_size(&self) -> usize {
        self.overlays.iter().map(|o| o.len()).max().unwrap_or(0)
    }

    fn evaluate_overlay(&mut self) {
        self.rich_line = std::mem::take(&mut self.current_rich_line);
        self.overlays.clear();
    }

    /// Column-by-column reconciliation of every CR-overprint pass collected
    /// since the last `LF`. A single (or zero) overlay is just the plain
    /// rich line built incrementally; two or more overlays are merged per
    /// `original_source/src/poverhlp.cpp`'s `EvaluateOverlays`.
    fn evaluate_overlays(&mut self) {
        if self.overlays.len() <= 1 {
            self.evaluate_overlay();
            return;
        }

        let max_size = self.max_overlay_size();
        self.rich_line = vec![RichCharacter { character: b' ', style: Style::empty() }; max_size];
        self.current_rich_line.clear();

        for index in 0..max_size {
            let mut count = 0usize;
            let mut character = b' ';
            let mut style = Style::empty();

            for overlay in &self.overlays {
                if let Some(&byte) = overlay.get(index) {
                    if byte == b'_' {
                        style.insert(Style::UNDERLINED);
                    } else if byte == b'-' {
                        style.insert(Style::STRIKE_THROUGH);
                    } else if character == b' ' && byte != b' ' {
                        character = byte;
                        count = 1;
                    } else if character != b' ' && character == byte {
                        count += 1;
                    }
                }
            }

            match count {
                2 => style.insert(Style::DOUBLE_STRIKE),
                3 => style.insert(Style::EMPHASIZED),
                n if n > 3 => style.insert(Style::DOUBLE_STRIKE | Style::EMPHASIZED),
                _ => {}
            }

            self.rich_line[index] = RichCharacter { character, style };
        }

        let is_blank =
            self.rich_line.iter().all(|rc| rc.character == b' ' && !rc.style.contains(Style::UNDERLINED));
        if is_blank {
            self.rich_line.clear();
        }

        self.overlays.clear();
    }

    pub fn rich_line(&self) -> &RichLine {
        &self.rich_line
    }

    pub fn is_rich_line_empty(&self) -> bool {
        self.rich_line.is_empty()
    }

    pub fn clear(&mut self) {
        self.overlays.clear();
        self.current_overlay.clear();
        self.rich_line.clear();
        self.current_rich_line.clear();
        self.current_style = Style::empty();
        self.is_escape_sequence = false;
        self.escape_sequence.clear();
    }
}

impl Default for PrintOverlayHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(helper: &mut PrintOverlayHelper, text: &[u8]) {
        for &b in text {
            helper.add_character(b);
        }
    }

    #[test]
    fn plain_text_with_no_escape_codes_passes_through_unchanged() {
        let mut helper = PrintOverlayHelper::new();
        feed(&mut helper, b"HELLO");
        assert!(helper.add_character(LF));
        assert_eq!(rich_line_to_string(helper.rich_line()), "HELLO");
        assert!(helper.rich_line().iter().all(|rc| rc.style.is_empty()));
    }

    #[test]
    fn emphasized_escape_sequence_sets_style_until_cancelled() {
        let mut helper = PrintOverlayHelper::new();
        feed(&mut helper, &[ESC, b'E']);
        feed(&mut helper, b"AB");
        feed(&mut helper, &[ESC, b'F']);
        feed(&mut helper, b"C");
        helper.add_character(LF);
        let line = helper.rich_line();
        assert!(line[0].style.contains(Style::EMPHASIZED));
        assert!(line[1].style.contains(Style::EMPHASIZED));
        assert!(!line[2].style.contains(Style::EMPHASIZED));
    }

    #[test]
    fn backspace_underline_overwrite_sets_underlined_style() {
        let mut helper = PrintOverlayHelper::new();
        feed(&mut helper, b"AB");
        helper.add_character(BS);
        helper.add_character(BS);
        feed(&mut helper, b"__");
        helper.add_character(LF);
        let line = helper.rich_line();
        assert_eq!(rich_line_to_string(line), "AB");
        assert!(line[0].style.contains(Style::UNDERLINED));
        assert!(line[1].style.contains(Style::UNDERLINED));
    }

    #[test]
    fn cr_overprint_reconciles_double_strike() {
        // Only CR-terminated passes become overlays; whatever is typed
        // after the *last* CR and before the LF is discarded, exactly as
        // in the original, so a 2-pass overprint ends "pass CR pass CR LF".
        let mut helper = PrintOverlayHelper::new();
        feed(&mut helper, b"ABC");
        helper.add_character(CR);
        feed(&mut helper, b"ABC");
        helper.add_character(CR);
        helper.add_character(LF);
        let line = helper.rich_line();
        assert_eq!(rich_line_to_string(line), "ABC");
        assert!(line.iter().all(|rc| rc.style.contains(Style::DOUBLE_STRIKE)));
    }

    #[test]
    fn all_blank_reconciled_line_is_cleared() {
        let mut helper = PrintOverlayHelper::new();
        feed(&mut helper, b"   ");
        helper.add_character(CR);
        feed(&mut helper, b"   ");
        helper.add_character(LF);
        assert!(helper.is_rich_line_empty());
    }

    #[test]
    fn form_feed_does_not_leak_page_break_onto_the_next_character() {
        // PAGE_BREAK is cleared at the top of every add_character call, so
        // an FF byte's flag never survives to style a later pushed
        // character through this live decoder; page breaks are placed by
        // the separate statistical detector over a finished document.
        let mut helper = PrintOverlayHelper::new();
        helper.add_character(FF);
        feed(&mut helper, b"X");
        helper.add_character(LF);
        assert!(!helper.rich_line()[0].style.contains(Style::PAGE_BREAK));
    }
}
