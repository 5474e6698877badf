//! Ascii/regex/hex-byte search over a CPU memory snapshot, with
//! find-next-wrap-around semantics.
//!
//! Grounded on `original_source/src/finddata.cpp`'s `FindData` class: a
//! search starts at a given offset and scans to the end of memory; if
//! nothing is found, it wraps to offset 0 and continues up to (excluding)
//! the start offset, stopping for good once `FindNext` would revisit the
//! position it started from. Byte subsequence search backs both the ascii
//! and hex modes; regex search narrows a match back down to a byte range
//! via a second ascii-style search, exactly as the original re-locates
//! `std::match_results` through `FindAscii`.

use crate::error::Mc6809Error;
use regex::bytes::Regex;

/// What `FindNext` is searching for.
pub enum SearchPattern {
    Ascii(String),
    Regex(Regex),
    Hex(Vec<u8>),
}

pub struct FindConfig {
    pattern: SearchPattern,
    case_sensitive: bool,
}

impl FindConfig {
    pub fn ascii(text: &str, case_sensitive: bool) -> Result<Self, Mc6809Error> {
        if text.is_empty() {
            return Err(Mc6809Error::InvalidAsciiString(text.to_string()));
        }
        Ok(FindConfig { pattern: SearchPattern::Ascii(text.to_string()), case_sensitive })
    }

    pub fn regex(pattern: &str, case_sensitive: bool) -> Result<Self, Mc6809Error> {
        let source = if case_sensitive { pattern.to_string() } else { format!("(?i){}", pattern) };
        let compiled = Regex::new(&source).map_err(|e| Mc6809Error::InvalidRegex(e.to_string()))?;
        Ok(FindConfig { pattern: SearchPattern::Regex(compiled), case_sensitive })
    }

    pub fn hex(text: &str) -> Result<Self, Mc6809Error> {
        let bytes = parse_hex_bytes(text).ok_or_else(|| Mc6809Error::InvalidHexBytes(text.to_string()))?;
        if bytes.is_empty() {
            return Err(Mc6809Error::InvalidHexBytes(text.to_string()));
        }
        Ok(FindConfig { pattern: SearchPattern::Hex(bytes), case_sensitive: true })
    }
}

/// Whitespace-tolerant "4A 3B 0C" / "4A3B0C" hex byte list parser.
fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    let chars: Vec<char> = digits.chars().collect();
    for pair in chars.chunks(2) {
        let hex: String = pair.iter().collect();
        bytes.push(u8::from_str_radix(&hex, 16).ok()?);
    }
    Some(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    Found { offset: u32, size: u32 },
    Finished,
    NotInitialized,
}

/// Mirrors `FindData`: `find_next` is re-entrant and resumable, wrapping
/// around the end of memory exactly once per `initialize` call.
pub struct Finder {
    config: Option<FindConfig>,
    find_start: u32,
    next: Option<u32>,
    success: bool,
    done: bool,
    offset: u32,
}

impl Finder {
    pub fn new() -> Self {
        Finder { config: None, find_start: 0, next: None, success: false, done: false, offset: 0 }
    }

    pub fn initialize(&mut self, start_offset: u32, config: FindConfig) {
        self.find_start = start_offset;
        self.next = Some(start_offset);
        self.success = false;
        self.done = false;
        self.offset = 0;
        self.config = Some(config);
    }

    pub fn reset(&mut self) {
        self.next = None;
    }

    pub fn is_find_success(&self) -> bool {
        self.success
    }

    pub fn is_find_in_progress(&self) -> bool {
        self.next.is_some()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn find_next(&mut self, data: &[u8]) -> FindOutcome {
        loop {
            let Some(begin) = self.next else {
                return FindOutcome::NotInitialized;
            };
            let Some(config) = self.config.as_ref() else {
                return FindOutcome::NotInitialized;
            };
            let end = if begin < self.find_start { self.find_start } else { data.len() as u32 };

            if !self.done {
                let found = match &config.pattern {
                    SearchPattern::Ascii(text) => find_ascii(data, begin, end, text, config.case_sensitive),
                    SearchPattern::Regex(re) => find_regex(data, begin, end, re),
                    SearchPattern::Hex(bytes) => find_bytes(data, begin, end, bytes),
                };

                if let Some((offset, size)) = found {
                    self.next = Some(offset + size);
                    self.success = true;
                    self.done = self.find_start != 0 && self.next == Some(self.find_start);
                    self.offset = offset;
                    return FindOutcome::Found { offset, size };
                }

                if let Some(n) = self.next {
                    if n >= self.find_start {
                        self.next = Some(data.len() as u32);
                    }
                }
                if self.find_start != 0 && self.next.map_or(false, |n| n > self.find_start) {
                    self.next = Some(0);
                    continue;
                }
            }

            self.reset();
            return FindOutcome::Finished;
        }
    }
}

impl Default for Finder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_ascii(data: &[u8], begin: u32, end: u32, text: &str, case_sensitive: bool) -> Option<(u32, u32)> {
    let haystack = data.get(begin as usize..end as usize)?;
    let needle = text.as_bytes();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    for start in 0..=haystack.len() - needle.len() {
        let window = &haystack[start..start + needle.len()];
        let matches = if case_sensitive {
            window == needle
        } else {
            window.eq_ignore_ascii_case(needle)
        };
        if matches {
            return Some((begin + start as u32, needle.len() as u32));
        }
    }
    None
}

fn find_bytes(data: &[u8], begin: u32, end: u32, needle: &[u8]) -> Option<(u32, u32)> {
    let haystack = data.get(begin as usize..end as usize)?;
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    for start in 0..=haystack.len() - needle.len() {
        if &haystack[start..start + needle.len()] == needle {
            return Some((begin + start as u32, needle.len() as u32));
        }
    }
    None
}

fn find_regex(data: &[u8], begin: u32, end: u32, re: &Regex) -> Option<(u32, u32)> {
    let haystack = data.get(begin as usize..end as usize)?;
    let m = re.find(haystack)?;
    Some((begin + m.start() as u32, (m.end() - m.start()) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_search_finds_and_wraps() {
        let data = b"XXFLEXXXFLEXX".to_vec();
        let mut finder = Finder::new();
        finder.initialize(6, FindConfig::ascii("FLEX", true).unwrap());
        assert_eq!(finder.find_next(&data), FindOutcome::Found { offset: 8, size: 4 });
        // Wraps around past the end, finds the earlier occurrence, then stops.
        assert_eq!(finder.find_next(&data), FindOutcome::Found { offset: 2, size: 4 });
        assert_eq!(finder.find_next(&data), FindOutcome::Finished);
    }

    #[test]
    fn ascii_search_is_case_insensitive_when_requested() {
        let data = b"hello FLEX world".to_vec();
        let mut finder = Finder::new();
        finder.initialize(0, FindConfig::ascii("flex", false).unwrap());
        assert_eq!(finder.find_next(&data), FindOutcome::Found { offset: 6, size: 4 });
    }

    #[test]
    fn hex_search_matches_byte_sequence() {
        let data = vec![0x00, 0x10, 0x9d, 0x20, 0xff];
        let mut finder = Finder::new();
        finder.initialize(0, FindConfig::hex("10 9D").unwrap());
        assert_eq!(finder.find_next(&data), FindOutcome::Found { offset: 1, size: 2 });
    }

    #[test]
    fn regex_search_locates_a_byte_pattern() {
        let data = b"LDA #$41 STA $C000".to_vec();
        let mut finder = Finder::new();
        finder.initialize(0, FindConfig::regex(r"STA \$[0-9A-F]+", true).unwrap());
        assert_eq!(finder.find_next(&data), FindOutcome::Found { offset: 9, size: 9 });
    }

    #[test]
    fn empty_ascii_pattern_is_rejected() {
        assert!(FindConfig::ascii("", true).is_err());
    }

    #[test]
    fn malformed_hex_pattern_is_rejected() {
        assert!(FindConfig::hex("not hex").is_err());
        assert!(FindConfig::hex("4").is_err());
    }

    #[test]
    fn uninitialized_finder_reports_not_initialized() {
        let mut finder = Finder::new();
        assert_eq!(finder.find_next(b"whatever"), FindOutcome::NotInitialized);
    }
}
