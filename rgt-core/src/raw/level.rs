//! Log levels
//!
//! A level is a 16-bit word. Each known level is a single bit; a record
//! normally carries exactly one. Unknown bits are retained so that a
//! damaged level can still be shown to the user.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Log level bit set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct Level: u16 {
        const ERROR = 0x0001;
        const WARN = 0x0002;
        const RING = 0x0004;
        const INFO = 0x0008;
        const VERB = 0x0010;
        const ENTRY_EXIT = 0x0020;
        const MI = 0x0040;
        const CONTROL = 0x0080;
        const PACKET = 0x0100;
    }
}

/// Display names, most severe first
const NAMES: [(Level, &str); 9] = [
    (Level::ERROR, "ERROR"),
    (Level::WARN, "WARN"),
    (Level::MI, "MI"),
    (Level::RING, "RING"),
    (Level::INFO, "INFO"),
    (Level::VERB, "VERB"),
    (Level::ENTRY_EXIT, "ENTRY/EXIT"),
    (Level::PACKET, "PACKET"),
    (Level::CONTROL, "CONTROL"),
];

pub const UNKNOWN_LEVEL_NAME: &str = "UNKNOWN";

impl Level {
    /// Wraps a raw level word, keeping unknown bits
    pub fn from_raw(raw: u16) -> Self {
        Level::from_bits_retain(raw)
    }

    /// True for zero or for words with bits outside the known set
    pub fn is_unknown(self) -> bool {
        self.is_empty() || self.bits() & !Level::all().bits() != 0
    }

    /// Name of the most severe bit set, or `UNKNOWN`
    pub fn name(self) -> &'static str {
        if self.is_unknown() {
            return UNKNOWN_LEVEL_NAME;
        }
        NAMES
            .iter()
            .find(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .unwrap_or(UNKNOWN_LEVEL_NAME)
    }

    /// Parses a level mask such as `ERROR|WARN`, `INFO,VERB` or `0x0c`
    pub fn parse_mask(text: &str) -> std::result::Result<Level, String> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u16::from_str_radix(hex, 16)
                .map(Level::from_raw)
                .map_err(|_| format!("invalid level mask '{}'", text));
        }
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            return text
                .parse::<u16>()
                .map(Level::from_raw)
                .map_err(|_| format!("invalid level mask '{}'", text));
        }

        let mut mask = Level::empty();
        for word in text
            .split(|c: char| c == '|' || c == ',' || c.is_whitespace())
            .filter(|w| !w.is_empty())
        {
            let upper = word.to_ascii_uppercase();
            let bit = match upper.as_str() {
                "ENTRY_EXIT" | "ENTRY" | "EXIT" => Some(Level::ENTRY_EXIT),
                name => NAMES.iter().find(|(_, n)| *n == name).map(|(bit, _)| *bit),
            };
            match bit {
                Some(bit) => mask |= bit,
                None => return Err(format!("unknown level name '{}'", word)),
            }
        }
        if mask.is_empty() {
            return Err("empty level mask".to_string());
        }
        Ok(mask)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bit_names() {
        assert_eq!(Level::ERROR.name(), "ERROR");
        assert_eq!(Level::ENTRY_EXIT.name(), "ENTRY/EXIT");
        assert_eq!(Level::CONTROL.name(), "CONTROL");
        assert_eq!(Level::PACKET.name(), "PACKET");
    }

    #[test]
    fn test_name_priority() {
        assert_eq!((Level::INFO | Level::ERROR).name(), "ERROR");
        assert_eq!((Level::RING | Level::MI).name(), "MI");
        assert_eq!((Level::CONTROL | Level::PACKET).name(), "PACKET");
    }

    #[test]
    fn test_unknown_levels() {
        assert!(Level::from_raw(0).is_unknown());
        assert_eq!(Level::from_raw(0).name(), "UNKNOWN");
        assert!(Level::from_raw(0x8000).is_unknown());
        assert_eq!(Level::from_raw(0x8001).name(), "UNKNOWN");
        assert_eq!(Level::from_raw(0x8001).bits(), 0x8001);
        assert!(!Level::from_raw(0x0008).is_unknown());
    }

    #[test]
    fn test_parse_mask() {
        assert_eq!(Level::parse_mask("ERROR|WARN").unwrap(), Level::ERROR | Level::WARN);
        assert_eq!(Level::parse_mask("info, verb").unwrap(), Level::INFO | Level::VERB);
        assert_eq!(Level::parse_mask("0x80").unwrap(), Level::CONTROL);
        assert_eq!(Level::parse_mask("8").unwrap(), Level::INFO);
        assert_eq!(Level::parse_mask("ENTRY/EXIT").unwrap(), Level::ENTRY_EXIT);
        assert!(Level::parse_mask("LOUD").is_err());
        assert!(Level::parse_mask("").is_err());
    }
}
