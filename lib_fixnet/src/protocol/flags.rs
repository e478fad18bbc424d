//! # Quality Flags
//!
//! Five booleans describe the health of a value. On the wire they appear as a
//! 5 character bit string (`10100`) in data sentences and echoes, and as a
//! single letter in flag requests. Internally they are decoded once into
//! [`QualityFlags`], whose compact form is the subset of the letters
//! `a o b f s` that are set.

use std::fmt;

use crate::error::ProtocolError;

/// One quality flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityFlag {
    Annunciate,
    Old,
    Bad,
    Fail,
    SecFail,
}

impl QualityFlag {
    /// Wire bit order.
    pub const ALL: [QualityFlag; 5] = [
        QualityFlag::Annunciate,
        QualityFlag::Old,
        QualityFlag::Bad,
        QualityFlag::Fail,
        QualityFlag::SecFail,
    ];

    pub fn letter(self) -> char {
        match self {
            QualityFlag::Annunciate => 'a',
            QualityFlag::Old => 'o',
            QualityFlag::Bad => 'b',
            QualityFlag::Fail => 'f',
            QualityFlag::SecFail => 's',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        QualityFlag::ALL
            .into_iter()
            .find(|f| f.letter() == c.to_ascii_lowercase())
    }

    pub fn name(self) -> &'static str {
        match self {
            QualityFlag::Annunciate => "annunciate",
            QualityFlag::Old => "old",
            QualityFlag::Bad => "bad",
            QualityFlag::Fail => "fail",
            QualityFlag::SecFail => "secFail",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The full set of quality flags of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct QualityFlags {
    pub annunciate: bool,
    pub old: bool,
    pub bad: bool,
    pub fail: bool,
    pub sec_fail: bool,
}

impl QualityFlags {
    /// Decodes the 5 bit wire form, e.g. `10100`.
    pub fn from_bits(bits: &str) -> Result<Self, ProtocolError> {
        let bits = bits.trim();
        if bits.len() != 5 || !bits.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(ProtocolError::BadFlags(bits.to_string()));
        }
        let mut flags = QualityFlags::default();
        for (flag, bit) in QualityFlag::ALL.into_iter().zip(bits.bytes()) {
            flags.set(flag, bit == b'1');
        }
        Ok(flags)
    }

    /// Builds flags from the compact letter code; unknown letters are ignored.
    pub fn from_letters(letters: &str) -> Self {
        let mut flags = QualityFlags::default();
        for flag in letters.chars().filter_map(QualityFlag::from_letter) {
            flags.set(flag, true);
        }
        flags
    }

    pub fn to_bits(&self) -> String {
        QualityFlag::ALL
            .into_iter()
            .map(|f| if self.get(f) { '1' } else { '0' })
            .collect()
    }

    pub fn letters(&self) -> String {
        QualityFlag::ALL
            .into_iter()
            .filter(|f| self.get(*f))
            .map(QualityFlag::letter)
            .collect()
    }

    pub fn get(&self, flag: QualityFlag) -> bool {
        match flag {
            QualityFlag::Annunciate => self.annunciate,
            QualityFlag::Old => self.old,
            QualityFlag::Bad => self.bad,
            QualityFlag::Fail => self.fail,
            QualityFlag::SecFail => self.sec_fail,
        }
    }

    pub fn set(&mut self, flag: QualityFlag, on: bool) {
        match flag {
            QualityFlag::Annunciate => self.annunciate = on,
            QualityFlag::Old => self.old = on,
            QualityFlag::Bad => self.bad = on,
            QualityFlag::Fail => self.fail = on,
            QualityFlag::SecFail => self.sec_fail = on,
        }
    }
}

impl fmt::Display for QualityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

/// Text to bool for flag setters: `0`, `false`, `no` and `f` are false.
pub fn parse_flag_bool(input: &str) -> bool {
    !matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "f"
    )
}
