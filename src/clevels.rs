//! Criticality and austerity levels.
//!
//! There are four levels, adapted from the SRE load-shedding vocabulary:
//!
//! - **Sheddable**: frequent partial and occasional full unavailability is fine.
//! - **SheddablePlus**: the default for lines without an explicit tag.
//! - **Critical**: partial unavailability should be rare.
//! - **CriticalPlus**: only unavailable in the most extreme circumstances.
//!
//! The same ordinal domain serves two roles: the system-wide *austerity*
//! level (how much shedding is tolerated right now) and the per-record
//! *criticality* level (how important one line is).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::bytes::Regex;
use serde_json::Value;

use crate::json::LogLine;

/// Ordered importance level, from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AusterityLevel {
    /// Least important; shed first.
    Sheddable = 0,
    /// Default criticality.
    SheddablePlus = 1,
    /// Important.
    Critical = 2,
    /// Never shed except in extreme circumstances.
    CriticalPlus = 3,
}

/// Per-record importance. Same domain as [`AusterityLevel`].
pub type CriticalityLevel = AusterityLevel;

/// Criticality for any line without an explicit `clevel` tag.
pub const DEFAULT_CRITICALITY: CriticalityLevel = AusterityLevel::SheddablePlus;

/// System austerity used until a level has been loaded (fail open).
pub const DEFAULT_AUSTERITY: AusterityLevel = AusterityLevel::Sheddable;

impl AusterityLevel {
    /// All levels in increasing order.
    pub const ALL: [AusterityLevel; 4] = [
        AusterityLevel::Sheddable,
        AusterityLevel::SheddablePlus,
        AusterityLevel::Critical,
        AusterityLevel::CriticalPlus,
    ];

    /// Ordinal rank (0 = Sheddable, 3 = CriticalPlus).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Canonical display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sheddable => "Sheddable",
            Self::SheddablePlus => "SheddablePlus",
            Self::Critical => "Critical",
            Self::CriticalPlus => "CriticalPlus",
        }
    }
}

impl fmt::Display for AusterityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced while reading or parsing a level.
#[derive(Debug, thiserror::Error)]
pub enum LevelError {
    /// The text is not one of the four level names.
    #[error("invalid austerity level: {0:?}")]
    Invalid(String),
    /// The level source could not be read.
    #[error("failed to read austerity level: {0}")]
    Io(#[from] std::io::Error),
}

impl FromStr for AusterityLevel {
    type Err = LevelError;

    /// Parse a level name, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| LevelError::Invalid(wanted.to_owned()))
    }
}

static CANONICAL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CANONICAL-[\w-]+?-LINE").expect("canonical line pattern is valid")
});

static CLEVEL_BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[clevel: (\w*?)\]").expect("bracketed clevel pattern is valid")
});

static CLEVEL_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\sclevel=(\w+?)\b").expect("inline clevel pattern is valid")
});

/// Classify a text line. The line need not be valid UTF-8.
///
/// Canonical lines (`CANONICAL-<NAME>-LINE`, any case, dashes allowed in the name)
/// are always [`AusterityLevel::CriticalPlus`], whatever tag they carry. Otherwise
/// the first parseable tag in `[clevel: X]` or ` clevel=X` form wins, falling
/// back to [`DEFAULT_CRITICALITY`].
pub fn criticality(line: impl AsRef<[u8]>) -> CriticalityLevel {
    let line = line.as_ref();
    if CANONICAL_LINE.is_match(line) {
        return AusterityLevel::CriticalPlus;
    }

    for pattern in [&*CLEVEL_BRACKETED, &*CLEVEL_INLINE] {
        let Some(captures) = pattern.captures(line) else {
            continue;
        };
        let Some(tag) = captures.get(1) else {
            continue;
        };
        // Unparseable tags fall through: never drop more than asked.
        let parsed = std::str::from_utf8(tag.as_bytes())
            .ok()
            .and_then(|tag| tag.parse().ok());
        if let Some(level) = parsed {
            return level;
        }
    }

    DEFAULT_CRITICALITY
}

/// Classify a structured record using its `canonical` and `clevel` fields.
pub fn json_criticality(line: &LogLine) -> CriticalityLevel {
    let canonical = match line.get("canonical") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    };
    if canonical {
        return AusterityLevel::CriticalPlus;
    }

    line.get("clevel")
        .and_then(Value::as_str)
        .and_then(|tag| tag.parse().ok())
        .unwrap_or(DEFAULT_CRITICALITY)
}
