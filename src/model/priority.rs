//! Numeric priorities and the three ordered buckets they map onto.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated priority in `[0, 10]`. Higher = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(10);
    pub const DEFAULT: Priority = Priority(5);

    /// Validate a raw priority. Out-of-range values fail with `InvalidPriority`.
    pub fn new(value: i32) -> Result<Self> {
        if (0..=10).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(Error::InvalidPriority(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn bucket(self) -> Bucket {
        classify(self)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i32> for Priority {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        i32::from(p.0)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority tier. Workers drain buckets in `DESCENDING` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Low,
    Normal,
    High,
}

impl Bucket {
    /// Poll order: high before normal before low.
    pub const DESCENDING: [Bucket; 3] = [Bucket::High, Bucket::Normal, Bucket::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::High => "high",
            Bucket::Normal => "normal",
            Bucket::Low => "low",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Bucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Bucket::High),
            "normal" => Ok(Bucket::Normal),
            "low" => Ok(Bucket::Low),
            other => Err(Error::InvalidLabel {
                kind: "bucket",
                value: other.to_string(),
            }),
        }
    }
}

/// Map a priority to its bucket: 8..=10 high, 4..=7 normal, 0..=3 low.
pub fn classify(priority: Priority) -> Bucket {
    match priority.value() {
        8.. => Bucket::High,
        4..=7 => Bucket::Normal,
        _ => Bucket::Low,
    }
}
