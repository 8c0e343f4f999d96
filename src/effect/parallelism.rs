//! Concurrency limit for `for_each_par`

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// How many element effects of a `for_each_par` may run at once.
/// Unlimited parallelism is `Unbounded`, never a large count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl Parallelism {
    /// A limit of `n` concurrent children. `n` must be at least 1.
    pub fn bounded(n: usize) -> Result<Self> {
        NonZeroUsize::new(n)
            .map(Parallelism::Bounded)
            .ok_or_else(|| Error::InvalidParallelism("parallelism must be at least 1".to_string()))
    }

    pub fn sequential() -> Self {
        Parallelism::Bounded(NonZeroUsize::MIN)
    }

    /// Number of children allowed to run for a workload of `len` items.
    pub fn limit_for(&self, len: usize) -> usize {
        match self {
            Parallelism::Bounded(n) => n.get().min(len),
            Parallelism::Unbounded => len,
        }
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Parallelism::Bounded(NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN))
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Bounded(n) => write!(f, "{n}"),
            Parallelism::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl FromStr for Parallelism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unbounded") {
            return Ok(Parallelism::Unbounded);
        }
        let n = trimmed
            .parse::<usize>()
            .map_err(|_| Error::InvalidParallelism(format!("expected a positive integer or \"unbounded\", got {s:?}")))?;
        Parallelism::bounded(n)
    }
}

impl Serialize for Parallelism {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Parallelism::Bounded(n) => serializer.serialize_u64(n.get() as u64),
            Parallelism::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(usize),
            Word(String),
        }

        let parsed = match Repr::deserialize(deserializer)? {
            Repr::Count(n) => Parallelism::bounded(n),
            Repr::Word(word) => word.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_parallelism_rejected() {
        assert!(Parallelism::bounded(0).is_err());
        assert!("0".parse::<Parallelism>().is_err());
    }

    #[test]
    fn test_parse_parallelism() {
        assert_eq!("unbounded".parse::<Parallelism>().unwrap(), Parallelism::Unbounded);
        assert_eq!(
            " 4 ".parse::<Parallelism>().unwrap(),
            Parallelism::bounded(4).unwrap()
        );
        assert!("lots".parse::<Parallelism>().is_err());
    }

    #[test]
    fn test_limit_for_workload() {
        assert_eq!(Parallelism::bounded(3).unwrap().limit_for(10), 3);
        assert_eq!(Parallelism::bounded(30).unwrap().limit_for(10), 10);
        assert_eq!(Parallelism::Unbounded.limit_for(7), 7);
        assert_eq!(Parallelism::sequential().limit_for(7), 1);
    }

    #[test]
    fn test_parallelism_toml_shapes() {
        #[derive(Deserialize)]
        struct Holder {
            parallelism: Parallelism,
        }

        let bounded: Holder = toml::from_str("parallelism = 5").unwrap();
        assert_eq!(bounded.parallelism, Parallelism::bounded(5).unwrap());

        let unbounded: Holder = toml::from_str("parallelism = \"unbounded\"").unwrap();
        assert_eq!(unbounded.parallelism, Parallelism::Unbounded);

        assert!(toml::from_str::<Holder>("parallelism = 0").is_err());
    }
}
