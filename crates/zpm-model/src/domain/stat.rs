use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Aggregation applied to a statsd value by the stats backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatOp {
    /// `A`: average over the flush window.
    Average,
    /// `D`: difference between consecutive samples.
    Difference,
    /// Any other operation letter, passed through untouched.
    Other(String),
}

impl StatOp {
    pub fn as_str(&self) -> &str {
        match self {
            StatOp::Average => "A",
            StatOp::Difference => "D",
            StatOp::Other(s) => s,
        }
    }
}

impl FromStr for StatOp {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "A" => StatOp::Average,
            "D" => StatOp::Difference,
            other => StatOp::Other(other.to_string()),
        })
    }
}

impl Serialize for StatOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let Ok(op) = s.parse::<StatOp>();
        Ok(op)
    }
}

impl fmt::Display for StatOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric sample reported by a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub op: StatOp,
    pub key: String,
    pub value: f64,
    /// ID of the job that produced the sample.
    pub id: String,
    /// Raw statsd tag section (may be empty).
    #[serde(default)]
    pub tags: String,
}

impl Stat {
    /// Parses a statsd line of the form `key:value|op[|tags]`.
    pub fn parse_statsd(line: &str, id: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '|');
        let data = parts.next()?;
        let op = parts.next()?;
        let tags = parts.next().unwrap_or_default();

        let (key, value) = data.split_once(':')?;
        let value = value.trim().parse::<f64>().ok()?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        Some(Stat {
            op: op.parse().unwrap_or(StatOp::Average),
            key: key.to_string(),
            value,
            id: id.to_string(),
            tags: tags.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_statsd_line() {
        let s = Stat::parse_statsd("disk.used : 12.5|A|dev=sda", "job").unwrap();
        assert_eq!(s.key, "disk.used");
        assert_eq!(s.value, 12.5);
        assert_eq!(s.op, StatOp::Average);
        assert_eq!(s.tags, "dev=sda");
        assert_eq!(s.id, "job");
    }

    #[test]
    fn keeps_unknown_operations() {
        let s = Stat::parse_statsd("x:1|c", "job").unwrap();
        assert_eq!(s.op, StatOp::Other("c".into()));
        assert!(s.tags.is_empty());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Stat::parse_statsd("no-separator", "j").is_none());
        assert!(Stat::parse_statsd("key|A", "j").is_none());
        assert!(Stat::parse_statsd("key:abc|A", "j").is_none());
        assert!(Stat::parse_statsd(":1|A", "j").is_none());
    }
}
