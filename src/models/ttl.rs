//! Lifetimes an uploader can choose from.

use std::fmt;

/// Time-to-live options offered at upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ttl {
    OneHour,
    #[default]
    OneDay,
    SevenDays,
}

impl Ttl {
    /// Map the `expiresIn` form value onto a TTL.
    ///
    /// Absent or unrecognized values fall back to 24 hours.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("1h") => Ttl::OneHour,
            Some("24h") => Ttl::OneDay,
            Some("7d") => Ttl::SevenDays,
            _ => Ttl::default(),
        }
    }

    pub fn as_secs(self) -> i64 {
        match self {
            Ttl::OneHour => 3_600,
            Ttl::OneDay => 86_400,
            Ttl::SevenDays => 604_800,
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Ttl::OneHour => "1h",
            Ttl::OneDay => "24h",
            Ttl::SevenDays => "7d",
        };
        f.write_str(label)
    }
}
