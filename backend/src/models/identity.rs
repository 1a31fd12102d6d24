//! Natural-key normalization for sailings.
//!
//! Upstream sources disagree on surrogate IDs, so two sailings are the same
//! sailing only when their [`SailingIdentity`] tuples match. Port names and
//! departure times arrive in several spellings ("Woods Hole" / "wh",
//! "06:00:00" / "6:00 AM"); everything in this module funnels them into one
//! canonical form before any comparison happens.

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{define_id_type, define_name_type};

define_name_type!(OperatorId);
define_name_type!(CorridorId);
define_name_type!(RouteId);
define_id_type!(i64, SailingEventId);

/// Errors raised while normalizing identity components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Port name is empty")]
    EmptyPort,

    #[error("Unrecognized departure time: {0:?}")]
    InvalidTime(String),

    #[error("Template sailings cannot be keyed ({0})")]
    TemplateKeying(String),
}

/// Known shorthand and long-form spellings mapped to their canonical slug.
const PORT_ALIASES: &[(&str, &str)] = &[
    ("wh", "woods-hole"),
    ("woods hole", "woods-hole"),
    ("vh", "vineyard-haven"),
    ("vineyard haven", "vineyard-haven"),
    ("tisbury", "vineyard-haven"),
    ("ob", "oak-bluffs"),
    ("oak bluffs", "oak-bluffs"),
    ("hy", "hyannis"),
    ("hya", "hyannis"),
    ("nan", "nantucket"),
    ("ack", "nantucket"),
    ("nantucket island", "nantucket"),
];

/// Canonical port identifier (`woods-hole`, `vineyard-haven`, ...).
///
/// Only [`PortSlug::normalize`] builds one, so every slug in the system has
/// been through the alias table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSlug(String);

impl PortSlug {
    pub fn normalize(name: &str) -> Result<Self, IdentityError> {
        let lowered = name.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(IdentityError::EmptyPort);
        }

        if let Some((_, slug)) = PORT_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
            return Ok(PortSlug((*slug).to_string()));
        }

        let slug = lowered
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        Ok(PortSlug(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PortSlug {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PortSlug::normalize(&value)
    }
}

impl From<PortSlug> for String {
    fn from(value: PortSlug) -> Self {
        value.0
    }
}

impl FromStr for PortSlug {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PortSlug::normalize(s)
    }
}

/// Wall-clock departure time at minute precision.
///
/// Displays in the canonical key form (`6:00am`, `12:15pm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepartureTime(NaiveTime);

impl DepartureTime {
    /// Parse `HH:MM`, `HH:MM:SS`, `H:MM AM/PM`, `H:MMpm` or `H:MM a.m.`.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::InvalidTime(input.to_string());

        let compact: String = input
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '.')
            .collect();

        let (clock, meridiem) = if let Some(rest) = compact.strip_suffix("am") {
            (rest, Some(false))
        } else if let Some(rest) = compact.strip_suffix("pm") {
            (rest, Some(true))
        } else {
            (compact.as_str(), None)
        };

        let mut parts = clock.split(':');
        let hour = parts
            .next()
            .filter(|h| !h.is_empty() && h.len() <= 2)
            .and_then(|h| h.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let minute = parts
            .next()
            .filter(|m| m.len() == 2)
            .and_then(|m| m.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        if let Some(seconds) = parts.next() {
            let valid = seconds.len() == 2 && seconds.parse::<u32>().map(|s| s < 60).unwrap_or(false);
            if !valid || meridiem.is_some() {
                return Err(invalid());
            }
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        let hour24 = match meridiem {
            Some(pm) => {
                if hour == 0 || hour > 12 {
                    return Err(invalid());
                }
                hour % 12 + if pm { 12 } else { 0 }
            }
            None => hour,
        };

        NaiveTime::from_hms_opt(hour24, minute, 0)
            .map(DepartureTime)
            .ok_or_else(invalid)
    }

    /// Build from a stored wall-clock value, dropping seconds.
    pub fn from_naive(time: NaiveTime) -> Self {
        DepartureTime(time.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(time))
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }

    /// Board-facing 12-hour form, e.g. `6:00 AM`.
    pub fn display_12h(&self) -> String {
        let (hour12, suffix) = self.twelve_hour();
        format!("{}:{:02} {}", hour12, self.0.minute(), suffix.to_ascii_uppercase())
    }

    /// Storage form, e.g. `06:00`.
    pub fn as_24h(&self) -> String {
        format!("{:02}:{:02}", self.0.hour(), self.0.minute())
    }

    fn twelve_hour(&self) -> (u32, &'static str) {
        let hour = self.0.hour();
        let hour12 = match hour % 12 {
            0 => 12,
            h => h,
        };
        (hour12, if hour < 12 { "am" } else { "pm" })
    }
}

impl fmt::Display for DepartureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour12, suffix) = self.twelve_hour();
        write!(f, "{}:{:02}{}", hour12, self.0.minute(), suffix)
    }
}

impl TryFrom<String> for DepartureTime {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DepartureTime::parse(&value)
    }
}

impl From<DepartureTime> for String {
    fn from(value: DepartureTime) -> Self {
        value.to_string()
    }
}

impl FromStr for DepartureTime {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DepartureTime::parse(s)
    }
}

/// Canonical matching key `from|to|time`.
///
/// No `Deserialize` and no string constructor: a key can only come from
/// normalized components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SailingKey(String);

impl SailingKey {
    pub fn new(from: &PortSlug, to: &PortSlug, departure: &DepartureTime) -> Self {
        SailingKey(format!("{}|{}|{}", from, to, departure))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SailingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural key of one sailing. Equality is defined by this tuple only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SailingIdentity {
    pub operator_id: OperatorId,
    pub corridor_id: CorridorId,
    pub from_port: PortSlug,
    pub to_port: PortSlug,
    pub service_date: NaiveDate,
    pub departure_time: DepartureTime,
}

impl SailingIdentity {
    /// Build an identity from raw upstream strings.
    pub fn parse(
        operator_id: impl Into<OperatorId>,
        corridor_id: impl Into<CorridorId>,
        from_port: &str,
        to_port: &str,
        service_date: NaiveDate,
        departure_time: &str,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            operator_id: operator_id.into(),
            corridor_id: corridor_id.into(),
            from_port: PortSlug::normalize(from_port)?,
            to_port: PortSlug::normalize(to_port)?,
            service_date,
            departure_time: DepartureTime::parse(departure_time)?,
        })
    }

    pub fn sailing_key(&self) -> SailingKey {
        SailingKey::new(&self.from_port, &self.to_port, &self.departure_time)
    }
}

pub fn normalize_port_slug(name: &str) -> Result<PortSlug, IdentityError> {
    PortSlug::normalize(name)
}

pub fn normalize_time(time: &str) -> Result<DepartureTime, IdentityError> {
    DepartureTime::parse(time)
}

/// Key raw port names and a raw departure time.
pub fn generate_sailing_key(
    from_port: &str,
    to_port: &str,
    departure_time: &str,
) -> Result<SailingKey, IdentityError> {
    let from = PortSlug::normalize(from_port)?;
    let to = PortSlug::normalize(to_port)?;
    let departure = DepartureTime::parse(departure_time)?;
    Ok(SailingKey::new(&from, &to, &departure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_port_aliases_and_spacing() {
        assert_eq!(normalize_port_slug("Woods Hole").unwrap().as_str(), "woods-hole");
        assert_eq!(normalize_port_slug("  WH ").unwrap().as_str(), "woods-hole");
        assert_eq!(normalize_port_slug("ACK").unwrap().as_str(), "nantucket");
        assert_eq!(normalize_port_slug("oak-bluffs").unwrap().as_str(), "oak-bluffs");
        assert_eq!(
            normalize_port_slug("New   Bedford").unwrap().as_str(),
            "new-bedford"
        );
        assert_eq!(normalize_port_slug("   "), Err(IdentityError::EmptyPort));
    }

    #[test]
    fn test_time_forms_share_canonical_output() {
        for input in ["06:00:00", "06:00", "6:00 AM", "6:00am", "6:00 a.m."] {
            assert_eq!(normalize_time(input).unwrap().to_string(), "6:00am", "input {input}");
        }
        assert_eq!(normalize_time("12:15 PM").unwrap().to_string(), "12:15pm");
        assert_eq!(normalize_time("00:30").unwrap().to_string(), "12:30am");
        assert_eq!(normalize_time("12:30 AM").unwrap().to_string(), "12:30am");
        assert_eq!(normalize_time("21:45:00").unwrap().to_string(), "9:45pm");
    }

    #[test]
    fn test_time_rejects_garbage() {
        for input in ["", "6", "6:0", "25:00", "13:00 PM", "0:15 AM", "6:00:00 AM", "6:00:75", "noon"] {
            assert!(normalize_time(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_display_forms() {
        let t = normalize_time("18:05").unwrap();
        assert_eq!(t.display_12h(), "6:05 PM");
        assert_eq!(t.as_24h(), "18:05");
    }

    #[test]
    fn test_key_symmetry() {
        let a = generate_sailing_key("Woods Hole", "Vineyard Haven", "6:00 AM").unwrap();
        let b = generate_sailing_key("woods-hole", "vineyard-haven", "06:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "woods-hole|vineyard-haven|6:00am");
    }

    #[test]
    fn test_identity_key_matches_free_function() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        let identity =
            SailingIdentity::parse("SSA", "hyannis-nantucket", "HY", "NAN", date, "8:15 AM").unwrap();
        assert_eq!(identity.operator_id.as_str(), "ssa");
        assert_eq!(
            identity.sailing_key(),
            generate_sailing_key("hyannis", "nantucket", "08:15:00").unwrap()
        );
    }

    #[test]
    fn test_serde_round_trip_normalizes() {
        let slug: PortSlug = serde_json::from_str("\"Oak Bluffs\"").unwrap();
        assert_eq!(slug.as_str(), "oak-bluffs");
        let time: DepartureTime = serde_json::from_str("\"07:30:00\"").unwrap();
        assert_eq!(serde_json::to_string(&time).unwrap(), "\"7:30am\"");
    }

    proptest! {
        #[test]
        fn prop_12h_and_24h_keys_agree(hour in 0u32..24, minute in 0u32..60) {
            let h12 = match hour % 12 { 0 => 12, h => h };
            let suffix = if hour < 12 { "AM" } else { "PM" };
            let twelve = format!("{}:{:02} {}", h12, minute, suffix);
            let twenty_four = format!("{:02}:{:02}:00", hour, minute);
            let a = generate_sailing_key("Hyannis", "Nantucket", &twelve).unwrap();
            let b = generate_sailing_key("hy", "ack", &twenty_four).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
