//! Domain types shared across the fare engine.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

use crate::Error;

// ── Reference data ────────────────────────────────────────────────────

/// Three-letter IATA airport code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IataCode(String);

impl IataCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IataCode {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(Error::InvalidValue(format!(
                "IATA code must be three letters, got {raw:?}"
            )))
        }
    }
}

impl FromStr for IataCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<IataCode> for String {
    fn from(code: IataCode) -> Self {
        code.0
    }
}

impl fmt::Display for IataCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An airport from the static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Airport {
    pub iata: IataCode,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
}

impl Airport {
    pub fn new(iata: &str, country: &str, city: &str) -> Result<Self, Error> {
        Ok(Self {
            iata: iata.parse()?,
            country: country.into(),
            city: city.into(),
        })
    }
}

/// Ordered (origin, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteSpec {
    pub origin: Airport,
    pub destination: Airport,
}

impl RouteSpec {
    /// Cross-product of origins and destinations.
    ///
    /// Self-routes and repeated pairs are skipped; the first occurrence keeps
    /// its position.
    pub fn cross_product(origins: &[Airport], destinations: &[Airport]) -> Vec<RouteSpec> {
        let mut seen = std::collections::HashSet::new();
        let mut routes = Vec::with_capacity(origins.len() * destinations.len());
        for origin in origins {
            for destination in destinations {
                if origin.iata == destination.iata {
                    continue;
                }
                if seen.insert((origin.iata.clone(), destination.iata.clone())) {
                    routes.push(RouteSpec {
                        origin: origin.clone(),
                        destination: destination.clone(),
                    });
                }
            }
        }
        routes
    }

    /// `ORIGIN-DESTINATION`, e.g. `POZ-BKK`.
    pub fn code(&self) -> String {
        format!("{}-{}", self.origin.iata, self.destination.iata)
    }
}

// ── Months ────────────────────────────────────────────────────────────

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthToken {
    year: i32,
    month: u8,
}

impl MonthToken {
    pub fn new(year: i32, month: u8) -> Result<Self, Error> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidValue(format!("month must be 1-12, got {month}")));
        }
        Ok(Self { year, month })
    }

    /// Month containing the given date.
    pub fn from_date<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month() as u8,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn succ(self) -> Self {
        self.plus(1)
    }

    /// Advance by `months` calendar months.
    pub fn plus(self, months: u32) -> Self {
        let index = self.year as i64 * 12 + (self.month as i64 - 1) + months as i64;
        Self {
            year: index.div_euclid(12) as i32,
            month: (index.rem_euclid(12) + 1) as u8,
        }
    }

    /// First day of the month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, 1)
    }
}

impl fmt::Display for MonthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidValue(format!("month must look like YYYY-MM, got {s:?}"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u8>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for MonthToken {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<MonthToken> for String {
    fn from(month: MonthToken) -> Self {
        month.to_string()
    }
}

/// Outbound/inbound month pair; `inbound >= outbound` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MonthPair {
    outbound: MonthToken,
    inbound: MonthToken,
}

impl MonthPair {
    pub fn new(outbound: MonthToken, inbound: MonthToken) -> Result<Self, Error> {
        if inbound < outbound {
            return Err(Error::InvalidValue(format!(
                "inbound month {inbound} precedes outbound month {outbound}"
            )));
        }
        Ok(Self { outbound, inbound })
    }

    pub fn outbound(&self) -> MonthToken {
        self.outbound
    }

    pub fn inbound(&self) -> MonthToken {
        self.inbound
    }
}

impl fmt::Display for MonthPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.outbound, self.inbound)
    }
}

/// How inbound months are paired with an outbound month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundPolicy {
    /// Every month from the outbound month to the end of the window.
    #[default]
    AnyLater,
    /// The outbound month itself or the month after it.
    SameOrNext,
}

// ── Queries and outcomes ──────────────────────────────────────────────

/// One upstream call: a route and a month pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Query {
    pub route: RouteSpec,
    pub months: MonthPair,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {} {}",
            self.route.origin.iata, self.route.destination.iata, self.months
        )
    }
}

/// Extra data recovered from the cheapest grid cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FareDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_date: Option<NaiveDate>,
}

impl FareDetails {
    /// Days between outbound and inbound departures.
    pub fn stay_days(&self) -> Option<i64> {
        Some((self.inbound_date? - self.outbound_date?).num_days())
    }
}

/// A usable minimum price for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    /// Non-negative amount in the upstream currency.
    pub min_price: f64,
    #[serde(default)]
    pub details: FareDetails,
}

/// Why a query failed once its retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchErrorKind {
    Transport,
    Status(u16),
    MalformedBody,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transport => f.write_str("transport"),
            FetchErrorKind::Status(code) => write!(f, "status:{code}"),
            FetchErrorKind::MalformedBody => f.write_str("malformed-body"),
        }
    }
}

impl Serialize for FetchErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Normalized result of executing one query.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Priced { query: Query, quote: FareQuote },
    /// Well-formed response without a usable price.
    NoPrice { query: Query },
    Failed { query: Query, error: FetchErrorKind },
}

impl FetchOutcome {
    pub fn query(&self) -> &Query {
        match self {
            FetchOutcome::Priced { query, .. }
            | FetchOutcome::NoPrice { query }
            | FetchOutcome::Failed { query, .. } => query,
        }
    }

    pub fn price(&self) -> Option<f64> {
        match self {
            FetchOutcome::Priced { quote, .. } => Some(quote.min_price),
            _ => None,
        }
    }
}

// ── Grouping ──────────────────────────────────────────────────────────

/// Bucket name for top-K retention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Projection from a query to its [`GroupKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// `POZ-BKK`
    #[default]
    Route,
    /// `POZ-BKK:2026-10`
    RouteMonth,
    /// `BKK`
    Destination,
    /// `Thailand`
    DestinationCountry,
}

impl GroupBy {
    pub fn key(&self, query: &Query) -> GroupKey {
        match self {
            GroupBy::Route => GroupKey(query.route.code()),
            GroupBy::RouteMonth => GroupKey(format!(
                "{}:{}",
                query.route.code(),
                query.months.outbound()
            )),
            GroupBy::Destination => GroupKey(query.route.destination.iata.to_string()),
            GroupBy::DestinationCountry => {
                GroupKey(query.route.destination.country.clone())
            }
        }
    }
}
