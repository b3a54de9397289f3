//! Month-view response schema and price normalization.
//!
//! The upstream answers a calendar request with one of two shapes: a grid of
//! date-indexed cells (`PriceGrids.Grid`) or a bare aggregate (`MinPrice`).
//! Both are validated here and reduced to a single optional [`FareQuote`].

use std::collections::HashMap;

use chrono::NaiveDate;
use common::{FareDetails, FareQuote};
use serde::Deserialize;

use crate::FetchError;

/// A validated month-view body.
#[derive(Debug, Clone)]
pub enum MonthViewResponse {
    Grid(GridResponse),
    Aggregate(AggregateResponse),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridResponse {
    #[serde(rename = "PriceGrids")]
    pub price_grids: PriceGrids,
    /// Trace id → `*`-separated itinerary descriptor.
    #[serde(rename = "Traces", default)]
    pub traces: HashMap<String, String>,
    /// Some bodies carry the aggregate next to the grid.
    #[serde(rename = "MinPrice", default)]
    pub min_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceGrids {
    #[serde(rename = "Grid")]
    pub grid: Vec<Vec<Option<GridCell>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridCell {
    #[serde(rename = "Direct", default)]
    pub direct: Option<CellQuote>,
    #[serde(rename = "Indirect", default)]
    pub indirect: Option<CellQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellQuote {
    #[serde(rename = "Price", default)]
    pub price: Option<f64>,
    #[serde(rename = "TraceRefs", default)]
    pub trace_refs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateResponse {
    #[serde(rename = "MinPrice")]
    pub min_price: Option<f64>,
}

fn usable_price(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p >= 0.0)
}

/// Departure date of the leg in `...*...*ORIGIN*DESTINATION*YYYYMMDD*...`.
pub fn trace_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.split('*');
    let date_field = parts.nth(4)?;
    NaiveDate::parse_from_str(date_field.get(..8)?, "%Y%m%d").ok()
}

impl MonthViewResponse {
    /// Validate a raw body against the two known shapes.
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| FetchError::Malformed(format!("invalid JSON: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(FetchError::Malformed("expected a JSON object".into()));
        };

        if object.contains_key("PriceGrids") {
            serde_json::from_value(value)
                .map(MonthViewResponse::Grid)
                .map_err(|e| FetchError::Malformed(format!("bad price grid: {e}")))
        } else if object.contains_key("MinPrice") {
            serde_json::from_value(value)
                .map(MonthViewResponse::Aggregate)
                .map_err(|e| FetchError::Malformed(format!("bad MinPrice: {e}")))
        } else {
            Err(FetchError::Malformed(
                "neither PriceGrids nor MinPrice present".into(),
            ))
        }
    }

    /// Minimum usable price, or `None` when the body carries no price.
    pub fn normalize(&self) -> Option<FareQuote> {
        match self {
            MonthViewResponse::Grid(grid) => grid
                .cheapest()
                .or_else(|| aggregate_quote(grid.min_price)),
            MonthViewResponse::Aggregate(agg) => aggregate_quote(agg.min_price),
        }
    }
}

fn aggregate_quote(price: Option<f64>) -> Option<FareQuote> {
    usable_price(price).map(|min_price| FareQuote {
        min_price,
        details: FareDetails::default(),
    })
}

impl GridResponse {
    fn cheapest(&self) -> Option<FareQuote> {
        let mut best: Option<(f64, bool, &CellQuote)> = None;

        let quotes = self
            .price_grids
            .grid
            .iter()
            .flatten()
            .flatten()
            .flat_map(|cell| {
                [(true, cell.direct.as_ref()), (false, cell.indirect.as_ref())]
            });

        for (direct, quote) in quotes {
            let Some(quote) = quote else { continue };
            let Some(price) = usable_price(quote.price) else {
                continue;
            };
            if best.map_or(true, |(current, _, _)| price < current) {
                best = Some((price, direct, quote));
            }
        }

        let (min_price, direct, quote) = best?;
        let leg = |idx: usize| {
            quote
                .trace_refs
                .get(idx)
                .and_then(|id| self.traces.get(id))
                .and_then(|raw| trace_date(raw))
        };

        Some(FareQuote {
            min_price,
            details: FareDetails {
                direct: Some(direct),
                outbound_date: leg(0),
                inbound_date: leg(1),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_sample() -> &'static str {
        r#"{
            "PriceGrids": {
                "Grid": [
                    [
                        null,
                        {"Indirect": {"Price": 2410, "TraceRefs": ["t1", "t2"]}},
                        {}
                    ],
                    [
                        {"Direct": {"Price": 3100, "TraceRefs": ["t3", "t4"]}},
                        {"Indirect": {"Price": 1985.5, "TraceRefs": ["t5", "t6"]}},
                        {"Indirect": {"Price": -1}}
                    ]
                ]
            },
            "Traces": {
                "t5": "202610211235*I*WAW*BKK*20261103*qatr|qatr",
                "t6": "202610211235*I*BKK*WAW*20261117*qatr|qatr"
            }
        }"#
    }

    #[test]
    fn test_grid_minimum_across_cells() {
        let parsed = MonthViewResponse::parse(grid_sample().as_bytes()).expect("grid parses");
        assert!(matches!(parsed, MonthViewResponse::Grid(_)));

        let quote = parsed.normalize().expect("grid has a price");
        assert!((quote.min_price - 1985.5).abs() < f64::EPSILON);
        assert_eq!(quote.details.direct, Some(false));
        assert_eq!(quote.details.outbound_date, NaiveDate::from_ymd_opt(2026, 11, 3));
        assert_eq!(quote.details.inbound_date, NaiveDate::from_ymd_opt(2026, 11, 17));
        assert_eq!(quote.details.stay_days(), Some(14));
    }

    #[test]
    fn test_grid_without_prices_is_no_price() {
        let body = r#"{"PriceGrids": {"Grid": [[null, {}], [{"Indirect": {"TraceRefs": []}}]]}}"#;
        let parsed = MonthViewResponse::parse(body.as_bytes()).expect("grid parses");
        assert!(parsed.normalize().is_none());
    }

    #[test]
    fn test_aggregate_min_price() {
        let parsed = MonthViewResponse::parse(br#"{"MinPrice": 1299}"#).expect("aggregate parses");
        let quote = parsed.normalize().expect("aggregate has a price");
        assert!((quote.min_price - 1299.0).abs() < f64::EPSILON);
        assert_eq!(quote.details, FareDetails::default());
    }

    #[test]
    fn test_aggregate_null_is_no_price() {
        let parsed = MonthViewResponse::parse(br#"{"MinPrice": null}"#).expect("aggregate parses");
        assert!(parsed.normalize().is_none());
    }

    #[test]
    fn test_empty_grid_falls_back_to_min_price() {
        let body = br#"{"PriceGrids": {"Grid": [[{}]]}, "MinPrice": 1200}"#;
        let parsed = MonthViewResponse::parse(body).expect("grid parses");
        assert!(matches!(parsed, MonthViewResponse::Grid(_)));

        let quote = parsed.normalize().expect("aggregate used");
        assert!((quote.min_price - 1200.0).abs() < f64::EPSILON);
        assert_eq!(quote.details, FareDetails::default());

        let body = br#"{"PriceGrids": {"Grid": [[{"Direct": {"Price": 950}}]]}, "MinPrice": 1200}"#;
        let quote = MonthViewResponse::parse(body)
            .expect("grid parses")
            .normalize()
            .expect("grid priced");
        assert!((quote.min_price - 950.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_schema_mismatches_are_malformed() {
        for body in [
            &b"not json"[..],
            br#"[1, 2, 3]"#,
            br#"{}"#,
            br#"{"Quotes": []}"#,
            br#"{"MinPrice": "cheap"}"#,
            br#"{"PriceGrids": {"Rows": []}}"#,
        ] {
            let err = MonthViewResponse::parse(body).expect_err("should be rejected");
            assert!(matches!(err, FetchError::Malformed(_)), "unexpected error: {err:?}");
        }
    }

    #[test]
    fn test_equal_prices_keep_first_cell() {
        let body = r#"{
            "PriceGrids": {"Grid": [[
                {"Direct": {"Price": 900, "TraceRefs": ["a", "b"]}},
                {"Indirect": {"Price": 900, "TraceRefs": ["c", "d"]}}
            ]]},
            "Traces": {"a": "x*D*POZ*DOH*20261201", "c": "x*I*POZ*DOH*20261205"}
        }"#;
        let quote = MonthViewResponse::parse(body.as_bytes())
            .expect("grid parses")
            .normalize()
            .expect("priced");
        assert_eq!(quote.details.direct, Some(true));
        assert_eq!(quote.details.outbound_date, NaiveDate::from_ymd_opt(2026, 12, 1));
        assert_eq!(quote.details.inbound_date, None);
    }

    #[test]
    fn test_trace_date() {
        assert_eq!(
            trace_date("202610211235*I*KRK*DXB*20270114*wizz|wizz"),
            NaiveDate::from_ymd_opt(2027, 1, 14)
        );
        assert!(trace_date("too*short").is_none());
        assert!(trace_date("a*b*KRK*DXB*2027").is_none());
        assert!(trace_date("a*b*KRK*DXB*2027-01-14").is_none());
    }
}
