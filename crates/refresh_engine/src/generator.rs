//! Query space generation for one refresh cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{InboundPolicy, MonthPair, MonthToken, Query, RouteSpec};
use thiserror::Error;

/// Widest rolling window accepted, in months after the current one.
pub const MAX_WINDOW_MONTHS: u32 = 36;

/// The cycle cannot start; nothing is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("no routes configured")]
    NoRoutes,

    #[error("window of {requested} months exceeds the maximum of {max}")]
    WindowTooWide { requested: u32, max: u32 },
}

/// `start, start+1, …, start+window` (window + 1 months).
pub fn month_window(start: MonthToken, window: u32) -> Vec<MonthToken> {
    (0..=window).map(|offset| start.plus(offset)).collect()
}

/// Every month pair inside the window allowed by `policy`.
pub fn month_pairs(start: MonthToken, window: u32, policy: InboundPolicy) -> Vec<MonthPair> {
    let months = month_window(start, window);
    let mut pairs = Vec::new();

    for (i, &outbound) in months.iter().enumerate() {
        let inbound_months = match policy {
            InboundPolicy::AnyLater => &months[i..],
            InboundPolicy::SameOrNext => &months[i..months.len().min(i + 2)],
        };
        pairs.extend(
            inbound_months
                .iter()
                .filter_map(|&inbound| MonthPair::new(outbound, inbound).ok()),
        );
    }

    pairs
}

/// Full, deduplicated query list for a cycle starting at `now`.
///
/// Route-major order; output size is `unique routes × month pairs`.
pub fn generate(
    now: DateTime<Utc>,
    window: u32,
    routes: &[RouteSpec],
    policy: InboundPolicy,
) -> Result<Vec<Query>, GenerationError> {
    if window > MAX_WINDOW_MONTHS {
        return Err(GenerationError::WindowTooWide {
            requested: window,
            max: MAX_WINDOW_MONTHS,
        });
    }

    let mut seen = HashSet::new();
    let unique_routes: Vec<&RouteSpec> = routes
        .iter()
        .filter(|route| seen.insert((&route.origin.iata, &route.destination.iata)))
        .collect();
    if unique_routes.is_empty() {
        return Err(GenerationError::NoRoutes);
    }

    let pairs = month_pairs(MonthToken::from_date(&now), window, policy);
    let mut queries = Vec::with_capacity(unique_routes.len() * pairs.len());
    for route in unique_routes {
        for months in &pairs {
            queries.push(Query {
                route: route.clone(),
                months: *months,
            });
        }
    }

    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Airport;

    fn routes(codes: &[(&str, &str)]) -> Vec<RouteSpec> {
        codes
            .iter()
            .map(|(from, to)| RouteSpec {
                origin: Airport::new(from, "", "").expect("valid"),
                destination: Airport::new(to, "", "").expect("valid"),
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn expected_pairs(window: u32, policy: InboundPolicy) -> usize {
        let w = window as usize;
        match policy {
            InboundPolicy::AnyLater => (w + 1) * (w + 2) / 2,
            InboundPolicy::SameOrNext => 2 * w + 1,
        }
    }

    #[test]
    fn test_query_count_matches_routes_times_pairs() {
        let routes = routes(&[("POZ", "BKK"), ("WAW", "BKK"), ("KRK", "DXB")]);
        for policy in [InboundPolicy::AnyLater, InboundPolicy::SameOrNext] {
            for window in 0..=12 {
                let queries = generate(now(), window, &routes, policy).expect("generates");
                assert_eq!(
                    queries.len(),
                    routes.len() * expected_pairs(window, policy),
                    "window={window} policy={policy:?}"
                );
                assert!(queries
                    .iter()
                    .all(|q| q.months.inbound() >= q.months.outbound()));
            }
        }
    }

    #[test]
    fn test_zero_window_is_current_month_only() {
        let routes = routes(&[("POZ", "BKK"), ("GDA", "SIN")]);
        let queries = generate(now(), 0, &routes, InboundPolicy::AnyLater).expect("generates");

        let current: MonthToken = "2026-10".parse().expect("month");
        assert_eq!(queries.len(), 2);
        for q in &queries {
            assert_eq!(q.months.outbound(), current);
            assert_eq!(q.months.inbound(), current);
        }
    }

    #[test]
    fn test_window_crosses_year_boundary() {
        let months = month_window("2026-10".parse().expect("month"), 6);
        let rendered: Vec<String> = months.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["2026-10", "2026-11", "2026-12", "2027-01", "2027-02", "2027-03", "2027-04"]
        );
    }

    #[test]
    fn test_same_or_next_pairs() {
        let pairs = month_pairs("2026-11".parse().expect("month"), 2, InboundPolicy::SameOrNext);
        let rendered: Vec<String> = pairs.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "2026-11 → 2026-11",
                "2026-11 → 2026-12",
                "2026-12 → 2026-12",
                "2026-12 → 2027-01",
                "2027-01 → 2027-01",
            ]
        );
    }

    #[test]
    fn test_duplicate_routes_are_dropped() {
        let routes = routes(&[("POZ", "BKK"), ("POZ", "BKK"), ("WAW", "BKK")]);
        let queries = generate(now(), 1, &routes, InboundPolicy::AnyLater).expect("generates");

        assert_eq!(queries.len(), 2 * 3);
        let unique: HashSet<&Query> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len());
    }

    #[test]
    fn test_generation_is_deterministic() {
        let routes = routes(&[("POZ", "BKK"), ("VIE", "IST")]);
        let a = generate(now(), 5, &routes, InboundPolicy::AnyLater).expect("generates");
        let b = generate(now(), 5, &routes, InboundPolicy::AnyLater).expect("generates");
        assert_eq!(a, b);
    }

    #[test]
    fn test_generation_errors() {
        assert_eq!(
            generate(now(), 3, &[], InboundPolicy::AnyLater),
            Err(GenerationError::NoRoutes)
        );
        let routes = routes(&[("POZ", "BKK")]);
        assert_eq!(
            generate(now(), MAX_WINDOW_MONTHS + 1, &routes, InboundPolicy::AnyLater),
            Err(GenerationError::WindowTooWide {
                requested: MAX_WINDOW_MONTHS + 1,
                max: MAX_WINDOW_MONTHS,
            })
        );
    }
}
