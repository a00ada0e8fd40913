//! Range expression parsing, encoding, and the byte-range overlap test.
//!
//! A range string parses to a disjunction of conjunctions of comparators
//! (`^`/`~`/wildcard/hyphen sugar is desugared at parse time). The write
//! side encodes each conjunction into sets of packed lower/upper bounds;
//! the read side normalizes a query range into a single half-open interval
//! over packed versions, with sentinels filling unbounded sides.
//!
//! The encoding is deliberately lossy: `>` is kept inclusive at the byte
//! level and `<=` exclusive, so the overlap test can only over-approximate.
//! That is safe — no false negatives — because latest-path candidates are
//! re-validated against the authoritative manifest before they are emitted.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::version::{
    inc_patch, pack, pack_version, parse_loose, Precision, HIGHEST, LOWEST,
};

/// Error for query ranges the index cannot serve: disjunctions, unsupported
/// comparator shapes, or unparseable input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidQueryRange(String);

impl InvalidQueryRange {
    fn new(msg: impl Into<String>) -> Self {
        InvalidQueryRange(msg.into())
    }
}

impl std::fmt::Display for InvalidQueryRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid query range: {}", self.0)
    }
}

impl std::error::Error for InvalidQueryRange {}

// ============================================================================
// Comparator Model
// ============================================================================

/// Comparator operator. `Any` is the unset operator that matches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Any,
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// An (operator, version) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    pub op: CompOp,
    pub version: Version,
}

impl Comparator {
    fn new(op: CompOp, version: Version) -> Self {
        Comparator { op, version }
    }

    fn any() -> Self {
        Comparator::new(CompOp::Any, Version::new(0, 0, 0))
    }
}

/// A parsed range expression: a disjunction of conjunctions of comparators.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeExpr {
    pub groups: Vec<Vec<Comparator>>,
}

// ============================================================================
// Parsing
// ============================================================================

impl RangeExpr {
    /// Parse an npm-style range string.
    ///
    /// `||` separates disjunction groups; whitespace separates conjoined
    /// comparators within a group. Sugar forms desugar to plain comparators:
    /// - `*` / `x` / empty → the unset comparator
    /// - `^1.2.3` → `>=1.2.3 <2.0.0` (with the usual 0.x special cases)
    /// - `~1.2.3` → `>=1.2.3 <1.3.0`
    /// - `1.x`, `1.2.x`, bare `1`, bare `1.2` → the matching x-range
    /// - `1.0.0 - 2.0.0` → `>=1.0.0 <=2.0.0`
    /// - bare full version → `=`
    ///
    /// Returns `None` for anything that does not parse.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let groups: Option<Vec<Vec<Comparator>>> =
            spec.split("||").map(parse_conjunction).collect();
        let groups = groups?;
        if groups.is_empty() {
            return None;
        }
        Some(RangeExpr { groups })
    }
}

fn parse_conjunction(part: &str) -> Option<Vec<Comparator>> {
    let part = part.trim();
    if part.is_empty() {
        return Some(vec![Comparator::any()]);
    }

    // Hyphen ranges contain a space-delimited dash and would otherwise be
    // split apart by the whitespace tokenizer.
    if let Some(comparators) = parse_hyphen(part) {
        return Some(comparators);
    }

    let mut comparators = Vec::new();
    for token in part.split_whitespace() {
        comparators.extend(parse_token(token)?);
    }
    Some(comparators)
}

/// Parse a hyphen range like `1.0.0 - 2.0.0` into `>=lo <=hi`.
///
/// A partial upper bound widens to the end of its precision, so
/// `1.0.0 - 2.3` means `>=1.0.0 <2.4.0`.
fn parse_hyphen(spec: &str) -> Option<Vec<Comparator>> {
    let (lo, hi) = spec.split_once(" - ")?;
    let (lo, _) = parse_loose(lo)?;
    let (hi, precision) = parse_loose(hi)?;

    let upper = match precision {
        Precision::Full => Comparator::new(CompOp::Lte, hi),
        Precision::Minor => Comparator::new(CompOp::Lt, Version::new(hi.major, hi.minor + 1, 0)),
        Precision::Major => Comparator::new(CompOp::Lt, Version::new(hi.major + 1, 0, 0)),
    };
    Some(vec![Comparator::new(CompOp::Gte, lo), upper])
}

fn parse_token(token: &str) -> Option<Vec<Comparator>> {
    if token == "*" || token.eq_ignore_ascii_case("x") {
        return Some(vec![Comparator::any()]);
    }

    if let Some(rest) = token.strip_prefix(">=") {
        let (v, _) = parse_loose(rest)?;
        return Some(vec![Comparator::new(CompOp::Gte, v)]);
    }
    if let Some(rest) = token.strip_prefix("<=") {
        let (v, _) = parse_loose(rest)?;
        return Some(vec![Comparator::new(CompOp::Lte, v)]);
    }
    if let Some(rest) = token.strip_prefix('>') {
        let (v, _) = parse_loose(rest)?;
        return Some(vec![Comparator::new(CompOp::Gt, v)]);
    }
    if let Some(rest) = token.strip_prefix('<') {
        let (v, _) = parse_loose(rest)?;
        return Some(vec![Comparator::new(CompOp::Lt, v)]);
    }
    if let Some(rest) = token.strip_prefix('=') {
        let (v, _) = parse_loose(rest)?;
        return Some(vec![Comparator::new(CompOp::Eq, v)]);
    }
    if let Some(rest) = token.strip_prefix('^') {
        let (v, precision) = parse_loose(rest)?;
        return Some(caret(v, precision));
    }
    if let Some(rest) = token.strip_prefix('~') {
        let (v, precision) = parse_loose(rest)?;
        return Some(tilde(v, precision));
    }

    // Wildcard components: 1.x, 1.2.x, 1.*
    if let Some(comparators) = parse_wildcard(token) {
        return Some(comparators);
    }

    let (v, precision) = parse_loose(token)?;
    match precision {
        Precision::Full => Some(vec![Comparator::new(CompOp::Eq, v)]),
        // Bare partials are x-ranges: "1.2" matches 1.2.x.
        _ => Some(x_range(v, precision)),
    }
}

fn parse_wildcard(token: &str) -> Option<Vec<Comparator>> {
    let is_x = |s: &str| s == "*" || s.eq_ignore_ascii_case("x");
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [ma, x] if is_x(x) => {
            let major = ma.parse::<u64>().ok()?;
            Some(x_range(Version::new(major, 0, 0), Precision::Major))
        }
        [ma, mi, x] if is_x(x) => {
            let major = ma.parse::<u64>().ok()?;
            let minor = mi.parse::<u64>().ok()?;
            Some(x_range(Version::new(major, minor, 0), Precision::Minor))
        }
        _ => None,
    }
}

fn x_range(v: Version, precision: Precision) -> Vec<Comparator> {
    let upper = match precision {
        Precision::Major => Version::new(v.major + 1, 0, 0),
        _ => Version::new(v.major, v.minor + 1, 0),
    };
    vec![
        Comparator::new(CompOp::Gte, v),
        Comparator::new(CompOp::Lt, upper),
    ]
}

fn caret(v: Version, precision: Precision) -> Vec<Comparator> {
    let upper = if v.major > 0 {
        Version::new(v.major + 1, 0, 0)
    } else if precision == Precision::Major {
        // ^0 allows any 0.x.y
        Version::new(1, 0, 0)
    } else if v.minor > 0 || precision == Precision::Minor {
        Version::new(0, v.minor + 1, 0)
    } else {
        // ^0.0.p pins to the single patch
        Version::new(0, 0, v.patch + 1)
    };
    vec![
        Comparator::new(CompOp::Gte, v),
        Comparator::new(CompOp::Lt, upper),
    ]
}

fn tilde(v: Version, precision: Precision) -> Vec<Comparator> {
    let upper = match precision {
        Precision::Major => Version::new(v.major + 1, 0, 0),
        _ => Version::new(v.major, v.minor + 1, 0),
    };
    vec![
        Comparator::new(CompOp::Gte, v),
        Comparator::new(CompOp::Lt, upper),
    ]
}

// ============================================================================
// Write-side Encoding
// ============================================================================

/// Packed bounds of one conjunction group.
///
/// Every lower must sit strictly below a query's upper bound and every
/// upper strictly above its lower bound for the group to overlap.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RangeGroup {
    pub lowers: Vec<String>,
    pub uppers: Vec<String>,
}

/// The persisted encoding of a range expression: a disjunction of packed
/// bound groups. Disjunctions are preserved on the write side.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RangeSets {
    pub groups: Vec<RangeGroup>,
}

/// Encode a parsed range expression into packed bound sets.
pub fn encode_range(expr: &RangeExpr) -> RangeSets {
    let groups = expr
        .groups
        .iter()
        .map(|comparators| {
            let mut group = RangeGroup {
                lowers: Vec::new(),
                uppers: Vec::new(),
            };
            for c in comparators {
                match c.op {
                    CompOp::Any => group.lowers.push(pack(0, 0, 0)),
                    CompOp::Eq => {
                        group.lowers.push(pack_version(&c.version));
                        group.uppers.push(pack_version(&inc_patch(&c.version)));
                    }
                    CompOp::Gt | CompOp::Gte => group.lowers.push(pack_version(&c.version)),
                    CompOp::Lt | CompOp::Lte => group.uppers.push(pack_version(&c.version)),
                }
            }
            group
        })
        .collect();
    RangeSets { groups }
}

/// Parse and encode a declared dependency range.
///
/// Returns `None` when the range does not parse; the write side drops that
/// single dependency from the index and stores the manifest regardless.
pub fn encode_range_str(spec: &str) -> Option<RangeSets> {
    RangeExpr::parse(spec).map(|expr| encode_range(&expr))
}

// ============================================================================
// Read-side Normalization
// ============================================================================

/// A query range normalized to a half-open `[lower, upper)` interval over
/// packed versions. Unbounded sides carry the sentinels. `wildcard` marks
/// fully-open ranges that bypass overlap filtering entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInterval {
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
    pub wildcard: bool,
}

impl QueryInterval {
    fn wildcard() -> Self {
        QueryInterval {
            lower: LOWEST.to_vec(),
            upper: HIGHEST.to_vec(),
            wildcard: true,
        }
    }

    fn bounded(lower: Vec<u8>, upper: Vec<u8>) -> Self {
        QueryInterval {
            lower,
            upper,
            wildcard: false,
        }
    }
}

/// Normalize a query range string into a single packed interval.
///
/// Disjunctions, more than two comparators, and conjunction shapes other
/// than (lower, upper) are rejected with [`InvalidQueryRange`].
pub fn normalize_query(spec: &str) -> Result<QueryInterval, InvalidQueryRange> {
    let expr = RangeExpr::parse(spec)
        .ok_or_else(|| InvalidQueryRange::new(format!("unparseable range '{}'", spec)))?;

    if expr.groups.len() != 1 {
        return Err(InvalidQueryRange::new(format!(
            "range '{}' is a disjunction",
            spec
        )));
    }
    let group = &expr.groups[0];

    match group.as_slice() {
        [] => Ok(QueryInterval::wildcard()),
        [c] => Ok(match c.op {
            CompOp::Any => QueryInterval::wildcard(),
            CompOp::Eq => QueryInterval::bounded(
                pack_version(&c.version).into_bytes(),
                pack_version(&inc_patch(&c.version)).into_bytes(),
            ),
            CompOp::Gt | CompOp::Gte => {
                QueryInterval::bounded(pack_version(&c.version).into_bytes(), HIGHEST.to_vec())
            }
            CompOp::Lt | CompOp::Lte => {
                QueryInterval::bounded(LOWEST.to_vec(), pack_version(&c.version).into_bytes())
            }
        }),
        [lo, hi] => {
            let lower = match lo.op {
                CompOp::Gte => pack_version(&lo.version),
                CompOp::Gt => pack_version(&inc_patch(&lo.version)),
                _ => {
                    return Err(InvalidQueryRange::new(format!(
                        "range '{}' must start with a lower comparator",
                        spec
                    )))
                }
            };
            let upper = match hi.op {
                CompOp::Lt => pack_version(&hi.version),
                CompOp::Lte => pack_version(&inc_patch(&hi.version)),
                _ => {
                    return Err(InvalidQueryRange::new(format!(
                        "range '{}' must end with an upper comparator",
                        spec
                    )))
                }
            };
            Ok(QueryInterval::bounded(lower.into_bytes(), upper.into_bytes()))
        }
        _ => Err(InvalidQueryRange::new(format!(
            "range '{}' has more than two comparators",
            spec
        ))),
    }
}

// ============================================================================
// Overlap Test
// ============================================================================

/// Conservative overlap test between stored bound sets and a query interval.
///
/// A group overlaps unless it is upper-open against a closed-at-top query,
/// lower-open against a closed-at-bottom query, or one of its bounds falls
/// outside the interval. Comparisons are bytewise.
pub fn overlaps(sets: &RangeSets, interval: &QueryInterval) -> bool {
    sets.groups.iter().any(|group| {
        if group.uppers.is_empty() && interval.lower.as_slice() >= HIGHEST {
            return false;
        }
        if group.lowers.is_empty() && interval.upper.as_slice() <= LOWEST {
            return false;
        }
        group
            .lowers
            .iter()
            .all(|l| interval.upper.as_slice() > l.as_bytes())
            && group
                .uppers
                .iter()
                .all(|u| interval.lower.as_slice() < u.as_bytes())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comparator(op: CompOp, major: u64, minor: u64, patch: u64) -> Comparator {
        Comparator::new(op, Version::new(major, minor, patch))
    }

    #[test]
    fn test_parse_primitives() {
        let expr = RangeExpr::parse(">=1.2.0 <2.0.0").unwrap();
        assert_eq!(
            expr.groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 2, 0),
                comparator(CompOp::Lt, 2, 0, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("1.2.3").unwrap().groups,
            vec![vec![comparator(CompOp::Eq, 1, 2, 3)]]
        );
        assert_eq!(
            RangeExpr::parse("=1.2.3").unwrap().groups,
            vec![vec![comparator(CompOp::Eq, 1, 2, 3)]]
        );
    }

    #[test]
    fn test_parse_caret() {
        assert_eq!(
            RangeExpr::parse("^1.2.3").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 2, 3),
                comparator(CompOp::Lt, 2, 0, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("^0.2.3").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 0, 2, 3),
                comparator(CompOp::Lt, 0, 3, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("^0.0.3").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 0, 0, 3),
                comparator(CompOp::Lt, 0, 0, 4),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("^0").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 0, 0, 0),
                comparator(CompOp::Lt, 1, 0, 0),
            ]]
        );
    }

    #[test]
    fn test_parse_tilde_and_wildcards() {
        assert_eq!(
            RangeExpr::parse("~2.3.0").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 2, 3, 0),
                comparator(CompOp::Lt, 2, 4, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("~1").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 0, 0),
                comparator(CompOp::Lt, 2, 0, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("1.x").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 0, 0),
                comparator(CompOp::Lt, 2, 0, 0),
            ]]
        );
        assert_eq!(
            RangeExpr::parse("1.2.x").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 2, 0),
                comparator(CompOp::Lt, 1, 3, 0),
            ]]
        );
        // Bare partials behave like x-ranges.
        assert_eq!(
            RangeExpr::parse("1.2").unwrap().groups,
            RangeExpr::parse("1.2.x").unwrap().groups
        );
        assert_eq!(
            RangeExpr::parse("*").unwrap().groups,
            vec![vec![Comparator::any()]]
        );
        assert_eq!(
            RangeExpr::parse("").unwrap().groups,
            vec![vec![Comparator::any()]]
        );
    }

    #[test]
    fn test_parse_hyphen_and_disjunction() {
        assert_eq!(
            RangeExpr::parse("1.0.0 - 2.0.0").unwrap().groups,
            vec![vec![
                comparator(CompOp::Gte, 1, 0, 0),
                comparator(CompOp::Lte, 2, 0, 0),
            ]]
        );
        let expr = RangeExpr::parse("^1.0.0 || ^2.0.0").unwrap();
        assert_eq!(expr.groups.len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RangeExpr::parse("not-a-range").is_none());
        assert!(RangeExpr::parse(">=1.2.3 garbage").is_none());
    }

    #[test]
    fn test_encode_shapes() {
        let sets = encode_range_str("^1.2.0").unwrap();
        assert_eq!(sets.groups.len(), 1);
        assert_eq!(sets.groups[0].lowers, vec![pack(1, 2, 0)]);
        assert_eq!(sets.groups[0].uppers, vec![pack(2, 0, 0)]);

        let sets = encode_range_str(">=1.0.0").unwrap();
        assert_eq!(sets.groups[0].lowers, vec![pack(1, 0, 0)]);
        assert!(sets.groups[0].uppers.is_empty());

        let sets = encode_range_str("1.2.3").unwrap();
        assert_eq!(sets.groups[0].lowers, vec![pack(1, 2, 3)]);
        assert_eq!(sets.groups[0].uppers, vec![pack(1, 2, 4)]);

        let sets = encode_range_str("*").unwrap();
        assert_eq!(sets.groups[0].lowers, vec![pack(0, 0, 0)]);
        assert!(sets.groups[0].uppers.is_empty());

        // Disjunctions are preserved on the write side.
        let sets = encode_range_str("^1.0.0 || ^2.0.0").unwrap();
        assert_eq!(sets.groups.len(), 2);

        assert!(encode_range_str("not-a-range").is_none());
    }

    #[test]
    fn test_normalize_shapes() {
        let iv = normalize_query("1.5.0").unwrap();
        assert_eq!(iv.lower, pack(1, 5, 0).into_bytes());
        assert_eq!(iv.upper, pack(1, 5, 1).into_bytes());
        assert!(!iv.wildcard);

        let iv = normalize_query(">=1.0.0").unwrap();
        assert_eq!(iv.upper, HIGHEST.to_vec());

        let iv = normalize_query("<2.0.0").unwrap();
        assert_eq!(iv.lower, LOWEST.to_vec());

        // inc_patch applies to > and <= in the two-comparator shape.
        let iv = normalize_query(">1.0.0 <=2.0.0").unwrap();
        assert_eq!(iv.lower, pack(1, 0, 1).into_bytes());
        assert_eq!(iv.upper, pack(2, 0, 1).into_bytes());

        let iv = normalize_query("*").unwrap();
        assert!(iv.wildcard);
        assert_eq!(iv.lower, LOWEST.to_vec());
        assert_eq!(iv.upper, HIGHEST.to_vec());
    }

    #[test]
    fn test_normalize_rejects() {
        assert!(normalize_query("1.0.0 || 2.0.0").is_err());
        assert!(normalize_query("not-a-range").is_err());
        // Backwards conjunction shape.
        assert!(normalize_query("<1.0.0 >2.0.0").is_err());
        // Three comparators.
        assert!(normalize_query(">=1.0.0 <2.0.0 <3.0.0").is_err());
    }

    #[test]
    fn test_overlap_basic() {
        let sets = encode_range_str("^1.2.0").unwrap();
        assert!(overlaps(&sets, &normalize_query("1.5.0").unwrap()));
        assert!(overlaps(&sets, &normalize_query("1.2.0").unwrap()));
        assert!(!overlaps(&sets, &normalize_query("2.0.0").unwrap()));
        assert!(!overlaps(&sets, &normalize_query("1.1.9").unwrap()));
    }

    #[test]
    fn test_overlap_tilde_boundaries() {
        let sets = encode_range_str("~2.3.0").unwrap();
        assert!(overlaps(&sets, &normalize_query("2.3.5").unwrap()));
        assert!(!overlaps(&sets, &normalize_query("2.4.0").unwrap()));
    }

    #[test]
    fn test_overlap_disjunction_any_group() {
        let sets = encode_range_str("^1.0.0 || ^3.0.0").unwrap();
        assert!(overlaps(&sets, &normalize_query("3.1.0").unwrap()));
        assert!(overlaps(&sets, &normalize_query("1.1.0").unwrap()));
        assert!(!overlaps(&sets, &normalize_query("2.0.0").unwrap()));
    }

    #[test]
    fn test_overlap_open_sides() {
        let sets = encode_range_str(">=2.0.0").unwrap();
        assert!(overlaps(&sets, &normalize_query(">=1.0.0").unwrap()));
        assert!(overlaps(&sets, &normalize_query("5.0.0").unwrap()));
        assert!(!overlaps(&sets, &normalize_query("<1.0.0").unwrap()));

        let sets = encode_range_str("<1.0.0").unwrap();
        assert!(overlaps(&sets, &normalize_query("0.5.0").unwrap()));
        assert!(!overlaps(&sets, &normalize_query(">=1.0.0").unwrap()));
    }

    #[test]
    fn test_overlap_never_false_negative_on_shared_version() {
        // If a version satisfies both the stored range and the query range,
        // the byte-level test must report an overlap.
        let cases = [
            ("^1.2.0", "1.5.0"),
            ("~2.3.0", "2.3.9"),
            (">=1.0.0 <2.0.0", "^1.4.0"),
            ("*", "0.0.1"),
            ("1.0.0 - 3.0.0", "~2.5.0"),
            (">0.9.0", ">=1.0.0"),
        ];
        for (stored, queried) in cases {
            let sets = encode_range_str(stored).unwrap();
            let iv = normalize_query(queried).unwrap();
            assert!(
                overlaps(&sets, &iv),
                "stored '{}' must overlap query '{}'",
                stored,
                queried
            );
        }
    }
}
