//! Packed version encoding and version-string arithmetic.
//!
//! A packed version is an ASCII byte string whose lexicographic order equals
//! the numeric tuple order of (major, minor, patch). Index bounds are stored
//! packed so that range-overlap tests reduce to bytewise comparisons during
//! a scan.
//!
//! Two sentinel bytes bracket the packed space: `0x00` sorts below every
//! packed version and `0xFF` above every packed version (packed output is
//! `!`-separated lowercase hex, all strictly between the sentinels).

use std::cmp::Ordering;

use semver::Version;

/// Sentinel below all packed versions.
pub const LOWEST: &[u8] = &[0x00];

/// Sentinel above all packed versions.
pub const HIGHEST: &[u8] = &[0xFF];

/// Pack a (major, minor, patch) triple into an order-preserving byte string.
///
/// Each component is length-prefixed hex: one hex digit encoding
/// `hex_len(n) - 1` followed by the hex digits of `n`, so that `"10"` sorts
/// after `"9"` at the byte level. Components are joined with `!`.
pub fn pack(major: u64, minor: u64, patch: u64) -> String {
    format!(
        "{}!{}!{}",
        pack_component(major),
        pack_component(minor),
        pack_component(patch)
    )
}

/// Pack a semver version, ignoring prerelease and build components.
pub fn pack_version(v: &Version) -> String {
    pack(v.major, v.minor, v.patch)
}

fn pack_component(n: u64) -> String {
    let hex = format!("{:x}", n);
    // hex_len is in 1..=16, so hex_len - 1 fits a single hex digit
    format!("{:x}{}", hex.len() - 1, hex)
}

/// Return the version with patch incremented by one.
///
/// Used to turn inclusive upper bounds into exclusive ones; prerelease and
/// build components are discarded.
pub fn inc_patch(v: &Version) -> Version {
    Version::new(v.major, v.minor, v.patch + 1)
}

/// Precision of a loosely-parsed version string.
///
/// `"1"` parses at major precision, `"1.2"` at minor precision, `"1.2.3"`
/// at full precision. Range desugaring treats partial versions as x-ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Major,
    Minor,
    Full,
}

/// Parse a version string, padding missing components with zeros.
///
/// Accepts an optional leading `v` and ignores any prerelease/build tail.
/// Returns the padded version together with the precision of the input.
pub fn parse_loose(version: &str) -> Option<(Version, Precision)> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let main = version.split(['-', '+']).next()?;
    if main.is_empty() {
        return None;
    }

    let parts: Vec<&str> = main.split('.').collect();
    let num = |s: &str| s.trim().parse::<u64>().ok();
    match parts.as_slice() {
        [ma] => Some((Version::new(num(ma)?, 0, 0), Precision::Major)),
        [ma, mi] => Some((Version::new(num(ma)?, num(mi)?, 0), Precision::Minor)),
        [ma, mi, pa] => Some((Version::new(num(ma)?, num(mi)?, num(pa)?), Precision::Full)),
        _ => None,
    }
}

/// Compare two dotted version strings numerically.
///
/// Components are compared as arbitrary-precision digit strings, so the
/// comparison stays correct for components beyond the range of any fixed
/// integer width. A leading `v` and any prerelease/build tail are ignored;
/// missing components count as zero. Used for the latest-version pointer,
/// which must only ever move to a strictly greater version.
pub fn cmp_version_strings(a: &str, b: &str) -> Ordering {
    let a = numeric_components(a);
    let b = numeric_components(b);
    for i in 0..3 {
        let ord = cmp_digits(
            a.get(i).copied().unwrap_or("0"),
            b.get(i).copied().unwrap_or("0"),
        );
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn numeric_components(s: &str) -> Vec<&str> {
    let s = s.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    let main = s.split(['-', '+']).next().unwrap_or("");
    main.split('.')
        .take(3)
        .map(|c| {
            let end = c
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(c.len());
            &c[..end]
        })
        .collect()
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(major: u64, minor: u64, patch: u64) -> Vec<u8> {
        pack(major, minor, patch).into_bytes()
    }

    #[test]
    fn test_pack_component_boundaries() {
        // The classic decimal failure: "10" < "9" lexicographically.
        assert!(packed(0, 0, 9) < packed(0, 0, 10));
        assert!(packed(0, 0, 15) < packed(0, 0, 16));
        assert!(packed(0, 0, 255) < packed(0, 0, 256));
        assert!(packed(0, 0, 4095) < packed(0, 0, 4096));
    }

    #[test]
    fn test_pack_tuple_ordering() {
        let versions = [
            (0, 0, 0),
            (0, 0, 1),
            (0, 1, 0),
            (0, 10, 0),
            (1, 0, 0),
            (1, 2, 3),
            (1, 2, 30),
            (1, 10, 0),
            (2, 0, 0),
            (10, 0, 0),
            (100, 0, 0),
        ];
        for window in versions.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(
                packed(a.0, a.1, a.2) < packed(b.0, b.1, b.2),
                "pack{:?} should sort below pack{:?}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_pack_within_sentinels() {
        for v in [(0, 0, 0), (1, 2, 3), (u64::MAX, u64::MAX, u64::MAX)] {
            let p = packed(v.0, v.1, v.2);
            assert!(LOWEST < p.as_slice());
            assert!(p.as_slice() < HIGHEST);
        }
    }

    #[test]
    fn test_inc_patch() {
        let v = Version::new(1, 2, 3);
        assert_eq!(inc_patch(&v), Version::new(1, 2, 4));
    }

    #[test]
    fn test_parse_loose_precision() {
        assert_eq!(
            parse_loose("1"),
            Some((Version::new(1, 0, 0), Precision::Major))
        );
        assert_eq!(
            parse_loose("1.2"),
            Some((Version::new(1, 2, 0), Precision::Minor))
        );
        assert_eq!(
            parse_loose("1.2.3"),
            Some((Version::new(1, 2, 3), Precision::Full))
        );
        assert_eq!(
            parse_loose("v2.0.1"),
            Some((Version::new(2, 0, 1), Precision::Full))
        );
        // Prerelease tail is ignored by design.
        assert_eq!(
            parse_loose("1.2.3-beta.1"),
            Some((Version::new(1, 2, 3), Precision::Full))
        );
        assert_eq!(parse_loose("not-a-version"), None);
        assert_eq!(parse_loose(""), None);
    }

    #[test]
    fn test_cmp_version_strings_basic() {
        assert_eq!(cmp_version_strings("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(cmp_version_strings("1.0.0", "2.0.0"), Ordering::Less);
        assert_eq!(cmp_version_strings("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(cmp_version_strings("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(cmp_version_strings("v1.0.1", "1.0.0"), Ordering::Greater);
        assert_eq!(
            cmp_version_strings("1.0.0-alpha", "1.0.0"),
            Ordering::Equal
        );
    }

    #[test]
    fn test_cmp_version_strings_bignum() {
        // Components beyond u64 must still compare numerically.
        assert_eq!(
            cmp_version_strings("1.0.99999999999999999999999998", "1.0.99999999999999999999999999"),
            Ordering::Less
        );
        assert_eq!(
            cmp_version_strings("18446744073709551616.0.0", "2.0.0"),
            Ordering::Greater
        );
        assert_eq!(cmp_version_strings("1.0.010", "1.0.10"), Ordering::Equal);
    }
}
