//! SOA serial arithmetic (RFC 1982) and the `YYYYMMDDhhmmss` timestamp form
//! fed to the external signer tool.

use jiff::Timestamp;

/// The result of comparing two SOA serials under RFC 1982 sequence-space
/// arithmetic.
///
/// A tie at exactly half the sequence space (2^31) is undefined by RFC 1982;
/// callers treat it as [`SerialOrder::Equal`] ("no change"), per §4.5.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SerialOrder {
    Equal,
    Less,
    Greater,
}

/// Compare two serials the way a zone's SOA serial must be compared: in a
/// 32-bit sequence space that wraps around.
///
/// `serial_cmp(a, b)` returns whether `a` is ordered before, after, or equal
/// to `b`, walking forward from `a`.
pub fn serial_cmp(a: u32, b: u32) -> SerialOrder {
    if a == b {
        return SerialOrder::Equal;
    }
    let diff = b.wrapping_sub(a);
    if diff == 0x8000_0000 {
        // Exactly half the sequence space: undefined by RFC 1982.
        return SerialOrder::Equal;
    }
    if diff < 0x8000_0000 {
        SerialOrder::Less
    } else {
        SerialOrder::Greater
    }
}

/// The maximum amount by which a serial may legitimately be advanced in one
/// step, per §4.5.
pub const MAX_SERIAL_INCREMENT: u32 = 0x7FFF_FFFF;

/// Render a Unix timestamp (seconds since the epoch) as the `YYYYMMDDhhmmss`
/// UTC form the signer tool's directive stream expects (§4.6, §6).
pub fn render_utc(unix_time: i64) -> String {
    let ts = Timestamp::from_second(unix_time).unwrap_or(Timestamp::UNIX_EPOCH);
    let zoned = ts.to_zoned(jiff::tz::TimeZone::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        zoned.year(),
        zoned.month(),
        zoned.day(),
        zoned.hour(),
        zoned.minute(),
        zoned.second()
    )
}

/// Compute the `datecounter` serial candidate for a given Unix time: the UTC
/// calendar date, as `YYYYMMDD`, times 100 (§4.5).
pub fn datecounter_candidate(unix_time: i64) -> u32 {
    let ts = Timestamp::from_second(unix_time).unwrap_or(Timestamp::UNIX_EPOCH);
    let zoned = ts.to_zoned(jiff::tz::TimeZone::UTC);
    let date = zoned.year() as u32 * 10_000 + zoned.month() as u32 * 100 + zoned.day() as u32;
    date * 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_cmp_equal() {
        assert_eq!(serial_cmp(100, 100), SerialOrder::Equal);
    }

    #[test]
    fn serial_cmp_within_half_space_is_less() {
        // a < b when b is reachable by a small forward step from a.
        assert_eq!(serial_cmp(100, 101), SerialOrder::Less);
        assert_eq!(serial_cmp(u32::MAX, 0), SerialOrder::Less);
    }

    #[test]
    fn serial_cmp_sign_matches_negative_k() {
        // serial_cmp(a, (a + k) mod 2^32) has the sign of -k for 0 < k < 2^31:
        // i.e. a < a+k, so serial_cmp(a, a+k) == Less.
        for k in [1u32, 2, 1000, 0x7FFF_FFFE] {
            let a = 42u32;
            let b = a.wrapping_add(k);
            assert_eq!(serial_cmp(a, b), SerialOrder::Less, "k={k}");
        }
    }

    #[test]
    fn serial_cmp_wraparound() {
        // Just past the wrap: prev is large, candidate has wrapped to a small
        // number but is still "ahead" within the half-space window.
        let prev = u32::MAX - 5;
        let cand = 10u32;
        assert_eq!(serial_cmp(prev, cand), SerialOrder::Less);
    }

    #[test]
    fn serial_cmp_half_space_tie_is_equal() {
        assert_eq!(serial_cmp(0, 0x8000_0000), SerialOrder::Equal);
    }

    #[test]
    fn render_utc_matches_expected_form() {
        // 2009-11-05T00:50:00Z
        let t = 1257382200;
        assert_eq!(render_utc(t), "20091105005000");
    }

    #[test]
    fn datecounter_candidate_matches_scenario() {
        // §8 scenario 4: 2009-11-05, output=200911050050 -> date*100 = 200911050100.
        let t = 1257382200; // 2009-11-05T00:50:00Z
        assert_eq!(datecounter_candidate(t), 200_911_050_100);
    }
}
