//! Composite duration grammar for the `ttl` option.
//!
//! A duration is a whitespace-separated run of `<integer><unit>` tokens
//! with units `d`, `h`, `m`, `s`; a number terminated by whitespace
//! counts as seconds. Units may appear at most once and only in
//! decreasing order of magnitude, tracked as a bitmask: each token must
//! set one bit strictly below everything already set.

const DAY: u8 = 1 << 3;
const HOUR: u8 = 1 << 2;
const MINUTE: u8 = 1 << 1;
const SECOND: u8 = 1 << 0;

fn unit(c: char) -> Option<(u8, u64)> {
    match c {
        'd' => Some((DAY, 86_400)),
        'h' => Some((HOUR, 3_600)),
        'm' => Some((MINUTE, 60)),
        's' => Some((SECOND, 1)),
        _ => None,
    }
}

/// Parses a composite duration into seconds.
pub fn parse(input: &str) -> Result<u64, String> {
    let mut chars = input.chars().peekable();
    let mut total: u64 = 0;
    let mut seen: u8 = 0;
    let mut any = false;

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if !c.is_ascii_digit() {
            return Err(format!("expected a number in duration: {input}"));
        }

        let mut value: u64 = 0;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(d)))
                .ok_or_else(|| format!("duration value too large: {input}"))?;
            chars.next();
        }

        // A number must end in a unit letter or a separator; a bare
        // trailing number is malformed.
        let (bit, scale) = match chars.next() {
            Some(c) if c.is_whitespace() => (SECOND, 1),
            Some(c) => unit(c).ok_or_else(|| format!("unknown time unit '{c}': {input}"))?,
            None => return Err(format!("missing time unit: {input}")),
        };

        if seen & ((bit << 1) - 1) != 0 {
            return Err(format!("time unit repeated or out of order: {input}"));
        }
        seen |= bit;

        total = value
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration value too large: {input}"))?;
        any = true;
    }

    if !any {
        return Err(format!("empty duration: {input}"));
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units_convert() {
        assert_eq!(parse("1s "), Ok(1));
        assert_eq!(parse("2m "), Ok(120));
        assert_eq!(parse("3h "), Ok(10_800));
        assert_eq!(parse("4d "), Ok(345_600));
    }

    #[test]
    fn mixed_units_sum() {
        assert_eq!(parse("1d 1h 1m 1s "), Ok(86_400 + 3_600 + 60 + 1));
        assert_eq!(parse("300h 30000s"), Ok(300 * 3_600 + 30_000));
    }

    #[test]
    fn leading_whitespace_is_skipped() {
        assert_eq!(parse("     5s"), Ok(5));
    }

    #[test]
    fn bare_number_needs_a_terminator() {
        assert!(parse("1").is_err());
        assert_eq!(parse("90 "), Ok(90));
    }

    #[test]
    fn repeated_unit_is_rejected() {
        assert!(parse("2d3d").is_err());
        assert!(parse("1h 1h").is_err());
    }

    #[test]
    fn increasing_order_is_rejected() {
        assert!(parse("1s 1m").is_err());
        assert!(parse("30m 1h").is_err());
    }

    #[test]
    fn stray_characters_are_rejected() {
        assert!(parse("1sss").is_err());
        assert!(parse("3g,").is_err());
        assert!(parse("").is_err());
        assert!(parse("  ").is_err());
        assert!(parse("s").is_err());
    }
}
