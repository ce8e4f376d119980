//! Human-readable wait durations for the diagnostic header.
//!
//! Format: Go-style `[<h>h][<m>m]<s>[.<frac>]s` above a second, a single
//! `ms`/`us`/`ns` quantity below it, `0s` for zero.

use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Render a duration, e.g. `1.5s`, `250ms`, `12.5us`, `2m3s`
#[must_use]
pub fn format_wait(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return with_fraction(nanos, 1_000, "us");
    }
    if nanos < NANOS_PER_SEC {
        return with_fraction(nanos, 1_000_000, "ms");
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = u128::from(total_secs % 60) * NANOS_PER_SEC + u128::from(d.subsec_nanos());

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&with_fraction(seconds, NANOS_PER_SEC, "s"));
    out
}

/// `value / unit` with trailing fractional zeros trimmed; `unit` is a power of ten
fn with_fraction(value: u128, unit: u128, suffix: &str) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return format!("{whole}{suffix}");
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}{suffix}", digits.trim_end_matches('0'))
}

/// Parse a duration written by [`format_wait`]
///
/// Accepts any sequence of `<number><unit>` with units `h`, `m`, `s`, `ms`,
/// `us` (or `µs`) and `ns`. A bare `0` is zero.
#[must_use]
pub fn parse_wait(s: &str) -> Option<Duration> {
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after) = rest.split_at(int_len);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(tail) => {
                let n = tail.bytes().take_while(u8::is_ascii_digit).count();
                tail.split_at(n)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }

        let unit_len = after
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map_or(after.len(), |(i, _)| i);
        let (unit, tail) = after.split_at(unit_len);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return None,
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        total = total.checked_add(whole.checked_mul(unit_nanos)?)?;

        // Digits past nanosecond precision carry nothing
        let frac_part = &frac_part[..frac_part.len().min(18)];
        if !frac_part.is_empty() {
            let numer: u128 = frac_part.parse().ok()?;
            let scale = 10u128.pow(u32::try_from(frac_part.len()).ok()?);
            total = total.checked_add(numer.checked_mul(unit_nanos)? / scale)?;
        }
        rest = tail;
    }

    u64::try_from(total).ok().map(Duration::from_nanos)
}
