//! Byte array encoding for generated shader sources.

use std::fmt::Write;

/// Bytes emitted per line of a generated array.
pub const BYTES_PER_ROW: usize = 8;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Identifier stem for a shader file: the first `.` becomes `_`.
///
/// `foo.vert` → `foo_vert`, so the generated constants are `foo_vert_spv`
/// and `foo_vert_spv_len`.
pub fn code_name(file_name: &str) -> String {
    file_name.replacen('.', "_", 1)
}

/// Name of the generated byte array constant.
pub fn array_name(file_name: &str) -> String {
    format!("{}_spv", code_name(file_name))
}

/// Name of the generated length constant.
pub fn length_name(file_name: &str) -> String {
    format!("{}_spv_len", code_name(file_name))
}

/// Encode bytes as array initializer rows.
///
/// Each row is indented by four spaces and holds up to [`BYTES_PER_ROW`]
/// `0xHH` literals separated by `", "`. Every row ends with a newline; only
/// the final byte has no trailing separator.
pub fn hex_rows(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 6 + bytes.len() / BYTES_PER_ROW * 5 + 8);
    let last = bytes.len().saturating_sub(1);

    for (i, &byte) in bytes.iter().enumerate() {
        if i % BYTES_PER_ROW == 0 {
            out.push_str("    ");
        }
        out.push_str("0x");
        out.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(byte & 0x0F)]));
        if i < last {
            out.push_str(", ");
        }
        if (i + 1) % BYTES_PER_ROW == 0 || i == last {
            out.push('\n');
        }
    }

    out
}

/// Format a UTC timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(time: std::time::SystemTime) -> String {
    let secs = time
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let days = i64::try_from(secs / 86_400).unwrap_or(0);
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);

    let mut out = String::with_capacity(19);
    let _ = write!(
        out,
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        rem / 3600,
        (rem / 60) % 60,
        rem % 60
    );
    out
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
const fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + (month <= 2) as i64;
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn decode(rows: &str) -> Vec<u8> {
        rows.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                let hex = tok.strip_prefix("0x").expect("0x prefix");
                u8::from_str_radix(hex, 16).expect("hex byte")
            })
            .collect()
    }

    #[test]
    fn naming_transform() {
        assert_eq!(code_name("foo.vert"), "foo_vert");
        assert_eq!(array_name("foo.vert"), "foo_vert_spv");
        assert_eq!(length_name("foo.vert"), "foo_vert_spv_len");
        // Only the first dot is replaced.
        assert_eq!(array_name("a.b.frag"), "a_b.frag_spv");
    }

    #[test]
    fn decoding_reconstructs_every_byte_value() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&hex_rows(&bytes)), bytes);
    }

    #[test]
    fn decoding_reconstructs_odd_lengths() {
        for len in [1usize, 7, 8, 9, 15, 16, 17, 33] {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            assert_eq!(decode(&hex_rows(&bytes)), bytes, "length {len}");
        }
    }

    #[test]
    fn uppercase_digits() {
        assert_eq!(hex_rows(&[0xab, 0x0f]), "    0xAB, 0x0F\n");
    }

    #[test]
    fn wraps_every_eight_bytes() {
        let bytes = [0u8; 20];
        let rows = hex_rows(&bytes);
        let lines: Vec<&str> = rows.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].matches("0x").count(), 8);
        assert_eq!(lines[1].matches("0x").count(), 8);
        assert_eq!(lines[2].matches("0x").count(), 4);
        assert!(lines[0].ends_with("0x00, "));
        assert!(lines.iter().all(|l| l.starts_with("    0x")));
    }

    #[test]
    fn final_line_has_no_trailing_comma() {
        for len in [1usize, 8, 16, 13] {
            let rows = hex_rows(&vec![0x42; len]);
            let last = rows.lines().last().unwrap();
            assert!(last.ends_with("0x42"), "length {len}: {last:?}");
        }
    }

    #[test]
    fn empty_input_produces_no_rows() {
        assert_eq!(hex_rows(&[]), "");
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(format_timestamp(UNIX_EPOCH), "1970-01-01 00:00:00");
        // 2024-02-29 12:34:56 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_709_210_096);
        assert_eq!(format_timestamp(t), "2024-02-29 12:34:56");
    }
}
