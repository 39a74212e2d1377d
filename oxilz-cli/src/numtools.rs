//! Numeric command-line arguments with SI and binary multipliers.
//!
//! `-b`, `-s`, `-S`, and `-m` accept numbers followed by a multiplier:
//! k = 10^3, Ki = 2^10, M = 10^6, Mi = 2^20, and so on up to Y/Yi.
//! `-s` additionally interprets bare 12..29 as powers of two.

use oxilz_lzma::{MAX_DICT_BITS, MAX_DICT_SIZE, MIN_DICT_BITS, MIN_DICT_SIZE};

/// Parse a number with an optional multiplier suffix, enforcing limits.
pub fn getnum(arg: &str, llimit: u64, ulimit: u64) -> Result<u64, String> {
    let arg = arg.trim();
    let digits_end = arg
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(arg.len());
    if digits_end == 0 {
        return Err(format!("bad or missing numerical argument '{arg}'"));
    }
    let mut result: u64 = arg[..digits_end]
        .parse()
        .map_err(|_| format!("numerical argument out of limits '{arg}'"))?;

    let suffix = &arg[digits_end..];
    if !suffix.is_empty() {
        let mut chars = suffix.chars();
        let letter = chars.next().expect("nonempty suffix");
        let binary = chars.next() == Some('i');
        let expected_len = if binary { 2 } else { 1 };
        if suffix.len() != expected_len {
            return Err(format!("bad multiplier in numerical argument '{arg}'"));
        }
        let factor: u64 = if binary { 1024 } else { 1000 };
        let exponent = match letter {
            'k' if !binary => 1,
            'K' if binary => 1,
            'M' => 2,
            'G' => 3,
            'T' => 4,
            'P' => 5,
            'E' => 6,
            'Z' => 7,
            'Y' => 8,
            _ => return Err(format!("bad multiplier in numerical argument '{arg}'")),
        };
        for _ in 0..exponent {
            result = result
                .checked_mul(factor)
                .ok_or_else(|| format!("numerical argument out of limits '{arg}'"))?;
        }
    }
    if result < llimit || result > ulimit {
        return Err(format!("numerical argument out of limits '{arg}'"));
    }
    Ok(result)
}

/// Parse a dictionary size: 12..29 mean powers of two, anything else is
/// a byte count within 4 KiB .. 512 MiB.
pub fn get_dict_size(arg: &str) -> Result<u32, String> {
    if let Ok(bits) = arg.trim().parse::<u32>() {
        if (MIN_DICT_BITS..=MAX_DICT_BITS).contains(&bits) {
            return Ok(1 << bits);
        }
    }
    getnum(arg, MIN_DICT_SIZE as u64, MAX_DICT_SIZE as u64).map(|n| n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_numbers() {
        assert_eq!(getnum("12345", 0, u64::MAX).unwrap(), 12345);
        assert_eq!(getnum("0", 0, 10).unwrap(), 0);
        assert!(getnum("", 0, 10).is_err());
        assert!(getnum("abc", 0, 10).is_err());
    }

    #[test]
    fn test_multipliers() {
        assert_eq!(getnum("1k", 0, u64::MAX).unwrap(), 1000);
        assert_eq!(getnum("1Ki", 0, u64::MAX).unwrap(), 1024);
        assert_eq!(getnum("2M", 0, u64::MAX).unwrap(), 2_000_000);
        assert_eq!(getnum("2Mi", 0, u64::MAX).unwrap(), 2 << 20);
        assert_eq!(getnum("1Gi", 0, u64::MAX).unwrap(), 1 << 30);
        assert!(getnum("1x", 0, u64::MAX).is_err());
        assert!(getnum("1ki", 0, u64::MAX).is_err());
        assert!(getnum("1K", 0, u64::MAX).is_err());
        assert!(getnum("1Mix", 0, u64::MAX).is_err());
    }

    #[test]
    fn test_limits() {
        assert!(getnum("99", 100, 1000).is_err());
        assert!(getnum("1001", 100, 1000).is_err());
        assert_eq!(getnum("100", 100, 1000).unwrap(), 100);
        assert!(getnum("100000000Yi", 0, u64::MAX).is_err()); // overflow
    }

    #[test]
    fn test_dict_size_exponents() {
        assert_eq!(get_dict_size("12").unwrap(), 1 << 12);
        assert_eq!(get_dict_size("29").unwrap(), 1 << 29);
        // 30 is not a valid exponent and far below the byte minimum.
        assert!(get_dict_size("30").is_err());
        assert_eq!(get_dict_size("8Mi").unwrap(), 8 << 20);
        assert_eq!(get_dict_size("65536").unwrap(), 65536);
    }
}
