use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Player names: non-empty, bounded, printable
pub fn validate_name(name: &str, max_len: usize) -> Result<&str, &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > max_len {
        return Err("name is too long");
    }
    if name.chars().any(char::is_control) {
        return Err("name contains control characters");
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01 in milliseconds
        assert!(get_timestamp() > 1_577_836_800_000);
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Alice ", 32), Ok("Alice"));
        assert!(validate_name("", 32).is_err());
        assert!(validate_name("   ", 32).is_err());
        assert!(validate_name("abcdef", 5).is_err());
        assert!(validate_name("bad\nname", 32).is_err());
    }
}
