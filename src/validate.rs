//! Name validation: the character-set rules the wire protocol enforces for
//! channel and device names, plus the "append `~2`, `~3`, ..." collision
//! policy used when renaming a channel to a name already in use.

pub const MAX_NAME_LEN: usize = 31;

/// Strip `name` down to the characters a channel name may contain: printable
/// ASCII excluding `=`, `@`, `.`, truncated to 31 characters. Idempotent:
/// `sanitize_channel_name(&sanitize_channel_name(s)) == sanitize_channel_name(s)`.
pub fn sanitize_channel_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && !['=', '@', '.'].contains(c))
        .take(MAX_NAME_LEN)
        .collect()
}

/// Resolve a collision against `existing` (case-insensitive) by appending
/// `~2`, `~3`, ... and truncating the base name to keep the total length
/// within [`MAX_NAME_LEN`].
pub fn dedupe_channel_name(base: &str, mut is_taken: impl FnMut(&str) -> bool) -> String {
    let base = sanitize_channel_name(base);
    if !is_taken(&base) {
        return base;
    }

    let mut count = 2;
    loop {
        let suffix = format!("~{count}");
        let candidate = if base.len() + suffix.len() > MAX_NAME_LEN {
            let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
            format!("{}{}", &base[..keep.min(base.len())], suffix)
        } else {
            format!("{base}{suffix}")
        };
        if !is_taken(&candidate) {
            return candidate;
        }
        count += 1;
    }
}

/// Device names are restricted to `[A-Za-z0-9-]`, may not begin or end with
/// `-`, and (like channel names) are capped at 31 characters.
pub fn validate_device_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Ok(()); // empty payload resets the device name
    }
    if name.len() > MAX_NAME_LEN {
        return Err("device name exceeds 31 characters");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("device name must contain only [A-Za-z0-9-]");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("device name may not begin or end with '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["in=3@dev.local", "Stage-Left", "a".repeat(50).as_str(), ""] {
            let once = sanitize_channel_name(raw);
            let twice = sanitize_channel_name(&once);
            assert_eq!(once, twice);
            assert!(once.len() <= MAX_NAME_LEN);
            assert!(once.chars().all(|c| c.is_ascii() && !['=', '@', '.'].contains(&c)));
        }
    }

    #[test]
    fn dedupe_appends_suffix_on_collision() {
        let taken = std::collections::HashSet::from(["in3".to_string(), "in3~2".to_string()]);
        let name = dedupe_channel_name("in3", |candidate| taken.contains(candidate));
        assert_eq!(name, "in3~3");
    }

    #[test]
    fn dedupe_truncates_to_keep_total_length() {
        let long_base = "a".repeat(MAX_NAME_LEN);
        let taken = std::collections::HashSet::from([long_base.clone()]);
        let name = dedupe_channel_name(&long_base, |candidate| taken.contains(candidate));
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with("~2"));
    }

    #[test]
    fn device_name_rejects_bad_chars_and_edges() {
        assert!(validate_device_name("mixer-1").is_ok());
        assert!(validate_device_name("").is_ok());
        assert!(validate_device_name("-mixer").is_err());
        assert!(validate_device_name("mixer-").is_err());
        assert!(validate_device_name("mixer_1").is_err());
        assert!(validate_device_name(&"a".repeat(32)).is_err());
    }
}
