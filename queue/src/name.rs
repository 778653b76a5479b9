use common::error::AppError;

/// Broker-reserved prefixes a poison suffix must not begin with (spec §4.1).
const RESERVED_PREFIXES: &[&str] = &["amq.", "sys-", "internal-"];

/// Normalize a queue name: lowercase, digits, hyphens; `_ . space` become `-`
/// (spec §4.1: "Names: lowercase, digits, hyphens; implementations must normalize by
/// replacing `_ . space` with `-`"). Rejects names that are empty or exceed 63 chars
/// after normalization.
pub fn normalize_queue_name(name: &str) -> Result<String, AppError> {
    let normalized: String = name
        .chars()
        .map(|c| match c {
            '_' | '.' | ' ' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect();

    if normalized.is_empty() {
        return Err(AppError::Validation("queue name must not be empty".into()));
    }
    if normalized.len() > 63 {
        return Err(AppError::Validation(format!(
            "queue name '{normalized}' exceeds 63 characters"
        )));
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::Validation(format!(
            "queue name '{normalized}' contains characters outside [a-z0-9-]"
        )));
    }

    Ok(normalized)
}

/// Validate a poison suffix: at most 60 UTF-8 bytes, must not begin with a
/// broker-reserved prefix (spec §4.1).
pub fn validate_poison_suffix(suffix: &str) -> Result<(), AppError> {
    if suffix.as_bytes().len() > 60 {
        return Err(AppError::Validation(
            "poison suffix must be <= 60 UTF-8 bytes".into(),
        ));
    }
    if RESERVED_PREFIXES
        .iter()
        .any(|prefix| suffix.starts_with(prefix))
    {
        return Err(AppError::Validation(format!(
            "poison suffix '{suffix}' begins with a broker-reserved prefix"
        )));
    }
    Ok(())
}

/// The companion poison-queue name for `name` (spec §4.1: "lazily create queue and its
/// companion `{name}{poison_suffix}`").
pub fn poison_queue_name(name: &str, poison_suffix: &str) -> Result<String, AppError> {
    validate_poison_suffix(poison_suffix)?;
    normalize_queue_name(&format!("{name}{poison_suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_underscores_dots_and_spaces_to_hyphens() {
        assert_eq!(
            normalize_queue_name("km_extract.step one").unwrap(),
            "km-extract-step-one"
        );
    }

    #[test]
    fn rejects_names_over_63_chars() {
        let name = "a".repeat(64);
        assert!(normalize_queue_name(&name).is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(normalize_queue_name("").is_err());
    }

    #[test]
    fn poison_suffix_rejects_reserved_prefix() {
        assert!(validate_poison_suffix("amq.dead").is_err());
    }

    #[test]
    fn poison_suffix_rejects_oversized() {
        assert!(validate_poison_suffix(&"x".repeat(61)).is_err());
    }

    #[test]
    fn poison_queue_name_appends_suffix() {
        assert_eq!(poison_queue_name("km-extract", "-poison").unwrap(), "km-extract-poison");
    }
}
