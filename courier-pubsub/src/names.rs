use courier_models::RuntimeError;

const MAX_NAME_LEN: usize = 63;

/// Topic and subscription names are kebab-case: lowercase alphanumerics separated by
/// single hyphens, starting with a letter, ending with a letter or digit, at most 63
/// characters long.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<(), RuntimeError> {
    let invalid = |reason: &str| {
        Err(RuntimeError::invalid_argument(format!(
            "invalid {kind} name \"{name}\": {reason}"
        )))
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("must be at most 63 characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return invalid("must start with a lowercase letter");
    }
    if !name.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return invalid("must end with a lowercase letter or digit");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("may only contain lowercase letters, digits and hyphens");
    }
    if name.contains("--") {
        return invalid("must not contain consecutive hyphens");
    }

    Ok(())
}
