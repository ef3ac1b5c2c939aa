use std::collections::HashSet;

/// Fallback when a requested nickname normalizes to nothing.
pub(crate) const DEFAULT_NICKNAME: &str = "anonymous";

/// Trim and strip internal whitespace; empty input gets the placeholder.
pub(crate) fn normalize(raw: &str) -> String {
    let cleaned: String = raw.split_whitespace().collect();
    if cleaned.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        cleaned
    }
}

/// De-duplicate a requested nickname against every *other* connected
/// identity. If the base name is free it is used verbatim; otherwise the
/// result is `base (n)` for the smallest positive `n` not already taken
/// by an identity of that exact form.
pub(crate) fn unique_nickname<'a, I>(requested: &str, others: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let base = normalize(requested);
    let mut base_used = false;
    let mut used_numbers = HashSet::new();
    for name in others {
        if name == base {
            base_used = true;
        } else if let Some(n) = suffix_number(name, &base) {
            used_numbers.insert(n);
        }
    }
    if !base_used {
        return base;
    }
    let mut n = 1u32;
    while used_numbers.contains(&n) {
        n += 1;
    }
    format!("{} ({})", base, n)
}

/// Parse `base (n)` exactly; anything else is unrelated.
fn suffix_number(name: &str, base: &str) -> Option<u32> {
    let digits = name
        .strip_prefix(base)?
        .strip_prefix(" (")?
        .strip_suffix(')')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
