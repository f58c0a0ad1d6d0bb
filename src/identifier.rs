use lazy_static::lazy_static;
use regex::Regex;

/// Which column a login identifier should be resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMethod {
    PhoneId,
    Email,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// The search forms of a phone-style login ID. Legacy rows were stored
/// inconsistently with and without the leading "+", so both spellings are
/// always derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneForms {
    pub original: String,     // trimmed, as typed
    pub with_plus: String,    // canonical
    pub without_plus: String, // leading "+" stripped
}

pub fn phone_forms(raw: &str) -> PhoneForms {
    let original = raw.trim().to_string();
    let with_plus = if original.starts_with('+') {
        original.clone()
    } else {
        format!("+{original}")
    };
    let without_plus = original.trim_start_matches('+').to_string();
    PhoneForms {
        original,
        with_plus,
        without_plus,
    }
}

/// Ordered, deduplicated list of search forms for a phone-style ID.
/// Order is part of the contract: callers probe exact-original first, then
/// canonical, then stripped, then substring over the same list, stopping at
/// the first hit.
pub fn fallback_forms(raw: &str) -> Vec<String> {
    let forms = phone_forms(raw);
    let mut out: Vec<String> = Vec::with_capacity(3);
    for form in [forms.original, forms.with_plus, forms.without_plus] {
        if !form.is_empty() && !out.contains(&form) {
            out.push(form);
        }
    }
    out
}

/// Canonical form of an email identifier: trimmed and lowercased. No "+"
/// handling applies to emails.
pub fn canonical_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_contain_both_plus_variants() {
        for raw in ["+5511999998888", "5511999998888", "  5511999998888 "] {
            let forms = fallback_forms(raw);
            assert!(forms.contains(&"+5511999998888".to_string()), "{raw}");
            assert!(forms.contains(&"5511999998888".to_string()), "{raw}");
        }
    }

    #[test]
    fn original_form_comes_first() {
        let forms = fallback_forms("5511999998888");
        assert_eq!(forms[0], "5511999998888");
        let forms = fallback_forms("+5511999998888");
        assert_eq!(forms[0], "+5511999998888");
    }

    #[test]
    fn forms_are_deduplicated() {
        // original == with_plus when typed with "+", so only two forms remain
        assert_eq!(fallback_forms("+551199").len(), 2);
        assert_eq!(fallback_forms("551199").len(), 2);
    }

    #[test]
    fn canonical_email_trims_and_lowercases() {
        assert_eq!(canonical_email("  Maria@Example.COM "), "maria@example.com");
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("maria@example.com"));
        assert!(!is_valid_email("maria@example"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@example.com"));
    }
}
