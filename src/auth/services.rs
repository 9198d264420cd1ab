use lazy_static::lazy_static;
use regex::Regex;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// True when any of the given required fields is empty or whitespace.
pub(crate) fn any_blank<'a, I>(fields: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    fields.into_iter().any(|f| f.trim().is_empty())
}
