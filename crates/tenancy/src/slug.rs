//! Tenant slugs
//!
//! A slug is 1-50 characters of `[a-z0-9-]`, with no leading, trailing or
//! doubled hyphen, and is not a reserved word.

use lnk_shared::{LnkError, LnkResult};

pub const MAX_SLUG_LEN: usize = 50;

/// Slugs that collide with platform routes or hostnames
pub const RESERVED_SLUGS: &[&str] = &[
    "admin", "api", "app", "assets", "auth", "billing", "blog", "cdn", "dashboard", "docs",
    "help", "login", "logout", "mail", "new", "settings", "signup", "static", "status",
    "support", "www",
];

/// Fallback base when a name has no slug-able characters
const FALLBACK_SLUG: &str = "tenant";

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// Derive a slug from a display name.
///
/// Lower-cases ASCII alphanumerics, turns every other run of characters into
/// a single hyphen and trims hyphens from both ends. Names that produce an
/// empty or reserved slug fall back to a usable base.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    // Leave room for a numeric suffix
    let max_base = MAX_SLUG_LEN - 6;
    if slug.len() > max_base {
        slug.truncate(max_base);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        return FALLBACK_SLUG.to_string();
    }
    if is_reserved(&slug) {
        return format!("{}-{}", slug, FALLBACK_SLUG);
    }
    slug
}

/// Candidate slug for the `attempt`-th try: `base`, `base-1`, `base-2`, ...
pub fn with_suffix(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// Validate a caller-supplied slug.
pub fn validate_slug(slug: &str) -> LnkResult<()> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(LnkError::BadRequest(format!(
            "slug must be 1-{} characters",
            MAX_SLUG_LEN
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(LnkError::BadRequest(
            "slug may only contain lowercase letters, digits and hyphens".into(),
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        return Err(LnkError::BadRequest(
            "slug may not start or end with a hyphen or contain '--'".into(),
        ));
    }
    if is_reserved(slug) {
        return Err(LnkError::BadRequest(format!("slug '{}' is reserved", slug)));
    }
    Ok(())
}
