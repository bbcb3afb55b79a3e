/// Derives a URL-safe identifier from a title.
///
/// Lower-cases the input, collapses every run of characters outside
/// `[a-z0-9]` into a single hyphen and strips hyphens from both ends.
pub fn generate_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// True iff `slug` is lowercase alphanumeric segments joined by single hyphens.
pub fn validate_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .split('-')
            .all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            })
}
