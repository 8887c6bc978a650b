/// Lowercase, dash-separated, URL-safe form of a display name.
///
/// Every run of characters outside `[a-z0-9]` collapses into one dash and the
/// result never starts or ends with a dash. Distinct inputs may collide.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

pub fn is_absolute(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/') && path[1..].split('/').all(|part| !part.is_empty())
}

/// Drops a trailing slash, keeping `/` itself.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn join(parent: &str, segment: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{segment}")
    } else {
        format!("{parent}/{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ampersand_and_space_collapse_to_one_dash() {
        assert_eq!(slugify("Home & Garden"), "home-garden");
    }

    #[test]
    fn trims_leading_and_trailing_separators() {
        assert_eq!(slugify("  --Men's Shirts!  "), "men-s-shirts");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn is_stable_for_same_input() {
        assert_eq!(slugify("Phone X 2"), slugify("Phone X 2"));
        assert_eq!(slugify("Phone X 2"), "phone-x-2");
    }

    #[test]
    fn non_ascii_letters_become_separators() {
        assert_eq!(slugify("Café Crème"), "caf-cr-me");
    }

    #[test]
    fn path_helpers() {
        assert!(is_absolute("/products"));
        assert!(is_absolute("/"));
        assert!(!is_absolute("products"));
        assert!(!is_absolute("/products//x"));
        assert_eq!(normalize("/products/"), "/products");
        assert_eq!(join("/products", "phone"), "/products/phone");
        assert_eq!(join("/", "products"), "/products");
    }
}
