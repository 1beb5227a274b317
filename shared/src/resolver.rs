//! Rewrites stored media references into displayable locators.
//!
//! Stored references arrive in several shapes: transient object-URLs,
//! embedded data URLs, share links from the file host, bare file ids, or
//! opaque external URLs. `resolve` is pure and idempotent, so call sites
//! can apply it unconditionally.

use url::Url;

use crate::MIN_BARE_FILE_ID_LEN;

const DRIVE_HOSTS: &[&str] = &[
    "drive.google.com",
    "docs.google.com",
    "drive.usercontent.google.com",
    "lh3.googleusercontent.com",
];

const MIN_EMBEDDED_FILE_ID_LEN: usize = 10;

/// Canonical direct-access display URL for a hosted file id.
#[must_use]
pub fn direct_view_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?export=view&id={file_id}")
}

/// `resolve(resolve(x)) == resolve(x)` for every input.
#[must_use]
pub fn resolve(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return raw.to_string();
    }

    // Transient and embedded references are already displayable.
    if trimmed.starts_with("blob:") || trimmed.starts_with("data:") {
        return raw.to_string();
    }

    if let Ok(url) = Url::parse(trimmed) {
        if is_drive_host(url.host_str()) {
            if let Some(id) = extract_file_id(&url) {
                return direct_view_url(&id);
            }
        }
        // Opaque external URL.
        return raw.to_string();
    }

    if is_bare_file_id(trimmed) {
        return direct_view_url(trimmed);
    }

    raw.to_string()
}

fn is_drive_host(host: Option<&str>) -> bool {
    host.map_or(false, |h| {
        let h = h.to_ascii_lowercase();
        DRIVE_HOSTS.iter().any(|known| *known == h)
    })
}

fn extract_file_id(url: &Url) -> Option<String> {
    // Path form: .../d/{id}/... (share links, usercontent hosts).
    if let Some(mut segments) = url.path_segments() {
        while let Some(segment) = segments.next() {
            if segment == "d" {
                if let Some(candidate) = segments.next() {
                    if is_embedded_file_id(candidate) {
                        return Some(candidate.to_string());
                    }
                }
                break;
            }
        }
    }

    // Query form: ...?id={id} (open/uc links).
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|candidate| is_embedded_file_id(candidate))
}

fn has_file_id_charset(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_embedded_file_id(s: &str) -> bool {
    s.len() >= MIN_EMBEDDED_FILE_ID_LEN && has_file_id_charset(s)
}

fn is_bare_file_id(s: &str) -> bool {
    s.len() >= MIN_BARE_FILE_ID_LEN && has_file_id_charset(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FILE_ID: &str = "1A2b3C4d5E6f7G8h9I0jKlMnOpQrStUvW";

    #[test]
    fn blob_and_data_references_pass_through() {
        let blob = "blob:https://app.example/9f81c2";
        assert_eq!(resolve(blob), blob);
        let data = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(resolve(data), data);
    }

    #[test]
    fn share_links_are_rewritten_to_direct_view() {
        let share = format!("https://drive.google.com/file/d/{FILE_ID}/view?usp=sharing");
        assert_eq!(resolve(&share), direct_view_url(FILE_ID));

        let open = format!("https://drive.google.com/open?id={FILE_ID}");
        assert_eq!(resolve(&open), direct_view_url(FILE_ID));

        let usercontent = format!("https://lh3.googleusercontent.com/d/{FILE_ID}");
        assert_eq!(resolve(&usercontent), direct_view_url(FILE_ID));
    }

    #[test]
    fn bare_ids_are_rewritten() {
        assert_eq!(resolve(FILE_ID), direct_view_url(FILE_ID));
    }

    #[test]
    fn short_strings_are_not_treated_as_ids() {
        assert_eq!(resolve("photo"), "photo");
        assert_eq!(resolve("IMG-2024"), "IMG-2024");
    }

    #[test]
    fn opaque_urls_pass_through() {
        let external = "https://cdn.example.com/media/photo.jpg?w=800";
        assert_eq!(resolve(external), external);
    }

    #[test]
    fn canonical_form_is_a_fixpoint() {
        let canonical = direct_view_url(FILE_ID);
        assert_eq!(resolve(&canonical), canonical);
    }

    proptest! {
        #[test]
        fn resolve_is_idempotent_for_arbitrary_input(raw in ".{0,120}") {
            let once = resolve(&raw);
            prop_assert_eq!(resolve(&once), once);
        }

        #[test]
        fn resolve_is_idempotent_for_id_shaped_input(id in "[A-Za-z0-9_-]{10,60}") {
            let share = format!("https://drive.google.com/file/d/{id}/view");
            let once = resolve(&share);
            prop_assert_eq!(resolve(&once), once.clone());
            let bare = resolve(&id);
            prop_assert_eq!(resolve(&bare), bare);
        }
    }
}
