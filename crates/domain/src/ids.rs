//! Session identifiers: server-issued v4 UUIDs in canonical lowercase
//! 8-4-4-4-12 form.

use uuid::Uuid;

/// Mint a new session ID.
pub fn new_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Parse a client-supplied session ID. Accepts only the canonical lowercase
/// hyphenated form of a version-4 UUID; anything else is rejected.
pub fn parse_session_id(raw: &str) -> Option<Uuid> {
    let id = Uuid::try_parse(raw).ok()?;
    if id.get_version_num() != 4 {
        return None;
    }
    // try_parse is case-insensitive and accepts braced/urn forms; require the
    // exact canonical rendering.
    if id.to_string() != raw {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_minted_ids() {
        let id = new_session_id();
        assert_eq!(parse_session_id(&id.to_string()), Some(id));
    }

    #[test]
    fn rejects_uppercase_and_braced_forms() {
        let id = new_session_id();
        assert!(parse_session_id(&id.to_string().to_uppercase()).is_none());
        assert!(parse_session_id(&format!("{{{id}}}")).is_none());
    }

    #[test]
    fn rejects_non_v4() {
        // Version-1 style UUID.
        assert!(parse_session_id("c232ab00-9414-11ec-b3c8-9f6bdeced846").is_none());
        assert!(parse_session_id("not-a-uuid").is_none());
        assert!(parse_session_id("").is_none());
    }
}
