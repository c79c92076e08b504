//! Tag-prefix subscription matching.

/// Separator between a tag prefix and the remainder of the tag, mirroring
/// the conventional `salt/job/<jid>/ret` style of dotted/slashed tags.
pub const TAG_SEPARATOR: char = '/';

/// Whether `tag` is matched by a subscriber's `prefix`: exact match, or
/// `tag` continues past `prefix` with the separator.
pub fn tag_matches(tag: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if tag == prefix {
        return true;
    }
    tag.strip_prefix(prefix).is_some_and(|rest| rest.starts_with(TAG_SEPARATOR))
}
