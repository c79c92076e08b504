//! Loads the minimal identity-facts map (§3 Supplemented: identity facts /
//! grains) a minion evaluates target expressions against.

use std::path::Path;

use saltcore_wire::IdentityFacts;

use crate::error::MinionError;

pub fn load_facts(minion_id: &str, facts_file: Option<&Path>) -> Result<IdentityFacts, MinionError> {
    match facts_file {
        Some(path) if path.exists() => {
            let bytes = std::fs::read(path)?;
            let mut facts: IdentityFacts = serde_json::from_slice(&bytes)?;
            if facts.id.is_empty() {
                facts.id = minion_id.to_string();
            }
            Ok(facts)
        }
        _ => Ok(IdentityFacts::new(minion_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_bare_id_with_no_facts_file() {
        let facts = load_facts("m1", None).expect("load");
        assert_eq!(facts.id, "m1");
        assert!(facts.roles.is_empty());
    }

    #[test]
    fn loads_roles_and_attrs_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("facts.json");
        std::fs::write(&path, r#"{"id":"m1","roles":["web"],"attrs":{"dc":"us-east"}}"#).expect("write");
        let facts = load_facts("m1", Some(&path)).expect("load");
        assert_eq!(facts.roles, vec!["web".to_string()]);
        assert_eq!(facts.attrs.get("dc"), Some(&"us-east".to_string()));
    }
}
