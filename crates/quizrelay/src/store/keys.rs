//! Key layout shared by every relay instance writing to the same store.

use quizrelay_core::{ClientIdentity, Family};

const NAMESPACE: &str = "quizrelay";

/// Duplicate-request lock of `identity` for `family`.
pub fn lock_key(identity: &ClientIdentity, family: Family) -> String {
    format!("{NAMESPACE}:{identity}:{family}:lock")
}

/// Stored channel assignment of `identity` for `family`.
pub fn channel_key(identity: &ClientIdentity, family: Family) -> String {
    format!("{NAMESPACE}:{identity}:{family}:channel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_family() {
        let id = ClientIdentity::from("s-42");
        assert_eq!(lock_key(&id, Family::Question), "quizrelay:s-42:question:lock");
        assert_eq!(
            channel_key(&id, Family::Explanation),
            "quizrelay:s-42:explanation:channel"
        );
        assert_ne!(
            lock_key(&id, Family::Question),
            lock_key(&id, Family::Explanation)
        );
    }
}
