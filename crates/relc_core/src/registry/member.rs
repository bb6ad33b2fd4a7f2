use std::collections::HashMap;

/// Hands out state member names unique across a compilation unit.
#[derive(Debug, Default)]
pub struct MemberManager {
    counts: HashMap<String, usize>,
}

impl MemberManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a unique member name based on `hint`.
    ///
    /// The first request for a hint returns the hint itself, later requests
    /// are suffixed with a counter.
    pub fn unique_member(&mut self, hint: &str) -> String {
        loop {
            let count = self.counts.entry(hint.to_string()).or_insert(0);
            let name = if *count == 0 {
                hint.to_string()
            } else {
                format!("{hint}_{count}")
            };
            *count += 1;

            // A suffixed name could collide with a hint that happens to look
            // suffixed.
            if name == hint || !self.counts.contains_key(&name) {
                self.counts.entry(name.clone()).or_insert(1);
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names() {
        let mut members = MemberManager::new();
        assert_eq!("hash", members.unique_member("hash"));
        assert_eq!("hash_1", members.unique_member("hash"));
        assert_eq!("link", members.unique_member("link"));
        assert_eq!("hash_2", members.unique_member("hash"));
    }

    #[test]
    fn suffixed_hint_collision() {
        let mut members = MemberManager::new();
        assert_eq!("a_1", members.unique_member("a_1"));
        assert_eq!("a", members.unique_member("a"));
        // "a_1" already handed out.
        assert_eq!("a_2", members.unique_member("a"));
    }
}
