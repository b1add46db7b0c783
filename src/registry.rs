use std::collections::BTreeMap;

use crate::interpreter::Interpreter;

/// in-memory deal registry; storage interface only, one interpreter
/// per deal
#[derive(Default)]
pub struct DealRegistry {
    deals: BTreeMap<String, Interpreter>,
}

impl DealRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// register a deal, returning any previous interpreter under the
    /// same name
    pub fn insert(&mut self, name: &str, interpreter: Interpreter) -> Option<Interpreter> {
        self.deals.insert(name.to_string(), interpreter)
    }

    pub fn get(&self, name: &str) -> Option<&Interpreter> {
        self.deals.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Interpreter> {
        self.deals.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Interpreter> {
        self.deals.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.deals.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_registry_crud() {
        let mut registry = DealRegistry::new();
        assert!(registry.is_empty());

        let deal = Interpreter::new(parse("EVENT COD").unwrap()).unwrap();
        assert!(registry.insert("solar-holdco", deal).is_none());
        assert_eq!(registry.names(), vec!["solar-holdco"]);
        assert!(registry.get("solar-holdco").is_some());

        registry
            .get_mut("solar-holdco")
            .unwrap()
            .set_event_default("COD")
            .unwrap();

        assert!(registry.remove("solar-holdco").is_some());
        assert!(registry.is_empty());
    }
}
