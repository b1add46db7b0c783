use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::Program;
use crate::errors::Result;
use crate::parser::parse;

use super::render::render_statement;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedSection {
    pub element_name: String,
    pub old_content: String,
    pub new_content: String,
}

/// structural diff between two agreement sources, keyed by element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redline {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<ModifiedSection>,
    /// formatted body with [+] added, [-] removed, [~] modified markers
    pub text: String,
}

/// element key -> rendered content, in a deterministic order
fn rendered_sections(program: &Program) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    for statement in &program.statements {
        let Some(name) = statement.node.element_name() else {
            continue;
        };
        let content = render_statement(&statement.node);
        if content.is_empty() {
            continue;
        }
        let key = format!("{} {}", statement.node.element_kind(), name);
        sections.insert(key, content);
    }
    sections
}

/// compare two sources by rendered section content
pub fn generate_redline(old_source: &str, new_source: &str) -> Result<Redline> {
    let old_sections = rendered_sections(&parse(old_source)?);
    let new_sections = rendered_sections(&parse(new_source)?);

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut lines = Vec::new();

    for (key, new_content) in &new_sections {
        match old_sections.get(key) {
            None => {
                added.push(key.clone());
                lines.push(format!("[+] {}: {}", key, new_content));
            }
            Some(old_content) if old_content != new_content => {
                modified.push(ModifiedSection {
                    element_name: key.clone(),
                    old_content: old_content.clone(),
                    new_content: new_content.clone(),
                });
                lines.push(format!("[~] {}: {} -> {}", key, old_content, new_content));
            }
            Some(_) => {}
        }
    }
    for (key, old_content) in &old_sections {
        if !new_sections.contains_key(key) {
            removed.push(key.clone());
            lines.push(format!("[-] {}: {}", key, old_content));
        }
    }
    lines.sort();

    Ok(Redline {
        added,
        removed,
        modified,
        text: lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
        BASKET GeneralInvestments CAPACITY $25_000_000";

    const NEW: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        COVENANT MaxLeverage REQUIRES Leverage <= 5.25\n\
        RESERVE DSRA TARGET $30_000_000";

    #[test]
    fn test_redline_classifies_changes() {
        let redline = generate_redline(OLD, NEW).unwrap();
        assert_eq!(redline.added, vec!["reserve DSRA"]);
        assert_eq!(redline.removed, vec!["basket GeneralInvestments"]);
        assert_eq!(redline.modified.len(), 1);
        assert_eq!(redline.modified[0].element_name, "covenant MaxLeverage");
        assert!(redline.modified[0].old_content.contains("5.00"));
        assert!(redline.modified[0].new_content.contains("5.25"));
    }

    #[test]
    fn test_redline_markers_in_text() {
        let redline = generate_redline(OLD, NEW).unwrap();
        assert!(redline.text.contains("[+] reserve DSRA"));
        assert!(redline.text.contains("[-] basket GeneralInvestments"));
        assert!(redline.text.contains("[~] covenant MaxLeverage"));
    }

    #[test]
    fn test_identical_sources_produce_empty_redline() {
        let redline = generate_redline(OLD, OLD).unwrap();
        assert!(redline.added.is_empty());
        assert!(redline.removed.is_empty());
        assert!(redline.modified.is_empty());
        assert!(redline.text.is_empty());
    }
}
