pub mod redline;
pub mod render;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ast::{ElementKind, Program};
use crate::errors::Result;
use crate::parser::parse;

pub use redline::{generate_redline, ModifiedSection, Redline};
pub use render::render_statement;

/// fixed article and section placement per statement kind
fn placement(kind: ElementKind) -> Option<(u32, &'static str, &'static str, &'static str)> {
    let entry = match kind {
        ElementKind::Define => (1, "Definitions", "1.01", "Defined Terms"),
        ElementKind::Condition => (1, "Definitions", "1.02", "Specified Conditions"),
        ElementKind::ConditionsPrecedent => {
            (4, "Conditions Precedent", "4.01", "Conditions to Closing")
        }
        ElementKind::Phase => (5, "Project Phases", "5.01", "Phases"),
        ElementKind::Transition => (5, "Project Phases", "5.02", "Phase Transitions"),
        ElementKind::Event => (5, "Project Phases", "5.03", "Events of Default"),
        ElementKind::Milestone => (6, "Construction Milestones", "6.01", "Milestones"),
        ElementKind::TechnicalMilestone => {
            (6, "Construction Milestones", "6.02", "Technical Milestones")
        }
        ElementKind::Regulatory => {
            (6, "Construction Milestones", "6.03", "Regulatory Approvals")
        }
        ElementKind::Basket => (7, "Covenants", "7.02", "Permitted Investments and Baskets"),
        ElementKind::Prohibit => (7, "Covenants", "7.06", "Negative Covenants"),
        ElementKind::Covenant => (7, "Covenants", "7.11", "Financial Covenants"),
        ElementKind::PerformanceGuarantee => (
            8,
            "Performance and Tax Provisions",
            "8.01",
            "Performance Guarantees",
        ),
        ElementKind::DegradationSchedule => (
            8,
            "Performance and Tax Provisions",
            "8.02",
            "Degradation Schedules",
        ),
        ElementKind::SeasonalAdjustment => (
            8,
            "Performance and Tax Provisions",
            "8.03",
            "Seasonal Adjustments",
        ),
        ElementKind::TaxEquityStructure => (
            8,
            "Performance and Tax Provisions",
            "8.04",
            "Tax Equity Structures",
        ),
        ElementKind::TaxCredit => {
            (8, "Performance and Tax Provisions", "8.05", "Tax Credits")
        }
        ElementKind::Depreciation => {
            (8, "Performance and Tax Provisions", "8.06", "Depreciation")
        }
        ElementKind::FlipEvent => {
            (8, "Performance and Tax Provisions", "8.07", "Flip Events")
        }
        ElementKind::Reserve => (9, "Reserve Accounts", "9.01", "Reserve Accounts"),
        ElementKind::Waterfall => (10, "Cash Waterfalls", "10.01", "Application of Funds"),
        ElementKind::Amendment => (11, "Amendments", "11.01", "Amendments"),
        ElementKind::Load => return None,
    };
    Some(entry)
}

/// subsection labels: (a), (b), ..., (z), (aa), (ab), ...
fn subsection_label(index: usize) -> String {
    let mut label = String::new();
    let mut n = index;
    loop {
        label.insert(0, (b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    format!("({})", label)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: String,
    pub borrower: Option<String>,
    pub lender: Option<String>,
    pub effective_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subsection {
    pub label: String,
    pub element_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub number: String,
    pub title: String,
    pub subsections: Vec<Subsection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub number: u32,
    pub title: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub metadata: DocumentMetadata,
    pub articles: Vec<Article>,
    pub full_text: String,
}

/// parse source and render it as a legal-document outline
pub fn generate_document(source: &str, metadata: DocumentMetadata) -> Result<Document> {
    let program = parse(source)?;
    Ok(generate_document_from(&program, metadata))
}

/// render an already-loaded (possibly amended) program
pub fn generate_document_from(program: &Program, metadata: DocumentMetadata) -> Document {
    // article number -> (title, section number -> (title, subsections))
    let mut articles: Vec<Article> = Vec::new();

    for statement in &program.statements {
        let kind = statement.node.element_kind();
        let Some((article_no, article_title, section_no, section_title)) = placement(kind) else {
            continue;
        };
        let text = render_statement(&statement.node);
        if text.is_empty() {
            continue;
        }
        let element_name = statement
            .node
            .element_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", kind, article_no));

        let article_idx = match articles.iter().position(|a| a.number == article_no) {
            Some(idx) => idx,
            None => {
                articles.push(Article {
                    number: article_no,
                    title: article_title.to_string(),
                    sections: Vec::new(),
                });
                articles.len() - 1
            }
        };
        let article = &mut articles[article_idx];
        let section_idx = match article.sections.iter().position(|s| s.number == section_no) {
            Some(idx) => idx,
            None => {
                article.sections.push(Section {
                    number: section_no.to_string(),
                    title: section_title.to_string(),
                    subsections: Vec::new(),
                });
                article.sections.len() - 1
            }
        };
        let section = &mut article.sections[section_idx];
        let label = subsection_label(section.subsections.len());
        section.subsections.push(Subsection {
            label,
            element_name,
            text,
        });
    }

    articles.sort_by_key(|a| a.number);
    for article in &mut articles {
        article
            .sections
            .sort_by(|a, b| a.number.cmp(&b.number));
    }

    let full_text = render_full_text(&metadata, &articles);
    Document {
        metadata,
        articles,
        full_text,
    }
}

fn render_full_text(metadata: &DocumentMetadata, articles: &[Article]) -> String {
    let mut text = String::new();
    if !metadata.title.is_empty() {
        text.push_str(&metadata.title.to_uppercase());
        text.push_str("\n\n");
    }
    if let (Some(borrower), Some(lender)) = (&metadata.borrower, &metadata.lender) {
        text.push_str(&format!("between {} and {}\n", borrower, lender));
    }
    if let Some(date) = metadata.effective_date {
        text.push_str(&format!("dated as of {}\n", date));
    }
    for article in articles {
        text.push_str(&format!(
            "\nARTICLE {}. {}\n",
            article.number,
            article.title.to_uppercase()
        ));
        for section in &article.sections {
            text.push_str(&format!("\n  Section {}. {}.\n", section.number, section.title));
            for subsection in &section.subsections {
                text.push_str(&format!("\n    {} {}\n", subsection.label, subsection.text));
            }
        }
    }
    text
}
