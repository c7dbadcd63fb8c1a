//! Tool classification and example prompts
//!
//! Categories come from ordered keyword rules over the tool's name and
//! description; the first rule with a matching keyword wins.

use serde::Serialize;

use super::ToolDescriptor;

/// Dashboard grouping for a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ToolCategory {
    Search,
    Chat,
    Documents,
    Traffic,
    Sessions,
    Performance,
    Other,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Search => "Search",
            ToolCategory::Chat => "Chat",
            ToolCategory::Documents => "Documents",
            ToolCategory::Traffic => "Traffic",
            ToolCategory::Sessions => "Sessions",
            ToolCategory::Performance => "Performance",
            ToolCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword rules, checked in order. A keyword matches any word it prefixes.
const RULES: &[(ToolCategory, &[&str])] = &[
    (ToolCategory::Performance, &["latency", "performance", "slow", "duration", "timing"]),
    (ToolCategory::Search, &["search", "term", "zero"]),
    (ToolCategory::Chat, &["chat", "question", "answer", "conversation"]),
    (ToolCategory::Documents, &["document", "citation", "cited", "source"]),
    (ToolCategory::Sessions, &["session", "visitor", "user"]),
    (ToolCategory::Traffic, &["traffic", "page", "view", "volume", "daily", "referrer"]),
];

pub fn classify(tool: &ToolDescriptor) -> ToolCategory {
    let words = words(&tool.name)
        .into_iter()
        .chain(words(&tool.description))
        .collect::<Vec<_>>();

    RULES
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| words.iter().any(|word| word.starts_with(keyword)))
        })
        .map(|(category, _)| *category)
        .unwrap_or(ToolCategory::Other)
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// When an example prompt applies
enum Applies {
    Category(ToolCategory),
    Param(&'static str),
}

/// Ordered prompt templates; `{tool}` is replaced by the readable tool name.
const TEMPLATES: &[(Applies, &str)] = &[
    (Applies::Category(ToolCategory::Search), "What are the top search terms this week?"),
    (Applies::Category(ToolCategory::Search), "Which searches returned no results?"),
    (Applies::Category(ToolCategory::Chat), "What are users asking the assistant most often?"),
    (Applies::Category(ToolCategory::Chat), "Show me the latest chat questions"),
    (Applies::Category(ToolCategory::Documents), "Which documents are cited most in answers?"),
    (
        Applies::Category(ToolCategory::Traffic),
        "How many page views did we get per day this month?",
    ),
    (Applies::Category(ToolCategory::Sessions), "How many unique sessions were there this week?"),
    (Applies::Category(ToolCategory::Performance), "What is the average chat response time?"),
    (Applies::Param("days"), "Run {tool} for the last 30 days"),
    (Applies::Param("limit"), "Show the top 5 results from {tool}"),
];

const FALLBACK_TEMPLATES: &[&str] = &["Run {tool}", "What does {tool} show?"];

const MAX_EXAMPLES: usize = 3;

/// Up to three example prompts for a tool; never empty.
pub fn example_prompts(tool: &ToolDescriptor, category: ToolCategory) -> Vec<String> {
    let readable = tool.name.replace(['_', '-'], " ");
    let render = |template: &str| template.replace("{tool}", &readable);

    let examples: Vec<String> = TEMPLATES
        .iter()
        .filter(|(applies, _)| match applies {
            Applies::Category(c) => *c == category,
            Applies::Param(name) => tool.parameters.iter().any(|p| p.name == *name),
        })
        .take(MAX_EXAMPLES)
        .map(|(_, template)| render(template))
        .collect();

    if examples.is_empty() {
        FALLBACK_TEMPLATES.iter().map(|t| render(t)).collect()
    } else {
        examples
    }
}
