//! LLM prompts for the analysis pipeline.
//!
//! The prompt hash is stored with every finding so stale analyses can
//! be detected when prompts change.

use sha2::{Digest, Sha256};

use crate::types::finding::Finding;
use crate::types::unit::UnitKey;

/// Prompt for figurative-language analysis of one verse.
pub const ANALYZE_PROMPT: &str = r#"Analyze this verse for figurative language.

Verse ({reference}):
{text}

Report every figurative expression you find. Recognized categories:
metaphor, simile, personification, idiom, hyperbole, metonymy.

Output a JSON array, one object per expression:
[
    {
        "type": "metaphor",
        "text": "the exact words from the verse",
        "explanation": "why this is figurative"
    }
]

If the verse contains no figurative language, output an empty array: []"#;

/// Stricter variant used on a same-model retry after a malformed
/// response.
pub const STRICT_ANALYZE_PROMPT: &str = r#"Analyze this verse for figurative language.

Verse ({reference}):
{text}

Recognized categories: metaphor, simile, personification, idiom,
hyperbole, metonymy.

IMPORTANT: output ONLY a JSON array, with no commentary before or
after it. Every element must be an object with exactly the keys
"type", "text", and "explanation". If there is no figurative language,
output exactly: []"#;

/// Prompt for the validation pass over previously stored findings.
pub const VALIDATE_PROMPT: &str = r#"Review these figurative-language findings for the verse below.

Verse ({reference}):
{text}

Findings:
{findings}

For each finding decide:
- "keep" if the classification is correct
- "reclassify" if the expression is figurative but the category is wrong
- "reject" if the expression is not figurative at all

Output a JSON array:
[
    {"index": 0, "verdict": "keep", "note": "brief reason"}
]"#;

/// Format the analysis prompt for one unit.
pub fn format_analyze_prompt(key: &UnitKey, text: &str, strict: bool) -> String {
    let template = if strict {
        STRICT_ANALYZE_PROMPT
    } else {
        ANALYZE_PROMPT
    };
    template
        .replace("{reference}", &key.to_string())
        .replace("{text}", text)
}

/// Format the validation prompt for a group of findings.
pub fn format_validate_prompt(key: &UnitKey, text: &str, findings: &[Finding]) -> String {
    let listing = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "{i}. [{}] \"{}\" - {}",
                f.kinds.primary_label(),
                f.excerpt,
                f.explanation
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    VALIDATE_PROMPT
        .replace("{reference}", &key.to_string())
        .replace("{text}", text)
        .replace("{findings}", &listing)
}

/// Hash of the analysis prompt, recorded with every finding.
pub fn analyze_prompt_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(ANALYZE_PROMPT.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
