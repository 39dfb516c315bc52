//! Gate suggestions for a kind of work

use serde::Serialize;

use super::Gate;

/// Default number of suggestions returned
pub const MAX_SUGGESTIONS: usize = 3;

/// Keywords associated with each work type
fn work_keywords(work_type: &str) -> Vec<String> {
    let fixed: &[&str] = match work_type {
        "code" => &["code", "quality", "test", "coverage"],
        "research" => &["research", "quality", "content", "accuracy"],
        "security" => &["security", "awareness", "pr-security"],
        "documentation" => &["content", "structure", "clarity", "educational"],
        _ => &[],
    };

    if fixed.is_empty() {
        vec![work_type.to_string()]
    } else {
        fixed.iter().map(|k| k.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateSuggestion {
    pub id: String,
    pub name: String,
    pub severity: String,
    pub matched: Vec<String>,
}

/// Rank gates whose id, name or triggers mention a keyword of the work types
pub fn suggest_gates(gates: &[Gate], work_types: &[String], limit: usize) -> Vec<GateSuggestion> {
    let mut keywords: Vec<String> = Vec::new();

    for work_type in work_types {
        for keyword in work_keywords(&work_type.trim().to_lowercase()) {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }

    let mut ranked: Vec<(&Gate, Vec<String>)> = gates
        .iter()
        .filter_map(|gate| {
            let haystack = format!(
                "{} {} {}",
                gate.id(),
                gate.name(),
                gate.triggers().join(" ")
            )
            .to_lowercase();

            let matched: Vec<String> = keywords
                .iter()
                .filter(|k| haystack.contains(k.as_str()))
                .cloned()
                .collect();

            (!matched.is_empty()).then_some((gate, matched))
        })
        .collect();

    ranked.sort_by(|(a, ma), (b, mb)| {
        mb.len()
            .cmp(&ma.len())
            .then_with(|| a.severity().cmp(&b.severity()))
            .then_with(|| a.id().cmp(b.id()))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(gate, matched)| GateSuggestion {
            id: gate.id().to_string(),
            name: gate.name().to_string(),
            severity: gate.severity().to_string(),
            matched,
        })
        .collect()
}
