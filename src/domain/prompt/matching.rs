//! Keyword intent matching over registered prompts

use serde::Serialize;

use super::PromptTemplate;

const KEYWORD_SCORE: u32 = 10;
const CATEGORY_SCORE: u32 = 20;
const NAME_WORD_SCORE: u32 = 15;
const MIN_NAME_WORD_LEN: usize = 4;

/// A prompt ranked against a free-text query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMatch {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub score: u32,
}

/// Score one prompt against a lowercase query
pub fn score_prompt(prompt: &PromptTemplate, query: &str) -> u32 {
    let query = query.to_lowercase();
    let mut score = 0;

    for keyword in prompt.keywords() {
        let keyword = keyword.trim().to_lowercase();

        if !keyword.is_empty() && query.contains(&keyword) {
            score += KEYWORD_SCORE;
        }
    }

    let category = prompt.category().trim().to_lowercase();
    if !category.is_empty() && query.contains(&category) {
        score += CATEGORY_SCORE;
    }

    for word in prompt
        .name()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_NAME_WORD_LEN)
    {
        if query.contains(word) {
            score += NAME_WORD_SCORE;
        }
    }

    score
}

/// Rank prompts by score, dropping non-matches; ties keep id order
pub fn rank_prompts(prompts: &[PromptTemplate], query: &str, limit: usize) -> Vec<PromptMatch> {
    let mut matches: Vec<PromptMatch> = prompts
        .iter()
        .filter_map(|prompt| {
            let score = score_prompt(prompt, query);

            (score > 0).then(|| PromptMatch {
                id: prompt.id().to_string(),
                name: prompt.name().to_string(),
                category: prompt.category().to_string(),
                description: prompt.description().to_string(),
                score,
            })
        })
        .collect();

    matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    matches.truncate(limit);
    matches
}
