//! Chain expression parser
//!
//! ```text
//! >>analyze src/ --> >>implement focus=errors :: code-quality --> write release notes :: 'mentions breaking changes'
//! ```
//!
//! Steps are separated by `-->` (or `→`). A step starting with `>>` invokes a
//! registered prompt; anything else is an inline directive. Each step may be
//! followed by `:: gate-id` or `:: 'quoted criteria'` gate attachments.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::domain::DomainError;
use crate::domain::gate::GateId;
use crate::domain::prompt::PromptId;

const ARROW: &str = "-->";
const UNICODE_ARROW: char = '\u{2192}';
const GATE_MARKER: &str = "::";
const PROMPT_MARKER: &str = ">>";

/// Gate attached to a step inside the expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InlineGateSpec {
    /// Quoted free-text criterion, becomes an ad-hoc gate
    Criteria { text: String },
    /// Registered gate by id
    Reference { id: GateId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptStep {
    pub prompt_id: PromptId,
    pub positional: Vec<String>,
    pub named: BTreeMap<String, String>,
    pub gates: Vec<InlineGateSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineStep {
    pub directive: String,
    pub gates: Vec<InlineGateSpec>,
}

/// One parsed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainStepSpec {
    Prompt(PromptStep),
    Inline(InlineStep),
}

impl ChainStepSpec {
    pub fn gates(&self) -> &[InlineGateSpec] {
        match self {
            Self::Prompt(step) => &step.gates,
            Self::Inline(step) => &step.gates,
        }
    }

    pub fn prompt_id(&self) -> Option<&PromptId> {
        match self {
            Self::Prompt(step) => Some(&step.prompt_id),
            Self::Inline(_) => None,
        }
    }
}

/// A parsed chain expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainExpression {
    source: String,
    steps: Vec<ChainStepSpec>,
}

impl ChainExpression {
    /// Parse without a step limit
    pub fn parse(source: &str) -> Result<Self, DomainError> {
        Self::parse_with_limit(source, usize::MAX)
    }

    pub fn parse_with_limit(source: &str, max_steps: usize) -> Result<Self, DomainError> {
        let trimmed = source.trim();

        if trimmed.is_empty() {
            return Err(DomainError::parse("chain expression is empty"));
        }

        let segments = split_outside_quotes(trimmed, Separator::Step)?;

        if segments.len() > max_steps {
            return Err(DomainError::parse(format!(
                "chain has {} steps, the limit is {}",
                segments.len(),
                max_steps
            )));
        }

        let steps = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| parse_step(index, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: trimmed.to_string(),
            steps,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn steps(&self) -> &[ChainStepSpec] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct prompt ids in first-use order
    pub fn prompt_ids(&self) -> Vec<PromptId> {
        let mut ids: Vec<PromptId> = Vec::new();

        for id in self.steps.iter().filter_map(ChainStepSpec::prompt_id) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

impl FromStr for ChainExpression {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChainExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Detect whether free text is a prompt invocation or chain at all
pub fn looks_like_invocation(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with(PROMPT_MARKER) || trimmed.contains(ARROW) || trimmed.contains(UNICODE_ARROW)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Separator {
    Step,
    Gate,
}

/// Quotes only open at the start of a word so apostrophes in prose are literal
fn opens_quote(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => c.is_whitespace() || c == '=' || c == ':',
    }
}

fn split_outside_quotes(text: &str, separator: Separator) -> Result<Vec<String>, DomainError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        let marker_len = match separator {
            Separator::Step if rest.starts_with(ARROW) => Some(ARROW.len()),
            Separator::Step if c == UNICODE_ARROW => Some(c.len_utf8()),
            // `std::fs` in prose is not a gate marker
            Separator::Gate
                if rest.starts_with(GATE_MARKER) && prev.is_none_or(|p| p.is_whitespace()) =>
            {
                Some(GATE_MARKER.len())
            }
            _ => None,
        };

        if let Some(len) = marker_len {
            parts.push(std::mem::take(&mut current));
            prev = None;
            rest = &rest[len..];
            continue;
        }

        if (c == '"' || c == '\'') && opens_quote(prev) {
            quote = Some(c);
        }

        current.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    if let Some(q) = quote {
        return Err(DomainError::parse(format!("unterminated {} quote", q)));
    }

    parts.push(current);
    Ok(parts)
}

fn parse_step(index: usize, segment: &str) -> Result<ChainStepSpec, DomainError> {
    let position = index + 1;
    let segment = segment.trim();

    if segment.is_empty() {
        return Err(DomainError::parse(format!("step {} is empty", position)));
    }

    let mut parts = split_outside_quotes(segment, Separator::Gate)?.into_iter();
    let body = parts.next().unwrap_or_default();
    let body = body.trim();

    let gates = parts
        .map(|raw| parse_gate(position, &raw))
        .collect::<Result<Vec<_>, _>>()?;

    if body.is_empty() {
        return Err(DomainError::parse(format!(
            "step {} has gates but no prompt or directive",
            position
        )));
    }

    match body.strip_prefix(PROMPT_MARKER) {
        Some(invocation) => parse_prompt_step(position, invocation, gates),
        None => Ok(ChainStepSpec::Inline(InlineStep {
            directive: body.to_string(),
            gates,
        })),
    }
}

fn parse_prompt_step(
    position: usize,
    invocation: &str,
    gates: Vec<InlineGateSpec>,
) -> Result<ChainStepSpec, DomainError> {
    let mut tokens = tokenize(invocation.trim())?.into_iter();

    let raw_id = tokens
        .next()
        .ok_or_else(|| DomainError::parse(format!("step {}: '>>' without a prompt id", position)))?;

    let prompt_id = PromptId::new(raw_id.clone()).map_err(|e| {
        DomainError::parse(format!("step {}: invalid prompt id '{}': {}", position, raw_id, e))
    })?;

    let mut positional = Vec::new();
    let mut named = BTreeMap::new();

    for token in tokens {
        match split_named(&token) {
            Some((key, value)) => {
                if named.insert(key.to_string(), value).is_some() {
                    return Err(DomainError::parse(format!(
                        "step {}: argument '{}' given twice",
                        position, key
                    )));
                }
            }
            None => positional.push(unquote(&token)),
        }
    }

    Ok(ChainStepSpec::Prompt(PromptStep {
        prompt_id,
        positional,
        named,
        gates,
    }))
}

fn parse_gate(position: usize, raw: &str) -> Result<InlineGateSpec, DomainError> {
    let raw = raw.trim();

    if raw.is_empty() {
        return Err(DomainError::parse(format!("step {}: empty gate after '::'", position)));
    }

    if is_quoted(raw) {
        let text = raw[1..raw.len() - 1].trim();

        if text.is_empty() {
            return Err(DomainError::parse(format!(
                "step {}: quoted gate criteria is empty",
                position
            )));
        }
        return Ok(InlineGateSpec::Criteria {
            text: text.to_string(),
        });
    }

    GateId::new(raw)
        .map(|id| InlineGateSpec::Reference { id })
        .map_err(|e| DomainError::parse(format!("step {}: invalid gate '{}': {}", position, raw, e)))
}

/// Whitespace split that keeps quoted runs together
fn tokenize(text: &str) -> Result<Vec<String>, DomainError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => {
                if (c == '"' || c == '\'') && opens_quote(prev) {
                    quote = Some(c);
                }
                current.push(c);
            }
        }
        prev = Some(c);
    }

    if let Some(q) = quote {
        return Err(DomainError::parse(format!("unterminated {} quote", q)));
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn split_named(token: &str) -> Option<(&str, String)> {
    let (key, value) = token.split_once('=')?;
    let valid_key = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    valid_key.then(|| (key, unquote(value)))
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}

fn unquote(text: &str) -> String {
    if is_quoted(text) {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(step: &ChainStepSpec) -> &PromptStep {
        match step {
            ChainStepSpec::Prompt(p) => p,
            other => panic!("expected prompt step, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_three_step_chain() {
        let chain = ChainExpression::parse(">>analyze --> >>implement --> >>test").unwrap();

        assert_eq!(chain.len(), 3);
        let ids: Vec<&str> = chain
            .steps()
            .iter()
            .map(|s| prompt(s).prompt_id.as_str())
            .collect();
        assert_eq!(ids, vec!["analyze", "implement", "test"]);
    }

    #[test]
    fn test_unicode_arrow_and_trimming() {
        let chain = ChainExpression::parse("  >>a   →   >>b  ").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.source(), ">>a   →   >>b");
    }

    #[test]
    fn test_arguments() {
        let chain =
            ChainExpression::parse(r#">>review src/lib.rs focus="error handling" depth=3"#).unwrap();
        let step = prompt(&chain.steps()[0]);

        assert_eq!(step.positional, vec!["src/lib.rs"]);
        assert_eq!(step.named["focus"], "error handling");
        assert_eq!(step.named["depth"], "3");
    }

    #[test]
    fn test_quoted_positional() {
        let chain = ChainExpression::parse(r#">>ask "what does --> mean""#).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(prompt(&chain.steps()[0]).positional, vec!["what does --> mean"]);
    }

    #[test]
    fn test_inline_step_with_apostrophe() {
        let chain = ChainExpression::parse(">>analyze --> summarize what's risky").unwrap();

        match &chain.steps()[1] {
            ChainStepSpec::Inline(step) => assert_eq!(step.directive, "summarize what's risky"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inline_gates() {
        let chain = ChainExpression::parse(
            ">>implement :: code-quality :: 'has tests' --> >>test",
        )
        .unwrap();

        let gates = chain.steps()[0].gates();
        assert_eq!(gates.len(), 2);
        assert_eq!(
            gates[0],
            InlineGateSpec::Reference {
                id: GateId::new("code-quality").unwrap()
            }
        );
        assert_eq!(
            gates[1],
            InlineGateSpec::Criteria {
                text: "has tests".to_string()
            }
        );
        assert!(chain.steps()[1].gates().is_empty());
    }

    #[test]
    fn test_path_separator_is_not_a_gate() {
        let chain = ChainExpression::parse("replace std::fs calls :: 'no blocking io'").unwrap();

        match &chain.steps()[0] {
            ChainStepSpec::Inline(step) => {
                assert_eq!(step.directive, "replace std::fs calls");
                assert_eq!(step.gates.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_expression() {
        assert!(matches!(
            ChainExpression::parse("   "),
            Err(DomainError::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_step() {
        let err = ChainExpression::parse(">>a --> --> >>b").unwrap_err();
        assert_eq!(err.to_string(), "Parse error: step 2 is empty");

        assert!(ChainExpression::parse(">>a -->").is_err());
    }

    #[test]
    fn test_prompt_marker_without_id() {
        let err = ChainExpression::parse(">>a --> >>").unwrap_err();
        assert!(err.to_string().contains("without a prompt id"));
    }

    #[test]
    fn test_invalid_prompt_id() {
        assert!(matches!(
            ChainExpression::parse(">>bad.id"),
            Err(DomainError::Parse { .. })
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = ChainExpression::parse(r#">>ask "open ended"#).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_empty_gate() {
        assert!(ChainExpression::parse(">>a ::").is_err());
        assert!(ChainExpression::parse(">>a :: ''").is_err());
        assert!(ChainExpression::parse(":: 'x'").is_err());
    }

    #[test]
    fn test_duplicate_named_argument() {
        assert!(ChainExpression::parse(">>a k=1 k=2").is_err());
    }

    #[test]
    fn test_step_limit() {
        let err = ChainExpression::parse_with_limit(">>a --> >>b --> >>c", 2).unwrap_err();
        assert!(err.to_string().contains("limit is 2"));
    }

    #[test]
    fn test_prompt_ids_distinct() {
        let chain = ChainExpression::parse(">>a --> note --> >>b --> >>a").unwrap();
        let ids: Vec<String> = chain.prompt_ids().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_looks_like_invocation() {
        assert!(looks_like_invocation(">>analyze"));
        assert!(looks_like_invocation("plan --> build"));
        assert!(!looks_like_invocation("just a question"));
    }
}
