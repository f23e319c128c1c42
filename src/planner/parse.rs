//! Three-tier Planner response parsing.

use super::action::Action;
use regex::Regex;
use std::sync::OnceLock;

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").unwrap())
}

fn action_kind_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']?action["']?\s*[:=]\s*["']?(create_index|rewrite_query|run_analyze|test_index|done|failed)["']?"#).unwrap()
    })
}

/// Parse a raw LLM response into an [`Action`], per the three-tier strategy:
/// a fenced JSON block, then a bare JSON object, then a regex that extracts
/// only the action kind. Never panics; unparseable or incomplete responses
/// become `Action::Failed("planning error")`.
pub fn parse_response(text: &str) -> Action {
    if let Some(caps) = fenced_block_re().captures(text) {
        if let Ok(action) = serde_json::from_str::<Action>(&caps[1]) {
            return action;
        }
    }

    if let Some(obj) = extract_bare_object(text) {
        if let Ok(action) = serde_json::from_str::<Action>(&obj) {
            return action;
        }
    }

    if let Some(caps) = action_kind_re().captures(text) {
        let kind = &caps[1];
        return Action::Failed {
            rationale: format!(
                "planning error: detected action kind '{kind}' but response was not valid JSON"
            ),
        };
    }

    Action::Failed {
        rationale: "planning error".to_string(),
    }
}

/// Find the first `{`-to-matching-`}` balanced substring in `text`.
fn extract_bare_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_block() {
        let text = "Here is my answer:\n```json\n{\"action\":\"run_analyze\",\"table\":\"orders\",\"rationale\":\"stale stats\",\"confidence\":0.8}\n```\nthanks";
        let action = parse_response(text);
        assert!(matches!(action, Action::RunAnalyze { .. }));
    }

    #[test]
    fn parses_bare_json_object_without_fence() {
        let text = "{\"action\":\"done\",\"rationale\":\"query now passes\"}";
        let action = parse_response(text);
        assert!(matches!(action, Action::Done { .. }));
    }

    #[test]
    fn falls_back_to_action_kind_regex() {
        let text = "I will use action: create_index to fix this, but here's some broken json {oops";
        let action = parse_response(text);
        match action {
            Action::Failed { rationale } => assert!(rationale.contains("create_index")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn totally_unparseable_becomes_generic_failed() {
        let action = parse_response("I refuse to answer in JSON.");
        assert!(matches!(action, Action::Failed { .. }));
    }

    #[test]
    fn create_index_missing_ddl_field_is_coerced_to_failed() {
        let text = "```json\n{\"action\":\"create_index\",\"rationale\":\"r\",\"confidence\":0.5}\n```";
        let action = parse_response(text);
        assert!(matches!(action, Action::Failed { .. }));
    }

    #[test]
    fn rewrite_query_missing_new_sql_field_is_coerced_to_failed() {
        let text = "{\"action\":\"rewrite_query\",\"rationale\":\"r\",\"confidence\":0.5}";
        let action = parse_response(text);
        assert!(matches!(action, Action::Failed { .. }));
    }

    #[test]
    fn extracts_bare_object_embedded_in_prose_with_braces_in_strings() {
        let text = r#"Sure! {"action":"run_analyze","table":"t","rationale":"because {x} is stale","confidence":0.6} -- done"#;
        let action = parse_response(text);
        assert!(matches!(action, Action::RunAnalyze { .. }));
    }
}
