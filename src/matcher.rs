//! Confirms that a candidate line really references a key and splits it
//! into highlight segments.
//!
//! Rules without a pattern look for the key as plain text. Rules with a
//! pattern expand `$File` / `$Key` into the escaped container name and key,
//! and run the resulting regex against the line padded with one space on
//! each side so `\W` can match at the line edges.
use crate::error::{ReftrackError, Result as ReftrackResult};
use crate::rules::{expand_template, MatchRule};
use log::error;
use memchr::memmem;
use regex::{Regex, RegexBuilder};

/// Default cap on the compiled size of one template.
pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    pub success: bool,
    /// Alternating context / match text; empty when `success` is false.
    pub segments: Vec<String>,
}

impl MatchOutcome {
    pub fn no_match() -> Self {
        Self::default()
    }

    fn from_spans(line: &str, spans: &[(usize, usize)]) -> Self {
        let mut segments = Vec::with_capacity(spans.len() * 2 + 1);
        let mut cursor = 0;
        for &(start, end) in spans {
            segments.push(line[cursor..start].to_string());
            segments.push(line[start..end].to_string());
            cursor = end;
        }
        segments.push(line[cursor..].to_string());
        Self {
            success: true,
            segments,
        }
    }
}

#[derive(Debug)]
enum MatcherKind {
    Literal {
        key: Regex,
        container: Option<Regex>,
    },
    Template {
        regex: Regex,
    },
}

/// A rule compiled for one (container, key) pair.
#[derive(Debug)]
pub struct LineMatcher {
    kind: MatcherKind,
    comment_token: Option<String>,
}

impl LineMatcher {
    pub fn compile(rule: &MatchRule, container: &str, key: &str) -> ReftrackResult<Self> {
        Self::with_size_limit(rule, container, key, DEFAULT_REGEX_SIZE_LIMIT)
    }

    pub fn with_size_limit(
        rule: &MatchRule,
        container: &str,
        key: &str,
        size_limit: usize,
    ) -> ReftrackResult<Self> {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(!rule.case_sensitive)
                .size_limit(size_limit)
                .build()
        };

        let kind = match rule.pattern.as_deref() {
            None => MatcherKind::Literal {
                key: build(&regex::escape(key))?,
                container: if container.is_empty() {
                    None
                } else {
                    Some(build(&regex::escape(container))?)
                },
            },
            Some(template) => {
                let pattern = expand_template(template, container, key);
                let regex = build(&pattern).map_err(|source| ReftrackError::InvalidTemplate {
                    template: template.to_string(),
                    source,
                })?;
                MatcherKind::Template { regex }
            }
        };

        Ok(Self {
            kind,
            comment_token: rule.comment_token.clone(),
        })
    }

    pub fn match_line(&self, line: &str) -> MatchOutcome {
        match &self.kind {
            MatcherKind::Literal { key, container } => {
                self.match_literal(line, key, container.as_ref())
            }
            MatcherKind::Template { regex } => self.match_template(line, regex),
        }
    }

    /// The line is commented out when the comment token occurs at or
    /// before `start`.
    fn is_commented(&self, line: &str, start: usize) -> bool {
        self.comment_start(line).is_some_and(|at| at <= start)
    }

    fn comment_start(&self, line: &str) -> Option<usize> {
        let token = self.comment_token.as_deref()?;
        memmem::find(line.as_bytes(), token.as_bytes())
    }

    fn match_literal(&self, line: &str, key: &Regex, container: Option<&Regex>) -> MatchOutcome {
        // Occurrences after the comment token are never references.
        let comment = self.comment_start(line).unwrap_or(usize::MAX);
        let key_spans: Vec<(usize, usize)> = key
            .find_iter(line)
            .map(|m| (m.start(), m.end()))
            .filter(|&(start, _)| start < comment)
            .collect();
        let Some(&first) = key_spans.first() else {
            return MatchOutcome::no_match();
        };

        // Several occurrences: take the key closest to a container name.
        // Heuristic only; unrelated occurrences on one line can fool it.
        let container_spans: Vec<(usize, usize)> = container
            .map(|c| c.find_iter(line).map(|m| (m.start(), m.end())).collect())
            .unwrap_or_default();
        let chosen = if container_spans.is_empty() {
            first
        } else {
            key_spans
                .iter()
                .copied()
                .min_by_key(|&k| {
                    container_spans
                        .iter()
                        .map(|&c| span_distance(c, k))
                        .min()
                        .unwrap_or(usize::MAX)
                })
                .unwrap_or(first)
        };

        MatchOutcome::from_spans(line, &[chosen])
    }

    fn match_template(&self, line: &str, regex: &Regex) -> MatchOutcome {
        let padded = format!(" {line} ");
        let Some(captures) = regex.captures(&padded) else {
            return MatchOutcome::no_match();
        };
        let Some(whole) = captures.get(0) else {
            return MatchOutcome::no_match();
        };

        let to_line = |offset: usize| offset.saturating_sub(1).min(line.len());
        if self.is_commented(line, to_line(whole.start())) {
            return MatchOutcome::no_match();
        }

        let mut spans = Vec::new();
        let mut cursor = 0;
        for group in captures.iter().skip(1).flatten() {
            // Nested groups overlap their parent; keep the outermost.
            if group.start() >= cursor {
                spans.push((to_line(group.start()), to_line(group.end())));
                cursor = group.end();
            }
        }
        if spans.is_empty() {
            spans.push((to_line(whole.start()), to_line(whole.end())));
        }

        MatchOutcome::from_spans(line, &spans)
    }
}

fn span_distance(a: (usize, usize), b: (usize, usize)) -> usize {
    if a.1 <= b.0 {
        b.0 - a.1
    } else if b.1 <= a.0 {
        a.0 - b.1
    } else {
        0
    }
}

/// One-shot match of `line` against `rule`. A template that does not
/// compile is logged and counts as no match.
pub fn match_line(line: &str, container: &str, key: &str, rule: &MatchRule) -> MatchOutcome {
    match LineMatcher::compile(rule, container, key) {
        Ok(matcher) => matcher.match_line(line),
        Err(e) => {
            error!("Rule '{rule}' cannot be applied to key '{container}.{key}': {e}");
            MatchOutcome::no_match()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchRuleConfig;

    fn rule(pattern: Option<&str>, case_sensitive: bool, comment: Option<&str>) -> MatchRule {
        MatchRule::from_config(&MatchRuleConfig {
            extensions: ".cs".to_string(),
            case_sensitive,
            pattern: pattern.map(str::to_string),
            comment_token: comment.map(str::to_string),
        })
        .unwrap()
    }

    fn segments(outcome: &MatchOutcome) -> Vec<&str> {
        outcome.segments.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_template_match_segments() {
        let outcome = match_line(
            "var x = Resources.Greeting;",
            "Resources",
            "Greeting",
            &rule(Some(r"($File\.$Key)"), true, None),
        );
        assert!(outcome.success);
        assert_eq!(segments(&outcome), vec!["var x = ", "Resources.Greeting", ";"]);
    }

    #[test]
    fn test_word_boundary_template_matches_at_line_edges() {
        let r = rule(Some(r"\W($File\.$Key)\W"), true, None);
        let outcome = match_line("Resources.Greeting", "Resources", "Greeting", &r);
        assert_eq!(segments(&outcome), vec!["", "Resources.Greeting", ""]);

        let longer = match_line("Resources.GreetingText", "Resources", "Greeting", &r);
        assert!(!longer.success);
    }

    #[test]
    fn test_comment_excludes_match() {
        let r = rule(Some(r"\W($File\.$Key)\W"), true, Some("//"));
        let outcome = match_line("// Resources.Greeting unused", "Resources", "Greeting", &r);
        assert!(!outcome.success);
        assert!(outcome.segments.is_empty());

        let trailing = match_line("x(Resources.Greeting); // note", "Resources", "Greeting", &r);
        assert!(trailing.success);
    }

    #[test]
    fn test_case_sensitivity() {
        let line = "label = resources.greeting;";
        let template = Some(r"\W($File\.$Key)\W");
        let insensitive = match_line(line, "Resources", "Greeting", &rule(template, false, None));
        assert!(insensitive.success);
        assert_eq!(insensitive.segments[1], "resources.greeting");

        let sensitive = match_line(line, "Resources", "Greeting", &rule(template, true, None));
        assert!(!sensitive.success);
    }

    #[test]
    fn test_alternative_groups_use_the_one_that_matched() {
        let r = rule(
            Some(r#"typeof\($File\).+"($Key)"|"($Key)".+typeof\($File\)"#),
            true,
            None,
        );
        let forward = match_line(
            r#"new ResourceManager(typeof(Resources)).GetString("Greeting");"#,
            "Resources",
            "Greeting",
            &r,
        );
        assert_eq!(
            segments(&forward),
            vec![r#"new ResourceManager(typeof(Resources)).GetString(""#, "Greeting", r#"");"#]
        );

        let backward = match_line(
            r#"Lookup("Greeting", typeof(Resources));"#,
            "Resources",
            "Greeting",
            &r,
        );
        assert_eq!(
            segments(&backward),
            vec![r#"Lookup(""#, "Greeting", r#"", typeof(Resources));"#]
        );
    }

    #[test]
    fn test_multiple_groups_alternate_segments() {
        let r = rule(Some(r"($File)\.\w+\(\)\.($Key)"), true, None);
        let outcome = match_line("a = Resources.Get().Greeting;", "Resources", "Greeting", &r);
        assert_eq!(
            segments(&outcome),
            vec!["a = ", "Resources", ".Get().", "Greeting", ";"]
        );
        assert_eq!(outcome.segments.len() % 2, 1);
    }

    #[test]
    fn test_nested_groups_keep_outermost() {
        let r = rule(Some(r"($File\.($Key))"), true, None);
        let outcome = match_line("Resources.Greeting", "Resources", "Greeting", &r);
        assert_eq!(segments(&outcome), vec!["", "Resources.Greeting", ""]);
    }

    #[test]
    fn test_template_without_groups_highlights_whole_match() {
        let r = rule(Some(r"$File\.$Key"), true, None);
        let outcome = match_line("x Resources.Greeting y", "Resources", "Greeting", &r);
        assert_eq!(segments(&outcome), vec!["x ", "Resources.Greeting", " y"]);
    }

    #[test]
    fn test_literal_mode() {
        let r = rule(None, true, None);
        let outcome = match_line("Show(\"Greeting\")", "", "Greeting", &r);
        assert_eq!(segments(&outcome), vec!["Show(\"", "Greeting", "\")"]);

        assert!(!match_line("Show(\"greeting\")", "", "Greeting", &r).success);
        assert!(match_line("Show(\"greeting\")", "", "Greeting", &rule(None, false, None)).success);
    }

    #[test]
    fn test_literal_mode_prefers_key_nearest_container() {
        let r = rule(None, true, None);
        let outcome = match_line(
            "Greeting = Other.Value + Resources.Greeting;",
            "Resources",
            "Greeting",
            &r,
        );
        assert_eq!(
            segments(&outcome),
            vec!["Greeting = Other.Value + Resources.", "Greeting", ";"]
        );
    }

    #[test]
    fn test_literal_mode_comment() {
        let r = rule(None, true, Some("#"));
        assert!(!match_line("# Greeting", "", "Greeting", &r).success);
        assert!(match_line("Greeting # trailing", "", "Greeting", &r).success);
    }

    #[test]
    fn test_literal_mode_skips_commented_occurrence_nearest_container() {
        let r = rule(None, true, Some("//"));
        let outcome = match_line(
            "Show(Greeting); // Resources.Greeting",
            "Resources",
            "Greeting",
            &r,
        );
        assert!(outcome.success);
        assert_eq!(
            segments(&outcome),
            vec!["Show(", "Greeting", "); // Resources.Greeting"]
        );
    }

    #[test]
    fn test_invalid_template_is_traced_not_raised() {
        testing_logger::setup();
        let outcome = match_line(
            "Resources.Greeting",
            "Resources",
            "Greeting",
            &rule(Some("($File.$Key"), true, None),
        );
        assert_eq!(outcome, MatchOutcome::no_match());

        testing_logger::validate(|captured_logs| {
            assert!(captured_logs
                .iter()
                .any(|entry| entry.level == log::Level::Error
                    && entry.body.contains("Resources.Greeting")));
        });
    }

    #[test]
    fn test_compile_reports_invalid_template() {
        let err = LineMatcher::compile(&rule(Some("[$Key"), true, None), "R", "K").unwrap_err();
        assert!(matches!(err, ReftrackError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_size_limit_is_enforced() {
        let r = rule(Some(r"\w{1000}$Key"), true, None);
        assert!(LineMatcher::with_size_limit(&r, "R", "K", 64).is_err());
    }

    #[test]
    fn test_compiled_matcher_is_reusable() {
        let r = rule(Some(r"\W($File\.$Key)\W"), true, None);
        let matcher = LineMatcher::compile(&r, "Resources", "Greeting").unwrap();
        assert!(matcher.match_line("a(Resources.Greeting)").success);
        assert!(!matcher.match_line("a(Resources.Farewell)").success);
        assert!(matcher.match_line("b = Resources.Greeting;").success);
    }
}
