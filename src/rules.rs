//! Extension-scoped match rules.
//!
//! A rule says how a reference to a resource key looks in files of a given
//! extension: an optional regex template with `$File` / `$Key` placeholders,
//! whether matching is case sensitive, and an optional single-line comment
//! token. Rules for one extension are tried in declaration order.
use crate::error::{ReftrackError, Result as ReftrackResult};
use lazy_static::lazy_static;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Position of a rule inside its [`MatchRuleSet`].
pub type RuleId = usize;

/// Persisted, editable form of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRuleConfig {
    /// Comma separated list, e.g. `.cs,.xaml`.
    pub extensions: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_token: Option<String>,
}

impl MatchRuleConfig {
    fn new(extensions: &str, case_sensitive: bool, pattern: &str, comment: Option<&str>) -> Self {
        Self {
            extensions: extensions.to_string(),
            case_sensitive,
            pattern: Some(pattern.to_string()),
            comment_token: comment.map(str::to_string),
        }
    }

    /// Splits the extension list into normalized `.ext` items.
    pub fn parse_extensions(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .filter_map(normalize_extension)
            .collect()
    }
}

/// Lowercases an extension and gives it a leading dot; `*.cs`, `cs` and
/// `.CS` all become `.cs`.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('*').trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

lazy_static! {
    static ref DEFAULT_RULES: Vec<MatchRuleConfig> = vec![
        MatchRuleConfig::new(".cs,.xaml,.cshtml,.razor", true, r"\W($File\.$Key)\W", Some("//")),
        MatchRuleConfig::new(".cs", true, r#"ResourceManager\.GetString\("($Key)""#, Some("//")),
        MatchRuleConfig::new(
            ".cs",
            true,
            r#"typeof\($File\).+"($Key)"|"($Key)".+typeof\($File\)"#,
            Some("//"),
        ),
        MatchRuleConfig::new(".vb", false, r"\W($File\.$Key)\W", Some("'")),
        MatchRuleConfig::new(".c,.cpp,.cxx,.h,.hpp,.hxx", true, r"\W($File::$Key)\W", Some("//")),
        MatchRuleConfig::new(
            ".aspx,.ascx,.master",
            false,
            r"<%\$\s*Resources:\s*$File\s*,\s*($Key)\s*%>",
            None,
        ),
        MatchRuleConfig::new(".js,.jsx,.ts,.tsx", true, r"\W($File\.$Key)\W", Some("//")),
    ];
}

/// Built-in rule set used when the configuration declares no rules.
pub fn default_rule_configs() -> Vec<MatchRuleConfig> {
    DEFAULT_RULES.clone()
}

/// Immutable, loaded form of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    extensions: BTreeSet<String>,
    pub case_sensitive: bool,
    pub pattern: Option<String>,
    pub comment_token: Option<String>,
}

impl MatchRule {
    pub fn from_config(config: &MatchRuleConfig) -> ReftrackResult<Self> {
        let extensions: BTreeSet<String> = config.parse_extensions().into_iter().collect();
        if extensions.is_empty() {
            return Err(ReftrackError::Config(format!(
                "match rule {:?} lists no file extensions",
                config.pattern.as_deref().unwrap_or("<literal>")
            )));
        }

        Ok(Self {
            extensions,
            case_sensitive: config.case_sensitive,
            pattern: config.pattern.clone().filter(|p| !p.is_empty()),
            comment_token: config.comment_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn applies_to(&self, extension: &str) -> bool {
        normalize_extension(extension).is_some_and(|ext| self.extensions.contains(&ext))
    }

    pub fn is_literal(&self) -> bool {
        self.pattern.is_none()
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extensions: Vec<&str> = self.extensions().collect();
        write!(
            f,
            "{} {} {}",
            extensions.join(","),
            self.pattern.as_deref().unwrap_or("<literal key>"),
            if self.case_sensitive { "(case sensitive)" } else { "(ignore case)" }
        )?;
        if let Some(token) = &self.comment_token {
            write!(f, " comment '{token}'")?;
        }
        Ok(())
    }
}

/// Ordered rules plus a per-extension index into them.
#[derive(Debug, Clone)]
pub struct MatchRuleSet {
    rules: Vec<MatchRule>,
    by_extension: HashMap<String, Vec<RuleId>>,
}

impl MatchRuleSet {
    pub fn new(rules: Vec<MatchRule>) -> Self {
        let mut by_extension: HashMap<String, Vec<RuleId>> = HashMap::new();
        for (id, rule) in rules.iter().enumerate() {
            for ext in &rule.extensions {
                by_extension.entry(ext.clone()).or_default().push(id);
            }
        }
        Self {
            rules,
            by_extension,
        }
    }

    pub fn from_configs(configs: &[MatchRuleConfig]) -> ReftrackResult<Self> {
        let rules = configs
            .iter()
            .map(MatchRule::from_config)
            .collect::<ReftrackResult<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Ids of the rules that apply to `extension`, in declaration order.
    pub fn rule_ids_for(&self, extension: &str) -> &[RuleId] {
        normalize_extension(extension)
            .and_then(|ext| self.by_extension.get(&ext))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rules_for(&self, extension: &str) -> Vec<&MatchRule> {
        self.rule_ids_for(extension)
            .iter()
            .map(|&id| &self.rules[id])
            .collect()
    }

    pub fn rule(&self, id: RuleId) -> &MatchRule {
        &self.rules[id]
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every extension some rule covers.
    pub fn extensions(&self) -> BTreeSet<&str> {
        self.by_extension.keys().map(String::as_str).collect()
    }

    /// Compiles each template with placeholder values and reports the ones
    /// that can never match. Bad templates are still loaded; the matcher
    /// isolates them per rule.
    pub fn check_templates(&self) -> Vec<(RuleId, ReftrackError)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(id, rule)| {
                let template = rule.pattern.as_deref()?;
                let pattern = expand_template(template, "File", "Key");
                RegexBuilder::new(&pattern)
                    .build()
                    .err()
                    .map(|source| {
                        (
                            id,
                            ReftrackError::InvalidTemplate {
                                template: template.to_string(),
                                source,
                            },
                        )
                    })
            })
            .collect()
    }
}

impl Default for MatchRuleSet {
    fn default() -> Self {
        Self::from_configs(DEFAULT_RULES.as_slice()).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

lazy_static! {
    static ref PLACEHOLDER: regex::Regex = regex::Regex::new(r"\$(File|Key)").unwrap();
}

/// Substitutes `$File` and `$Key` with the regex-escaped container name and
/// key in a single pass, so escaped text is never re-substituted.
pub fn expand_template(template: &str, container: &str, key: &str) -> String {
    let container = regex::escape(container);
    let key = regex::escape(key);
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "File" => container.clone(),
            _ => key.clone(),
        })
        .into_owned()
}
