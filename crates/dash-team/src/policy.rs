//! Prioritized routing rules consulted by the supervisor

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// One routing rule: when to pick `member`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub member: Role,
    /// Selection guidance rendered into the supervisor prompt
    pub description: String,
    /// Case-insensitive keywords for deterministic pre-routing
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl RoutingRule {
    /// First keyword contained in `text`, ignoring case
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .map(String::as_str)
            .find(|k| !k.trim().is_empty() && text.contains(&k.to_lowercase()))
    }
}

/// Rules in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub rules: Vec<RoutingRule>,
    /// Route the first step by keyword without asking the model
    #[serde(default)]
    pub preroute: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                RoutingRule {
                    member: Role::DatabaseExpert,
                    description: "MUST BE SELECTED for ALL database operations, including \
                                  read-only PostgreSQL queries (read_query) and schema lookups."
                        .into(),
                    keywords: ["sql", "database", "table", "query", "how many", "count"]
                        .map(String::from)
                        .to_vec(),
                },
                RoutingRule {
                    member: Role::PythonExpert,
                    description: "MUST BE SELECTED for ALL code execution, including running \
                                  Python code and processing data (execute_code) and accessing \
                                  resources (read_resource)."
                        .into(),
                    keywords: ["python", "code", "plot", "chart", "calculate", "analyze"]
                        .map(String::from)
                        .to_vec(),
                },
                RoutingRule {
                    member: Role::DataSummarizer,
                    description: "Select once the data has been gathered, to turn the results \
                                  into a concise answer for the user."
                        .into(),
                    keywords: vec![],
                },
            ],
            preroute: false,
        }
    }
}

impl RoutingPolicy {
    /// Rules whose member is part of `roster`, in priority order
    pub fn rules_for<'a>(&'a self, roster: &'a [Role]) -> impl Iterator<Item = &'a RoutingRule> {
        self.rules.iter().filter(move |r| roster.contains(&r.member))
    }

    /// First roster rule matching `text`, with the keyword that matched
    pub fn match_rule<'a>(&'a self, roster: &'a [Role], text: &str) -> Option<(&'a RoutingRule, &'a str)> {
        self.rules_for(roster)
            .find_map(|rule| rule.matched_keyword(text).map(|k| (rule, k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_match_ignores_case() {
        let policy = RoutingPolicy::default();
        let roster = [Role::DatabaseExpert, Role::PythonExpert];
        let (rule, keyword) = policy
            .match_rule(&roster, "How MANY employees joined in 2020?")
            .unwrap();
        assert_eq!(rule.member, Role::DatabaseExpert);
        assert_eq!(keyword, "how many");
    }

    #[test]
    fn test_priority_order_wins() {
        let policy = RoutingPolicy::default();
        let roster = [Role::DatabaseExpert, Role::PythonExpert];
        // Matches both rules; the database rule comes first
        let (rule, _) = policy.match_rule(&roster, "plot the sql results").unwrap();
        assert_eq!(rule.member, Role::DatabaseExpert);
    }

    #[test]
    fn test_rules_outside_roster_are_skipped() {
        let policy = RoutingPolicy::default();
        let roster = [Role::PythonExpert];
        let (rule, _) = policy.match_rule(&roster, "count rows with python").unwrap();
        assert_eq!(rule.member, Role::PythonExpert);
        assert!(policy.match_rule(&roster, "hello there").is_none());
        assert_eq!(policy.rules_for(&roster).count(), 1);
    }

    #[test]
    fn test_policy_from_toml_shape() {
        let policy: RoutingPolicy = serde_json::from_value(serde_json::json!({
            "rules": [{ "member": "PythonExpert", "description": "code" }]
        }))
        .unwrap();
        assert!(!policy.preroute);
        assert!(policy.rules[0].keywords.is_empty());
    }
}
