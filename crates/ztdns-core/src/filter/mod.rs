//! Network selection
//!
//! Filter rules are compiled once from [`FilterRuleConfig`] and then
//! evaluated against every [`NetworkDescriptor`] of a pass. Evaluation is
//! pure, so the compiled filter can be shared freely between passes.
//!
//! Rules fold left to right: the first rule seeds the running result and each
//! later rule is combined into it with its own [`Combinator`]. Conditions
//! inside a rule fold the same way. `negate` flips a rule's own result before
//! it is combined.

use crate::config::{Combinator, FilterKind, FilterRuleConfig};
use crate::error::{Error, Result};
use crate::traits::NetworkDescriptor;
use regex::Regex;
use tracing::warn;

/// Upper bound on compiled pattern size
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A single compiled pattern
#[derive(Debug, Clone)]
pub enum PatternMatcher {
    /// `*` or empty: matches everything
    Any,
    /// Exact, case-sensitive comparison
    Exact(String),
    /// Shell-style glob or `^` regular expression
    Regex(Regex),
    /// Glob that failed to compile; matches when the literal text is contained
    Substring(String),
}

impl PatternMatcher {
    /// Compile a pattern
    ///
    /// Only a broken `^` regular expression is an error; a broken glob
    /// degrades to a substring match.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() || pattern == "*" {
            return Ok(Self::Any);
        }

        if pattern.starts_with('^') {
            return build_regex(pattern)
                .map(Self::Regex)
                .map_err(|e| Error::config(format!("Invalid filter regex {pattern:?}: {e}")));
        }

        if pattern.contains('*') {
            let glob = format!(
                "^{}$",
                pattern
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*")
            );
            return Ok(match build_regex(&glob) {
                Ok(regex) => Self::Regex(regex),
                Err(e) => {
                    warn!("Glob {:?} did not compile ({}), using substring match", pattern, e);
                    Self::Substring(pattern.replace('*', ""))
                }
            });
        }

        Ok(Self::Exact(pattern.to_string()))
    }

    /// Test one candidate value
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => value == expected,
            Self::Regex(regex) => regex.is_match(value),
            Self::Substring(text) => value.contains(text.as_str()),
        }
    }
}

fn build_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

#[derive(Debug, Clone)]
struct CompiledCondition {
    matcher: PatternMatcher,
    combinator: Combinator,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    kind: FilterKind,
    conditions: Vec<CompiledCondition>,
    negate: bool,
    combinator: Combinator,
}

impl CompiledRule {
    fn evaluate(&self, network: &NetworkDescriptor) -> bool {
        let raw = match candidates(&self.kind, network) {
            // unknown dimension: fail closed, negate does not apply
            None => return false,
            Some(values) => self.evaluate_conditions(&values),
        };
        raw != self.negate
    }

    fn evaluate_conditions(&self, values: &[String]) -> bool {
        let mut conditions = self.conditions.iter();
        let Some(first) = conditions.next() else {
            // no conditions: the rule only asserts the dimension exists
            return true;
        };

        let test = |condition: &CompiledCondition| match condition.matcher {
            PatternMatcher::Any => true,
            ref matcher => values.iter().any(|value| matcher.is_match(value)),
        };

        conditions.fold(test(first), |acc, condition| {
            condition.combinator.combine(acc, test(condition))
        })
    }
}

/// Values of one dimension of a network, `None` for an unknown dimension
fn candidates(kind: &FilterKind, network: &NetworkDescriptor) -> Option<Vec<String>> {
    let values = match kind {
        FilterKind::Name => vec![network.name.clone()],
        FilterKind::Interface => vec![network.interface.clone()],
        FilterKind::NetworkId => vec![network.id.clone()],
        FilterKind::Online => vec![network.online.to_string()],
        FilterKind::Assigned => vec![network.assigned.to_string()],
        FilterKind::Address => network
            .assigned_addresses
            .iter()
            .flat_map(|cidr| {
                let bare = cidr.split_once('/').map(|(addr, _)| addr.to_string());
                std::iter::once(cidr.clone()).chain(bare)
            })
            .collect(),
        FilterKind::Route => network.routes.iter().map(|r| r.target.clone()).collect(),
        FilterKind::Unknown(_) => return None,
    };
    Some(values)
}

/// Compiled rule list
#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    rules: Vec<CompiledRule>,
}

impl NetworkFilter {
    /// Compile rules loaded from configuration
    pub fn compile(rules: &[FilterRuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                if let FilterKind::Unknown(kind) = &rule.kind {
                    warn!("Unknown filter type {:?}; rule will never match", kind);
                }
                let conditions = rule
                    .conditions
                    .iter()
                    .map(|c| {
                        Ok(CompiledCondition {
                            matcher: PatternMatcher::compile(&c.pattern)?,
                            combinator: c.combinator,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledRule {
                    kind: rule.kind.clone(),
                    conditions,
                    negate: rule.negate,
                    combinator: rule.combinator,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// A filter that includes every network
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are configured
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rules against one network
    pub fn matches(&self, network: &NetworkDescriptor) -> bool {
        let mut rules = self.rules.iter();
        let Some(first) = rules.next() else {
            return true;
        };

        rules.fold(first.evaluate(network), |acc, rule| {
            rule.combinator.combine(acc, rule.evaluate(network))
        })
    }

    /// Keep the networks the rules include, in their original order
    pub fn apply(&self, networks: Vec<NetworkDescriptor>) -> Vec<NetworkDescriptor> {
        networks.into_iter().filter(|n| self.matches(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterCondition;
    use crate::traits::NetworkRoute;

    fn network(name: &str) -> NetworkDescriptor {
        NetworkDescriptor::new("8056c2e21c000001", name, "zt0")
    }

    fn filter(rules: Vec<FilterRuleConfig>) -> NetworkFilter {
        NetworkFilter::compile(&rules).unwrap()
    }

    #[test]
    fn test_empty_rules_include_everything() {
        let f = NetworkFilter::allow_all();
        assert!(f.matches(&network("anything")));
        assert!(f.matches(&network("").with_online(false)));
    }

    #[test]
    fn test_glob_prefix() {
        let f = filter(vec![FilterRuleConfig::new(FilterKind::Name, "prod-*")]);
        assert!(f.matches(&network("prod-eu")));
        assert!(f.matches(&network("prod-")));
        assert!(!f.matches(&network("staging-prod-eu")));
        assert!(!f.matches(&network("Prod-eu")));
    }

    #[test]
    fn test_glob_shapes() {
        let contains = filter(vec![FilterRuleConfig::new(FilterKind::Name, "*lab*")]);
        assert!(contains.matches(&network("home-lab-1")));
        assert!(!contains.matches(&network("home")));

        let suffix = filter(vec![FilterRuleConfig::new(FilterKind::Name, "*.corp")]);
        assert!(suffix.matches(&network("eu.corp")));
        // dot is literal inside a glob
        assert!(!suffix.matches(&network("eu-corp")));
    }

    #[test]
    fn test_exact_and_regex() {
        let exact = filter(vec![FilterRuleConfig::new(FilterKind::Name, "foo")]);
        assert!(exact.matches(&network("foo")));
        assert!(!exact.matches(&network("foobar")));

        let regex = filter(vec![FilterRuleConfig::new(FilterKind::Name, "^(dev|qa)-[0-9]+$")]);
        assert!(regex.matches(&network("qa-12")));
        assert!(!regex.matches(&network("qa-x")));

        let broken = NetworkFilter::compile(&[FilterRuleConfig::new(FilterKind::Name, "^(dev")]);
        assert!(broken.is_err());
    }

    #[test]
    fn test_negated_online_rule() {
        let f = filter(vec![
            FilterRuleConfig::new(FilterKind::Name, "foo"),
            FilterRuleConfig::new(FilterKind::Online, "true").negated(),
        ]);
        assert!(!f.matches(&network("foo")));
        assert!(f.matches(&network("foo").with_online(false)));
        assert!(!f.matches(&network("bar").with_online(false)));
    }

    #[test]
    fn test_rule_combinators() {
        let or = filter(vec![
            FilterRuleConfig::new(FilterKind::Name, "foo"),
            FilterRuleConfig::new(FilterKind::Interface, "zt9").with_combinator(Combinator::Or),
        ]);
        assert!(or.matches(&network("bar").with_interface("zt9")));
        assert!(or.matches(&network("foo")));
        assert!(!or.matches(&network("bar")));

        let and_not = filter(vec![
            FilterRuleConfig::new(FilterKind::Name, "*"),
            FilterRuleConfig::new(FilterKind::Name, "legacy-*").with_combinator(Combinator::Not),
        ]);
        assert!(and_not.matches(&network("new")));
        assert!(!and_not.matches(&network("legacy-1")));
    }

    #[test]
    fn test_condition_combinators() {
        let f = filter(vec![
            FilterRuleConfig::new(FilterKind::Name, "alpha").with_condition(FilterCondition::or("beta")),
        ]);
        assert!(f.matches(&network("alpha")));
        assert!(f.matches(&network("beta")));
        assert!(!f.matches(&network("gamma")));

        let both = filter(vec![
            FilterRuleConfig::new(FilterKind::Name, "a*").with_condition(FilterCondition::new("*z")),
        ]);
        assert!(both.matches(&network("abcz")));
        assert!(!both.matches(&network("abc")));
    }

    #[test]
    fn test_unknown_kind_fails_closed() {
        let f = filter(vec![FilterRuleConfig::new(
            FilterKind::Unknown("color".to_string()),
            "*",
        )]);
        assert!(!f.matches(&network("foo")));

        let negated = filter(vec![
            FilterRuleConfig::new(FilterKind::Unknown("color".to_string()), "red").negated(),
        ]);
        assert!(!negated.matches(&network("foo")));
    }

    #[test]
    fn test_list_dimensions() {
        let net = network("foo")
            .with_assigned_addresses(vec!["10.1.2.5/24".to_string()])
            .with_routes(vec![NetworkRoute::new("10.1.0.0/16", None)]);

        let by_cidr = filter(vec![FilterRuleConfig::new(FilterKind::Address, "10.1.2.*")]);
        assert!(by_cidr.matches(&net));
        let by_addr = filter(vec![FilterRuleConfig::new(FilterKind::Address, "10.1.2.5")]);
        assert!(by_addr.matches(&net));
        let by_route = filter(vec![FilterRuleConfig::new(FilterKind::Route, "10.1.0.0/16")]);
        assert!(by_route.matches(&net));

        // no addresses: only the match-anything pattern holds
        let bare = network("bar");
        assert!(!by_cidr.matches(&bare));
        let any = filter(vec![FilterRuleConfig::new(FilterKind::Address, "*")]);
        assert!(any.matches(&bare));

        let assigned = filter(vec![FilterRuleConfig::new(FilterKind::Assigned, "true")]);
        assert!(assigned.matches(&net));
        assert!(!assigned.matches(&bare));
    }

    #[test]
    fn test_apply_keeps_order() {
        let f = filter(vec![FilterRuleConfig::new(FilterKind::Name, "prod-*")]);
        let kept = f.apply(vec![network("prod-b"), network("dev"), network("prod-a")]);
        let names: Vec<_> = kept.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["prod-b", "prod-a"]);
    }
}
