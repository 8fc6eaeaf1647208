use indexmap::IndexMap;
use tracing::warn;

use crate::core::substitutor::VariableSubstitutor;
use crate::types::{ConditionSpec, OsConstraint};

/// Read-only access to named boolean conditions.
pub trait RulesEngine: Send + Sync {
    fn is_condition_true(&self, id: &str, variables: &VariableSubstitutor) -> bool;
}

/// Conditions declared in the installer manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestRules {
    conditions: IndexMap<String, ConditionSpec>,
}

// Guards against conditions that reference each other in a cycle.
const MAX_DEPTH: usize = 32;

impl ManifestRules {
    pub fn new(conditions: IndexMap<String, ConditionSpec>) -> Self {
        ManifestRules { conditions }
    }

    fn evaluate(&self, id: &str, variables: &VariableSubstitutor, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            warn!(condition = id, "condition nesting too deep");
            return false;
        }
        let Some(spec) = self.conditions.get(id) else {
            warn!(condition = id, "unknown condition");
            return false;
        };
        match spec {
            ConditionSpec::Variable { name, value } => variables.get(name) == Some(value.as_str()),
            ConditionSpec::Exists { name } => variables.get(name).is_some(),
            ConditionSpec::And { conditions } => conditions
                .iter()
                .all(|c| self.evaluate(c, variables, depth + 1)),
            ConditionSpec::Or { conditions } => conditions
                .iter()
                .any(|c| self.evaluate(c, variables, depth + 1)),
            ConditionSpec::Not { condition } => !self.evaluate(condition, variables, depth + 1),
            ConditionSpec::Const { value } => *value,
        }
    }
}

impl RulesEngine for ManifestRules {
    fn is_condition_true(&self, id: &str, variables: &VariableSubstitutor) -> bool {
        self.evaluate(id, variables, 0)
    }
}

/// A missing or empty condition id always holds.
pub fn condition_holds(
    rules: &dyn RulesEngine,
    condition: Option<&str>,
    variables: &VariableSubstitutor,
) -> bool {
    match condition {
        Some(id) if !id.is_empty() => rules.is_condition_true(id, variables),
        _ => true,
    }
}

fn current_family() -> &'static str {
    match std::env::consts::OS {
        "windows" => "windows",
        "macos" | "ios" => "mac",
        _ => "unix",
    }
}

impl OsConstraint {
    pub fn matches_current_system(&self) -> bool {
        let family_ok = match self.family.as_deref().map(str::to_lowercase) {
            None => true,
            Some(family) => match family.as_str() {
                "mac" | "osx" => current_family() == "mac",
                // macOS counts as a unix flavour
                "unix" => std::env::consts::OS != "windows",
                other => other == current_family(),
            },
        };
        let name_ok = self
            .name
            .as_deref()
            .map_or(true, |n| std::env::consts::OS.contains(&n.to_lowercase()));
        let arch_ok = self
            .arch
            .as_deref()
            .map_or(true, |a| a.eq_ignore_ascii_case(std::env::consts::ARCH));
        // the running OS version is unknown, so a version pin never excludes
        family_ok && name_ok && arch_ok
    }
}

/// An empty list matches every system.
pub fn one_matches_current_system(constraints: &[OsConstraint]) -> bool {
    constraints.is_empty() || constraints.iter().any(OsConstraint::matches_current_system)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ManifestRules {
        let mut conditions = IndexMap::new();
        conditions.insert(
            "isServer".to_string(),
            ConditionSpec::Variable {
                name: "MODE".to_string(),
                value: "server".to_string(),
            },
        );
        conditions.insert(
            "hasPort".to_string(),
            ConditionSpec::Exists {
                name: "PORT".to_string(),
            },
        );
        conditions.insert(
            "serverWithPort".to_string(),
            ConditionSpec::And {
                conditions: vec!["isServer".to_string(), "hasPort".to_string()],
            },
        );
        conditions.insert(
            "client".to_string(),
            ConditionSpec::Not {
                condition: "isServer".to_string(),
            },
        );
        conditions.insert(
            "loop".to_string(),
            ConditionSpec::Or {
                conditions: vec!["loop".to_string()],
            },
        );
        ManifestRules::new(conditions)
    }

    #[test]
    fn test_condition_evaluation() {
        let rules = rules();
        let mut vars = VariableSubstitutor::new();
        vars.set("MODE", "server");
        assert!(rules.is_condition_true("isServer", &vars));
        assert!(!rules.is_condition_true("serverWithPort", &vars));
        vars.set("PORT", "8080");
        assert!(rules.is_condition_true("serverWithPort", &vars));
        assert!(!rules.is_condition_true("client", &vars));
        assert!(!rules.is_condition_true("missing", &vars));
        assert!(!rules.is_condition_true("loop", &vars));
    }

    #[test]
    fn test_empty_condition_holds() {
        let rules = rules();
        let vars = VariableSubstitutor::new();
        assert!(condition_holds(&rules, None, &vars));
        assert!(condition_holds(&rules, Some(""), &vars));
        assert!(!condition_holds(&rules, Some("isServer"), &vars));
    }

    #[test]
    fn test_os_constraints() {
        assert!(one_matches_current_system(&[]));
        let here = OsConstraint {
            family: Some(current_family().to_string()),
            ..Default::default()
        };
        let nowhere = OsConstraint {
            family: Some("amiga".to_string()),
            ..Default::default()
        };
        assert!(one_matches_current_system(&[nowhere.clone(), here]));
        assert!(!one_matches_current_system(&[nowhere]));
    }
}
