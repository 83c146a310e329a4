// Environment bindings passed to compose for `${VAR}` interpolation

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Ordered name -> value bindings handed to the compose process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvBindings {
    vars: BTreeMap<String, String>,
}

impl EnvBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(:?[-+?][^}]*)?\}|\$([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("variable pattern is valid")
    })
}

/// List variables referenced by a compose descriptor that would interpolate to nothing.
///
/// A reference counts as resolved when it is bound, present according to
/// `in_environment`, or carries a default (`${VAR:-x}`, `${VAR-x}`, `${VAR:+x}`).
/// `$$` is an escaped dollar sign and comment lines are ignored.
pub fn unresolved_variables<F>(descriptor: &str, bindings: &EnvBindings, in_environment: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut missing = BTreeSet::new();

    for line in descriptor.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }

        for caps in variable_pattern().captures_iter(line) {
            let (name, modifier) = match (caps.get(1), caps.get(3)) {
                (Some(name), _) => (name.as_str(), caps.get(2).map(|m| m.as_str())),
                (None, Some(name)) => (name.as_str(), None),
                // `$$`
                (None, None) => continue,
            };

            let has_fallback = modifier
                .map(|m| !m.trim_start_matches(':').starts_with('?'))
                .unwrap_or(false);

            if has_fallback || bindings.contains(name) || in_environment(name) {
                continue;
            }

            missing.insert(name.to_string());
        }
    }

    missing.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(pairs: &[(&str, &str)]) -> EnvBindings {
        let mut env = EnvBindings::new();
        for (k, v) in pairs {
            env.set(*k, *v);
        }
        env
    }

    #[test]
    fn test_bound_variables_resolve() {
        let descriptor = r#"
services:
  db:
    image: ${NEO4J_IMAGE}
    volumes:
      - ${HOST_ROOT}/neo4j/config:/var/lib/neo4j/conf
"#;
        let env = bound(&[("NEO4J_IMAGE", "neo4j:5"), ("HOST_ROOT", "/tmp/ws")]);
        assert!(unresolved_variables(descriptor, &env, |_| false).is_empty());
    }

    #[test]
    fn test_missing_variables_reported_once() {
        let descriptor = "image: ${NEO4J_IMAGE}\nlabel: $NEO4J_IMAGE\nroot: ${HOST_ROOT}\n";
        let missing = unresolved_variables(descriptor, &EnvBindings::new(), |_| false);
        assert_eq!(missing, vec!["HOST_ROOT".to_string(), "NEO4J_IMAGE".to_string()]);
    }

    #[test]
    fn test_defaults_and_escapes() {
        let descriptor = r#"
# image: ${COMMENTED_OUT}
command: echo $$HOME ${TAG:-latest} ${ALT-x} ${OPT:+on}
required: ${MUST:?must be set}
"#;
        let missing = unresolved_variables(descriptor, &EnvBindings::new(), |_| false);
        assert_eq!(missing, vec!["MUST".to_string()]);
    }

    #[test]
    fn test_process_environment_counts() {
        let missing = unresolved_variables("image: ${FROM_SHELL}", &EnvBindings::new(), |name| {
            name == "FROM_SHELL"
        });
        assert!(missing.is_empty());
    }
}
