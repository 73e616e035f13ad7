//! Job specification — what the calling build-execution framework hands the
//! executor: the build image, sidecar services, variables and feature flags.

use serde::{Deserialize, Serialize};

use crate::pull::PullPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitStrategy {
    #[default]
    Fetch,
    Clone,
}

/// Feature toggles the caller resolves per job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Create one isolated bridge network per job instead of legacy links.
    pub network_per_build: bool,
    /// Run containers with an init process as PID 1.
    pub use_init_process: bool,
}

/// An image reference as declared by the job: the build image or one of its
/// services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDefinition {
    pub name: String,
    /// Extra network alias for a service.
    pub alias: Option<String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub variables: Vec<Variable>,
    pub pull_policies: Vec<PullPolicy>,
    /// Requested platform, e.g. `linux/arm64`. Empty means daemon default.
    pub platform: String,
}

impl ImageDefinition {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Splits a service reference into (service, version), dropping any
    /// registry digest. `postgres:14` → (`postgres`, `14`);
    /// `registry.example/db/postgres` → (`registry.example/db/postgres`,
    /// `latest`).
    pub fn service_name_and_version(&self) -> (String, String) {
        let reference = self.name.split('@').next().unwrap_or(&self.name);
        let slash = reference.rfind('/');
        match reference.rfind(':') {
            Some(colon) if slash.map_or(true, |s| colon > s) => (
                reference[..colon].to_string(),
                reference[colon + 1..].to_string(),
            ),
            _ => (reference.to_string(), "latest".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub key: String,
    pub value: String,
    /// Exposed to service containers and logged freely.
    pub public: bool,
    /// Runner-internal variable, also exposed to services.
    pub internal: bool,
}

impl Default for Variable {
    fn default() -> Self {
        Self {
            key: String::new(),
            value: String::new(),
            public: true,
            internal: false,
        }
    }
}

impl Variable {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    pub fn secret(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            public: false,
            internal: false,
        }
    }
}

/// One job, as acquired from the queue. The executor never mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub job_id: u64,
    pub project_id: u64,
    pub pipeline_id: u64,
    pub runner_id: String,
    /// Deterministic job-scoped prefix, e.g.
    /// `runner-abc12345-project-7-concurrent-0`.
    pub project_unique_name: String,
    /// The job working directory inside the build container.
    pub root_dir: String,
    pub image: ImageDefinition,
    pub services: Vec<ImageDefinition>,
    pub variables: Vec<Variable>,
    pub git_strategy: GitStrategy,
    pub flags: FeatureFlags,
}

impl JobSpec {
    /// Variables visible to service containers: public or runner-internal.
    pub fn public_or_internal_variables(&self) -> Vec<Variable> {
        self.variables
            .iter()
            .filter(|v| v.public || v.internal)
            .cloned()
            .collect()
    }

    /// All variables as `KEY=value` pairs, with `$VAR` / `${VAR}` references
    /// expanded against the job's own variable set.
    pub fn variable_strings(&self) -> Vec<String> {
        expand_variables(&self.variables, &self.variables)
    }
}

/// Expands `$VAR` and `${VAR}` references in `vars` against `scope` and
/// renders `KEY=value` strings. Unknown references expand to the empty
/// string, matching shell semantics.
pub fn expand_variables(vars: &[Variable], scope: &[Variable]) -> Vec<String> {
    vars.iter()
        .map(|v| format!("{}={}", v.key, expand_value(&v.value, scope)))
        .collect()
}

pub fn expand_value(value: &str, scope: &[Variable]) -> String {
    let lookup = |name: &str| -> String {
        scope
            .iter()
            .find(|v| v.key == name)
            .map(|v| v.value.clone())
            .unwrap_or_default()
    };

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                // `$$` escapes a literal dollar.
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for n in chars.by_ref() {
                    if n == '}' {
                        break;
                    }
                    name.push(n);
                }
                out.push_str(&lookup(&name));
            }
            Some(c) if c.is_ascii_alphanumeric() || *c == '_' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&name));
            }
            _ => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_and_version_with_tag() {
        let def = ImageDefinition::named("postgres:14");
        assert_eq!(
            def.service_name_and_version(),
            ("postgres".to_string(), "14".to_string())
        );
    }

    #[test]
    fn test_service_name_without_tag_defaults_to_latest() {
        let def = ImageDefinition::named("registry.example/db/postgres");
        assert_eq!(
            def.service_name_and_version(),
            (
                "registry.example/db/postgres".to_string(),
                "latest".to_string()
            )
        );
    }

    #[test]
    fn test_service_name_ignores_registry_port_colon() {
        let def = ImageDefinition::named("registry.example:5000/postgres");
        assert_eq!(
            def.service_name_and_version(),
            (
                "registry.example:5000/postgres".to_string(),
                "latest".to_string()
            )
        );
    }

    #[test]
    fn test_public_or_internal_filters_secrets() {
        let job = JobSpec {
            variables: vec![
                Variable::new("CI", "true"),
                Variable::secret("TOKEN", "hunter2"),
                Variable {
                    key: "RUNNER_INTERNAL".into(),
                    value: "x".into(),
                    public: false,
                    internal: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let visible: Vec<String> = job
            .public_or_internal_variables()
            .iter()
            .map(|v| v.key.clone())
            .collect();
        assert_eq!(visible, vec!["CI", "RUNNER_INTERNAL"]);
    }

    #[test]
    fn test_expand_value_braced_and_bare() {
        let scope = vec![
            Variable::new("CI_REGISTRY", "registry.example"),
            Variable::new("TAG", "v1"),
        ];
        assert_eq!(
            expand_value("${CI_REGISTRY}/app:$TAG", &scope),
            "registry.example/app:v1"
        );
    }

    #[test]
    fn test_expand_value_unknown_is_empty() {
        assert_eq!(expand_value("x-$MISSING-y", &[]), "x--y");
    }

    #[test]
    fn test_expand_value_escaped_dollar() {
        assert_eq!(expand_value("cost: $$5", &[]), "cost: $5");
    }

    #[test]
    fn test_variable_strings_expand_against_job_scope() {
        let job = JobSpec {
            variables: vec![
                Variable::new("BASE", "/builds"),
                Variable::new("DIR", "${BASE}/project"),
            ],
            ..Default::default()
        };
        let strings = job.variable_strings();
        assert!(strings.contains(&"DIR=/builds/project".to_string()));
    }
}
