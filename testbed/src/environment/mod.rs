//! Layered environment and property resolution
//!
//! An [`Environment`] is an immutable snapshot that merges the ambient
//! process environment, a synthesized set of ambient properties, and an
//! optional properties-file overlay. Snapshots are cheap to share and are
//! memoized per override path by [`EnvironmentRegistry`], which tests pass
//! around explicitly instead of reaching for global state.

mod properties;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{TestbedError, TestbedResult};

/// Environment variable names checked, in order, when locating a Maven
/// installation.
const MAVEN_HOME_ALIASES: [&str; 4] = ["M3_HOME", "M2_HOME", "MVN_HOME", "MAVEN_HOME"];

/// File that marks the `bin/` directory of a Maven installation layout.
const MAVEN_MARKER_FILE: &str = "m2.conf";

/// Immutable snapshot of environment variables and configuration properties.
///
/// Constructed from ambient process state via [`Environment::resolve`] or
/// from explicit maps via [`Environment::from_parts`]. Property keys of the
/// form `env.<NAME>` are projected into the variable map under `<NAME>` at
/// construction time, overriding any ambient value.
#[derive(Debug, Clone)]
pub struct Environment {
    envs: BTreeMap<String, String>,
    properties: HashMap<String, String>,
}

impl Environment {
    /// Build a snapshot from the ambient process state, overlaid with the
    /// properties file at `override_path` when one is given.
    ///
    /// A missing override file is treated as an empty overlay. An override
    /// file that exists but cannot be read is an error.
    pub fn resolve(override_path: Option<&Path>) -> TestbedResult<Environment> {
        // Pick up .env values before snapshotting; dotenv never overrides
        // variables that are already set.
        let _ = dotenv::dotenv();

        let envs: BTreeMap<String, String> = std::env::vars().collect();
        let mut properties = ambient_properties(&envs);

        if let Some(path) = override_path {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let overlay = properties::parse(&contents);
                    debug!(
                        "📋 Loaded {} override properties from {}",
                        overlay.len(),
                        path.display()
                    );
                    properties.extend(overlay);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("📋 No override properties at {}", path.display());
                }
                Err(e) => return Err(TestbedError::Io(e)),
            }
        }

        Ok(Environment::from_parts(envs, properties))
    }

    /// Build a snapshot from explicit maps, applying the `env.<NAME>`
    /// projection.
    pub fn from_parts(
        mut envs: BTreeMap<String, String>,
        properties: HashMap<String, String>,
    ) -> Environment {
        for (key, value) in &properties {
            if let Some(name) = key.strip_prefix("env.") {
                if !name.is_empty() {
                    envs.insert(name.to_string(), value.clone());
                }
            }
        }
        Environment { envs, properties }
    }

    /// Copy of the variable map, with the `javaagent` property (if set)
    /// appended to `MAVEN_OPTS` so launched builds load the agent.
    pub fn resolved_env(&self) -> BTreeMap<String, String> {
        let mut envs = self.envs.clone();

        if let Some(javaagent) = self.property("javaagent") {
            let opts = match envs.get("MAVEN_OPTS") {
                Some(existing) => format!("{existing} {javaagent}").trim().to_string(),
                None => javaagent.to_string(),
            };
            envs.insert("MAVEN_OPTS".to_string(), opts);
        }

        envs
    }

    /// Copy of the property map.
    pub fn resolved_properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    /// Look up a property value.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Look up a property value, falling back to `default`.
    pub fn property_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.property(name).unwrap_or(default)
    }

    /// Look up a property that must be present.
    pub fn required_property(&self, name: &str) -> TestbedResult<&str> {
        self.property(name).ok_or_else(|| TestbedError::RequiredProperty {
            name: name.to_string(),
        })
    }

    /// Look up a property as a filesystem path.
    pub fn property_as_path(&self, name: &str) -> Option<PathBuf> {
        self.property(name).map(PathBuf::from)
    }

    /// Look up a property as a filesystem path that must be present.
    pub fn required_property_as_path(&self, name: &str) -> TestbedResult<PathBuf> {
        self.required_property(name).map(PathBuf::from)
    }

    /// The current user's home directory.
    pub fn user_home(&self) -> TestbedResult<PathBuf> {
        self.required_property_as_path("user.home")
    }

    /// The build output directory.
    pub fn build_dir(&self) -> TestbedResult<PathBuf> {
        self.required_property_as_path("build.dir")
    }

    /// The test resources directory.
    pub fn resources_dir(&self) -> TestbedResult<PathBuf> {
        self.required_property_as_path("resources.dir")
    }

    /// The Java installation directory, when one is configured.
    pub fn java_home(&self) -> Option<PathBuf> {
        self.property_as_path("java.home")
    }

    /// Whether tests may attach a debugger to launched processes. True only
    /// when the `debug.allowed` property is exactly `"true"`.
    pub fn is_debug_allowed(&self) -> bool {
        self.property("debug.allowed") == Some("true")
    }

    /// Locate the Maven installation this snapshot points at.
    ///
    /// Precedence: the explicit `maven.home` property, then the first set
    /// variable among `M3_HOME`, `M2_HOME`, `MVN_HOME`, `MAVEN_HOME`, then a
    /// left-to-right scan of the snapshot's `PATH` for a `bin/m2.conf`
    /// marker, whose grandparent is the installation root. Returns `None`
    /// when no source matches.
    pub fn maven_home(&self) -> Option<PathBuf> {
        if let Some(home) = self.property("maven.home") {
            return Some(PathBuf::from(home));
        }

        for alias in MAVEN_HOME_ALIASES {
            if let Some(home) = self.envs.get(alias) {
                return Some(PathBuf::from(home));
            }
        }

        let paths = self.envs.get("PATH")?;
        let marker = find_file_in_paths(paths, MAVEN_MARKER_FILE)?;
        Some(marker.parent()?.parent()?.to_path_buf())
    }
}

/// Find `name` inside the entries of a `PATH`-style string, first hit wins.
fn find_file_in_paths(paths: &str, name: &str) -> Option<PathBuf> {
    std::env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|file| file.exists())
}

/// Synthesize the ambient property layer from process context.
///
/// These stand in for the configuration properties a test runner would
/// inject; an override file may replace any of them.
fn ambient_properties(envs: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut properties = HashMap::new();

    if let Some(home) = envs.get("HOME").or_else(|| envs.get("USERPROFILE")) {
        properties.insert("user.home".to_string(), home.clone());
    }
    if let Ok(cwd) = std::env::current_dir() {
        properties.insert("user.dir".to_string(), cwd.display().to_string());
    }
    if let Some(java_home) = envs.get("JAVA_HOME") {
        properties.insert("java.home".to_string(), java_home.clone());
    }

    let build_dir = envs
        .get("CARGO_TARGET_DIR")
        .cloned()
        .unwrap_or_else(|| "target".to_string());
    properties.insert("build.dir".to_string(), build_dir);
    properties.insert("resources.dir".to_string(), "tests/resources".to_string());

    properties
}

/// Memoizing resolver for [`Environment`] snapshots.
///
/// One registry is created per test run and passed to whatever needs
/// configuration. Each override path is resolved at most once; the lock is
/// held across check-and-insert so concurrent callers for the same key
/// observe a single construction.
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    cache: Mutex<HashMap<Option<PathBuf>, Arc<Environment>>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pure-system snapshot, with no override overlay.
    pub fn system(&self) -> TestbedResult<Arc<Environment>> {
        self.get(None)
    }

    /// The memoized snapshot for `override_path`, resolving it on first use.
    pub fn get(&self, override_path: Option<&Path>) -> TestbedResult<Arc<Environment>> {
        let key = override_path.map(Path::to_path_buf);

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(environment) = cache.get(&key) {
            return Ok(environment.clone());
        }

        let environment = Arc::new(Environment::resolve(override_path)?);
        cache.insert(key, environment.clone());
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn snapshot(
        envs: &[(&str, &str)],
        properties: &[(&str, &str)],
    ) -> Environment {
        let envs = envs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let properties = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_parts(envs, properties)
    }

    #[test]
    fn test_env_property_projection() {
        let env = snapshot(
            &[("FOO", "bar"), ("USER", "yoda")],
            &[("foo", "bar"), ("env.MURKS", "pfusch"), ("env.USER", "luke")],
        );

        let envs = env.resolved_env();
        assert_eq!(envs.len(), 3);
        assert_eq!(envs.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(envs.get("MURKS").map(String::as_str), Some("pfusch"));
        assert_eq!(envs.get("USER").map(String::as_str), Some("luke"));

        // the property map keeps the raw keys
        let props = env.resolved_properties();
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("env.USER").map(String::as_str), Some("luke"));
    }

    #[test]
    fn test_env_prefix_without_name_is_not_projected() {
        let env = snapshot(&[], &[("env.", "nothing")]);
        assert!(env.resolved_env().is_empty());
    }

    #[test]
    fn test_javaagent_appended_to_maven_opts() {
        let env = snapshot(&[], &[("javaagent", "-javaagent:probe.jar")]);
        assert_eq!(
            env.resolved_env().get("MAVEN_OPTS").map(String::as_str),
            Some("-javaagent:probe.jar")
        );

        let env = snapshot(
            &[("MAVEN_OPTS", "-Xmx512m")],
            &[("javaagent", "-javaagent:probe.jar")],
        );
        assert_eq!(
            env.resolved_env().get("MAVEN_OPTS").map(String::as_str),
            Some("-Xmx512m -javaagent:probe.jar")
        );
    }

    #[test]
    fn test_resolved_views_do_not_mutate_snapshot() {
        let env = snapshot(&[], &[("javaagent", "-javaagent:probe.jar")]);
        let _ = env.resolved_env();
        let _ = env.resolved_env();
        // the aggregate option is derived on demand, never accumulated
        assert_eq!(
            env.resolved_env().get("MAVEN_OPTS").map(String::as_str),
            Some("-javaagent:probe.jar")
        );
    }

    #[test]
    fn test_property_accessors() {
        let env = snapshot(&[], &[("present", "value")]);

        assert_eq!(env.property("present"), Some("value"));
        assert_eq!(env.property("absent"), None);
        assert_eq!(env.property_or("absent", "fallback"), "fallback");
        assert_eq!(env.required_property("present").unwrap(), "value");
        assert_matches!(
            env.required_property("absent"),
            Err(TestbedError::RequiredProperty { name }) if name == "absent"
        );
    }

    #[test]
    fn test_debug_allowed_requires_exact_literal() {
        assert!(snapshot(&[], &[("debug.allowed", "true")]).is_debug_allowed());
        assert!(!snapshot(&[], &[("debug.allowed", "True")]).is_debug_allowed());
        assert!(!snapshot(&[], &[("debug.allowed", "yes")]).is_debug_allowed());
        assert!(!snapshot(&[], &[]).is_debug_allowed());
    }

    #[test]
    fn test_maven_home_precedence() {
        // nothing configured
        assert_eq!(snapshot(&[], &[]).maven_home(), None);

        // alias order, first present wins
        let env = snapshot(&[("MAVEN_HOME", "maven-1"), ("M2_HOME", "maven-3")], &[]);
        assert_eq!(env.maven_home(), Some(PathBuf::from("maven-3")));

        // explicit property beats every variable
        let env = snapshot(
            &[("M3_HOME", "maven-4")],
            &[("maven.home", "/opt/explicit")],
        );
        assert_eq!(env.maven_home(), Some(PathBuf::from("/opt/explicit")));
    }

    #[test]
    fn test_maven_home_path_scan_finds_marker_grandparent() {
        let temp = tempfile::tempdir().unwrap();
        let maven_home = temp.path().join("maven.home");
        let bin = maven_home.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("m2.conf"), "").unwrap();

        let path_value = std::env::join_paths([
            Path::new("does-not-exist"),
            bin.as_path(),
            Path::new("also/not/here"),
        ])
        .unwrap();

        let env = snapshot(&[("PATH", path_value.to_str().unwrap())], &[]);
        assert_eq!(env.maven_home(), Some(maven_home));
    }

    #[test]
    fn test_registry_memoizes_per_key() {
        let registry = EnvironmentRegistry::new();

        let system = registry.system().unwrap();
        let again = registry.get(None).unwrap();
        assert!(Arc::ptr_eq(&system, &again));

        let named = registry
            .get(Some(Path::new("no-such-overlay.properties")))
            .unwrap();
        assert!(!Arc::ptr_eq(&system, &named));
    }

    #[test]
    fn test_resolve_missing_override_is_empty_overlay() {
        let env = Environment::resolve(Some(Path::new("no/such/file.properties"))).unwrap();
        // ambient layer is still present
        assert!(env.property("build.dir").is_some());
    }

    #[test]
    fn test_resolve_reads_override_file() {
        let temp = tempfile::tempdir().unwrap();
        let overlay = temp.path().join("override.properties");
        std::fs::write(&overlay, "maven.home=/opt/maven\nenv.CUSTOM=injected\n").unwrap();

        let env = Environment::resolve(Some(overlay.as_path())).unwrap();
        assert_eq!(env.property("maven.home"), Some("/opt/maven"));
        assert_eq!(
            env.resolved_env().get("CUSTOM").map(String::as_str),
            Some("injected")
        );
    }
}
