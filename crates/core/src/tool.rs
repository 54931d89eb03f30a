// crates/core/src/tool.rs
//! Units of work and the registry they are looked up in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use validator::{Validate, ValidationErrors};

use crate::context::JobContext;
use crate::error::JobError;

/// A named unit of work with a typed, validated input.
///
/// `Input` doubles as the declared schema: it is deserialized from the raw
/// JSON input, checked with [`Validate`], and exported with [`JsonSchema`].
pub trait Tool: Send + Sync + 'static {
    type Input: DeserializeOwned + Validate + JsonSchema + Send + 'static;
    type Output: Serialize;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Dotted namespace such as `stats.correlation`, if the tool has one.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Run the body. May call `ctx.update_progress` any number of times.
    fn execute(&self, ctx: &JobContext, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// A validated call, ready to run on a worker.
pub type Invocation = Box<dyn FnOnce(&JobContext) -> anyhow::Result<Value> + Send>;

/// Object-safe view of a [`Tool`].
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn input_schema(&self) -> Value;

    /// Validate `raw` and bind it to the body. Never runs the body.
    fn prepare(&self, raw: Value) -> Result<Invocation, JobError>;
}

struct Registered<T>(Arc<T>);

impl<T: Tool> DynTool for Registered<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn namespace(&self) -> Option<&str> {
        self.0.namespace()
    }

    fn input_schema(&self) -> Value {
        let schema = schemars::schema_for!(T::Input);
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }

    fn prepare(&self, raw: Value) -> Result<Invocation, JobError> {
        let name = self.0.name();
        let input: T::Input =
            serde_json::from_value(raw).map_err(|e| JobError::invalid_input(name, e.to_string()))?;
        input
            .validate()
            .map_err(|e| JobError::invalid_input(name, describe_validation(&e)))?;

        let tool = Arc::clone(&self.0);
        Ok(Box::new(move |ctx: &JobContext| {
            let output = tool.execute(ctx, input)?;
            Ok(serde_json::to_value(output)?)
        }))
    }
}

/// Wrap a tool for dynamic dispatch without registering it anywhere.
pub fn erase<T: Tool>(tool: T) -> Arc<dyn DynTool> {
    Arc::new(Registered(Arc::new(tool)))
}

fn describe_validation(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (field, errs) in errors.field_errors() {
        for err in errs.iter() {
            match &err.message {
                Some(msg) => parts.push(format!("{field}: {msg}")),
                None => parts.push(format!("{field}: {}", err.code)),
            }
        }
    }
    if parts.is_empty() {
        return errors.to_string();
    }
    parts.sort();
    parts.join("; ")
}

/// Tool description in the shape LLM tool-use APIs expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Direct children of a namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceInfo {
    pub namespace: String,
    pub subcategories: Vec<String>,
    pub tools: Vec<String>,
}

/// Registered tools, addressable by name and by namespace.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn DynTool>>,
    /// namespace → tool name
    namespaces: BTreeMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<T: Tool>(&mut self, tool: T) -> Arc<dyn DynTool> {
        self.register_dyn(erase(tool))
    }

    pub fn register_dyn(&mut self, tool: Arc<dyn DynTool>) -> Arc<dyn DynTool> {
        let name = tool.name().to_string();
        if let Some(ns) = tool.namespace() {
            self.namespaces.insert(ns.to_string(), name.clone());
        }
        if self.tools.insert(name.clone(), Arc::clone(&tool)).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        } else {
            tracing::debug!(tool = %name, "Registered tool");
        }
        tool
    }

    /// Look up by tool name, then by namespace.
    pub fn get(&self, key: &str) -> Option<Arc<dyn DynTool>> {
        self.tools
            .get(key)
            .or_else(|| self.namespaces.get(key).and_then(|name| self.tools.get(name)))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Find names and namespaces matching `pattern`.
    ///
    /// - `"stats.*"` lists everything under the `stats` prefix
    /// - any other pattern containing `*` or `?` is a glob
    /// - anything else is an exact match
    pub fn discover(&self, pattern: &str) -> Vec<String> {
        let keys: BTreeSet<&String> = self.tools.keys().chain(self.namespaces.keys()).collect();

        if let Some(prefix) = pattern.strip_suffix(".*") {
            let dotted = format!("{prefix}.");
            return keys
                .into_iter()
                .filter(|k| k.starts_with(&dotted))
                .cloned()
                .collect();
        }

        if pattern.contains(['*', '?']) {
            let Some(re) = glob_to_regex(pattern) else {
                return Vec::new();
            };
            return keys
                .into_iter()
                .filter(|k| re.is_match(k))
                .cloned()
                .collect();
        }

        keys.into_iter()
            .filter(|k| k.as_str() == pattern)
            .cloned()
            .collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Sub-namespaces and tools directly beneath `namespace`.
    pub fn namespace_info(&self, namespace: &str) -> Option<NamespaceInfo> {
        let dotted = format!("{namespace}.");
        let mut subcategories = BTreeSet::new();
        let mut tools = BTreeSet::new();

        for ns in self.namespaces.keys() {
            let Some(rest) = ns.strip_prefix(&dotted) else {
                continue;
            };
            match rest.split_once('.') {
                Some((child, _)) => subcategories.insert(child.to_string()),
                None => tools.insert(rest.to_string()),
            };
        }

        if subcategories.is_empty() && tools.is_empty() {
            return None;
        }
        Some(NamespaceInfo {
            namespace: namespace.to_string(),
            subcategories: subcategories.into_iter().collect(),
            tools: tools.into_iter().collect(),
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

fn glob_to_regex(pattern: &str) -> Option<regex_lite::Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                re.push_str(&regex_lite::escape(&literal));
                literal.clear();
                re.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    re.push_str(&regex_lite::escape(&literal));
    re.push('$');
    regex_lite::Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use crate::registry::JobRegistry;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Validate, JsonSchema)]
    struct CountInput {
        #[validate(range(min = 10, max = 100000))]
        n_points: u32,
    }

    struct Counter {
        name: &'static str,
        namespace: Option<&'static str>,
    }

    impl Tool for Counter {
        type Input = CountInput;
        type Output = Value;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Counts points"
        }

        fn namespace(&self) -> Option<&str> {
            self.namespace
        }

        fn execute(&self, ctx: &JobContext, input: CountInput) -> anyhow::Result<Value> {
            ctx.update_progress(50.0, "counting");
            Ok(json!({ "count": input.n_points }))
        }
    }

    fn counter(name: &'static str, namespace: Option<&'static str>) -> Counter {
        Counter { name, namespace }
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(counter("correlation", Some("stats.relationships.correlation")));
        tools.register(counter("describe", Some("stats.describe")));
        tools.register(counter("kmeans", Some("ml.clustering.kmeans")));
        tools.register(counter("echo", None));
        tools
    }

    #[test]
    fn test_get_by_name_and_namespace() {
        let tools = registry();
        assert_eq!(tools.get("correlation").unwrap().name(), "correlation");
        assert_eq!(
            tools.get("stats.relationships.correlation").unwrap().name(),
            "correlation"
        );
        assert!(tools.get("missing").is_none());
        assert_eq!(tools.len(), 4);
    }

    #[test]
    fn test_discover_patterns() {
        let tools = registry();
        assert_eq!(
            tools.discover("stats.*"),
            vec!["stats.describe", "stats.relationships.correlation"]
        );
        assert_eq!(tools.discover("*.kmeans"), vec!["ml.clustering.kmeans"]);
        assert_eq!(tools.discover("e?ho"), vec!["echo"]);
        assert_eq!(tools.discover("echo"), vec!["echo"]);
        assert!(tools.discover("nothing").is_empty());
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let mut tools = ToolRegistry::new();
        tools.register(counter("a+b", None));
        tools.register(counter("aab", None));
        assert_eq!(tools.discover("a+*"), vec!["a+b"]);
    }

    #[test]
    fn test_namespace_info() {
        let tools = registry();
        let info = tools.namespace_info("stats").unwrap();
        assert_eq!(info.subcategories, vec!["relationships"]);
        assert_eq!(info.tools, vec!["describe"]);
        assert!(tools.namespace_info("nope").is_none());
    }

    #[test]
    fn test_schemas_export_input_schema() {
        let tools = registry();
        let schemas = tools.schemas();
        let corr = schemas.iter().find(|s| s.name == "correlation").unwrap();
        assert_eq!(corr.description, "Counts points");
        assert!(corr.input_schema["properties"]["n_points"].is_object());
    }

    #[test]
    fn test_prepare_rejects_out_of_range_input() {
        let tool = erase(counter("correlation", None));
        let err = match tool.prepare(json!({"n_points": 5})) {
            Err(e) => e,
            Ok(_) => panic!("expected validation failure"),
        };
        let msg = err.to_string();
        assert!(msg.contains("correlation"));
        assert!(msg.contains("n_points"));
    }

    #[test]
    fn test_prepare_rejects_malformed_input() {
        let tool = erase(counter("correlation", None));
        assert!(matches!(
            tool.prepare(json!({"n_points": "many"})),
            Err(JobError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_prepared_invocation_runs_body() {
        let registry = Arc::new(JobRegistry::new(Arc::new(MessageChannel::new())));
        let job = registry.create_job("correlation");
        let ctx = JobContext::new(job.id.clone(), "correlation", Arc::clone(&registry));

        let tool = erase(counter("correlation", None));
        let invocation = tool.prepare(json!({"n_points": 100})).unwrap();
        let output = invocation(&ctx).unwrap();
        assert_eq!(output, json!({"count": 100}));
        assert_eq!(registry.get_job(&job.id).unwrap().progress, 50.0);
    }
}
