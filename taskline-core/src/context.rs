//! Global context of a workflow task
//!
//! The only state shared between jobs of a task. Jobs write their outputs
//! under their own key prefix; later writes to the same key overwrite.
//! The context is snapshotted into the task document on every
//! acknowledgement so a finished task carries its final values.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::output::{self, TemplateError};

#[derive(Debug, Clone, Default)]
pub struct GlobalContext {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Publishes `outputs` under the job key
    pub fn set_outputs<'a, I>(&self, job_key: &str, outputs: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in outputs {
            values.insert(output::output_key(job_key, name), value.clone());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn render(&self, template: &str) -> String {
        output::render_with(template, |key| self.get(key))
    }

    pub fn render_strict(&self, template: &str) -> Result<String, TemplateError> {
        output::render_strict_with(template, |key| self.get(key))
    }

    /// Renders every string leaf of a JSON document in place
    pub fn render_json(&self, value: &mut JsonValue) {
        match value {
            JsonValue::String(s) => {
                if s.contains("{{") {
                    *s = self.render(s);
                }
            }
            JsonValue::Array(items) => items.iter_mut().for_each(|item| self.render_json(item)),
            JsonValue::Object(map) => map.values_mut().for_each(|item| self.render_json(item)),
            _ => {}
        }
    }

    /// Renders every string field of a serializable value
    pub fn render_value<T>(&self, value: &T) -> Result<T, serde_json::Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut json = serde_json::to_value(value)?;
        self.render_json(&mut json);
        serde_json::from_value(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::common::KeyVal;

    #[test]
    fn test_outputs_resolve_for_downstream_jobs() {
        let context = GlobalContext::new();
        let outputs = BTreeMap::from([("IMAGE".to_string(), "reg/a:1".to_string())]);
        context.set_outputs("build1.svcA.modA", &outputs);

        assert_eq!(
            context.get("build1.svcA.modA.IMAGE").as_deref(),
            Some("reg/a:1")
        );
        assert_eq!(
            context.render("{{.job.build1.svcA.modA.output.IMAGE}}"),
            "reg/a:1"
        );
    }

    #[test]
    fn test_later_write_overwrites() {
        let context = GlobalContext::new();
        context.set("deploy.IMAGE", "a");
        context.set("deploy.IMAGE", "b");
        assert_eq!(context.get("deploy.IMAGE").as_deref(), Some("b"));
    }

    #[test]
    fn test_clones_share_values() {
        let context = GlobalContext::new();
        let other = context.clone();
        other.set("workflow.task_id", "3");
        assert_eq!(context.snapshot().len(), 1);
    }

    #[test]
    fn test_render_value_walks_nested_fields() {
        let context = GlobalContext::from_map(BTreeMap::from([(
            "build.TAG".to_string(),
            "v2".to_string(),
        )]));
        let envs = vec![KeyVal::new("TAG", "{{.job.build.output.TAG}}")];

        let rendered = context.render_value(&envs).unwrap();
        assert_eq!(rendered[0].value, "v2");
    }
}
