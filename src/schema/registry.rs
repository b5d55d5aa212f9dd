//! Schema 注册表
//!
//! 按名称保存 schema 原文和编译好的校验器，同一个注册表内名称唯一、`$id` 唯一

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::validator::{check, compile, LocalRetriever, SchemaValidator, Validator};
use crate::error::ConfigError;

struct SchemaEntry {
    schema: JsonValue,
    id: Option<String>,
    compiled: Arc<jsonschema::Validator>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, SchemaEntry>,
    /// `$id` -> 注册名
    ids: HashMap<String, String>,
}

impl RegistryState {
    fn retriever(&self) -> LocalRetriever {
        let by_id = self
            .ids
            .iter()
            .filter_map(|(id, name)| {
                self.entries
                    .get(name)
                    .map(|entry| (id.clone(), entry.schema.clone()))
            })
            .collect();
        let by_name = self
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.schema.clone()))
            .collect();
        LocalRetriever::new(by_id, by_name)
    }

    fn lookup(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries
            .get(key)
            .or_else(|| self.ids.get(key).and_then(|name| self.entries.get(name)))
    }
}

/// Schema 注册表
///
/// # 示例
/// ```no_run
/// use cfgx::schema::{SchemaRegistry, SchemaValidator};
/// use serde_json::json;
///
/// let registry = SchemaRegistry::new();
/// registry.register_schema("app", json!({
///     "type": "object",
///     "properties": {"port": {"type": "integer", "exclusiveMinimum": 0}},
///     "required": ["port"]
/// })).unwrap();
///
/// registry.validate(&json!({"port": 8080}), "app").unwrap();
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 schema
    ///
    /// 依次检查 schema 是否合法、名称是否重复、`$id` 是否冲突，
    /// 任何一步失败都不会修改注册表
    pub fn register_schema(&self, name: &str, schema: JsonValue) -> Result<(), ConfigError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        // 编译的同时完成 schema 合法性检查，$ref 只能指向已注册的 schema
        let compiled = compile(name, &schema, state.retriever())?;

        if state.entries.contains_key(name) {
            return Err(ConfigError::SchemaNameExists {
                name: name.to_string(),
            });
        }

        let id = schema
            .get("$id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        if let Some(id) = &id {
            if state.ids.contains_key(id) {
                return Err(ConfigError::SchemaIdExists { id: id.clone() });
            }
            state.ids.insert(id.clone(), name.to_string());
        }

        state.entries.insert(
            name.to_string(),
            SchemaEntry {
                schema,
                id,
                compiled: Arc::new(compiled),
            },
        );
        log::debug!("schema registered: {}", name);
        Ok(())
    }

    /// 获取 schema 原文
    pub fn get_schema(&self, name: &str) -> Option<JsonValue> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.get(name).map(|entry| entry.schema.clone())
    }

    pub fn has_schema(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.contains_key(name)
    }

    /// 删除 schema 及其校验器，名称不存在时什么也不做
    pub fn remove_schema(&self, name: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.remove(name) {
            if let Some(id) = entry.id {
                state.ids.remove(&id);
            }
            log::debug!("schema removed: {}", name);
        }
    }

    /// 已注册的 schema 名称（按字母排序）
    pub fn schema_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// 取出已编译的独立校验器
    pub fn validator(&self, name_or_id: &str) -> Result<Validator, ConfigError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .lookup(name_or_id)
            .ok_or_else(|| ConfigError::SchemaNotFound {
                schema: name_or_id.to_string(),
            })?;
        Ok(Validator::from_compiled(
            name_or_id,
            entry.schema.clone(),
            entry.compiled.clone(),
        ))
    }
}

impl SchemaValidator for SchemaRegistry {
    fn validate(&self, value: &JsonValue, schema: &str) -> Result<(), ConfigError> {
        // 只在查找时持有读锁，校验本身不需要锁
        let compiled = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .lookup(schema)
                .map(|entry| entry.compiled.clone())
                .ok_or_else(|| ConfigError::SchemaNotFound {
                    schema: schema.to_string(),
                })?
        };
        check(schema, &compiled, value)
    }
}
