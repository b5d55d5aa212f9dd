//! 校验能力抽象与 jsonschema 引擎适配

use jsonschema::{Retrieve, Uri};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, Violation, Violations};

/// 校验能力
///
/// loader 只依赖这个 trait，任何满足约定的校验引擎都可以替换进来
pub trait SchemaValidator: Send + Sync {
    /// 使用名称（或 `$id`）为 `schema` 的 schema 校验 `value`
    ///
    /// 失败时返回 `ValidationFailed`，携带全部违规；schema 不存在返回 `SchemaNotFound`
    fn validate(&self, value: &JsonValue, schema: &str) -> Result<(), ConfigError>;
}

/// 本地 `$ref` 解析器，只在已注册的 schema 中查找，不访问网络
pub(crate) struct LocalRetriever {
    /// `$id` -> schema
    by_id: HashMap<String, JsonValue>,
    /// 注册名 -> schema
    by_name: HashMap<String, JsonValue>,
}

impl LocalRetriever {
    pub(crate) fn new(by_id: HashMap<String, JsonValue>, by_name: HashMap<String, JsonValue>) -> Self {
        Self { by_id, by_name }
    }

    pub(crate) fn empty() -> Self {
        Self::new(HashMap::new(), HashMap::new())
    }
}

impl Retrieve for LocalRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<JsonValue, Box<dyn std::error::Error + Send + Sync>> {
        let uri_str = uri.as_str();

        if let Some(value) = self.by_id.get(uri_str) {
            return Ok(value.clone());
        }

        // 相对引用会被解析成 json-schema:///<name> 这样的地址，取最后一段按注册名查找
        let last = uri_str
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(uri_str);
        let bare = last.strip_suffix(".json").unwrap_or(last);

        for key in [last, bare] {
            if let Some(value) = self.by_name.get(key) {
                return Ok(value.clone());
            }
        }

        Err(format!("unresolved schema reference: {}", uri_str).into())
    }
}

/// 编译 schema
pub(crate) fn compile(
    name: &str,
    schema: &JsonValue,
    retriever: LocalRetriever,
) -> Result<jsonschema::Validator, ConfigError> {
    if !schema.is_object() && !schema.is_boolean() {
        return Err(ConfigError::SchemaInvalid {
            schema: name.to_string(),
            reason: "schema must be an object or a boolean".to_string(),
        });
    }

    let mut opts = jsonschema::options();
    opts.with_retriever(retriever);
    opts.build(schema).map_err(|e| ConfigError::SchemaInvalid {
        schema: name.to_string(),
        reason: e.to_string(),
    })
}

/// 执行校验并收集全部违规
pub(crate) fn check(
    name: &str,
    validator: &jsonschema::Validator,
    value: &JsonValue,
) -> Result<(), ConfigError> {
    let violations: Vec<Violation> = validator
        .iter_errors(value)
        .map(|e| Violation {
            path: e.instance_path.to_string(),
            constraint: e.schema_path.to_string(),
            message: e.to_string(),
            actual: Some(e.instance.clone().into_owned()),
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed {
            schema: name.to_string(),
            source_id: None,
            violations: Violations::new(violations),
        })
    }
}

/// 绑定到单个 schema 的独立校验器
///
/// 不经过 loader / cache / watch，适合只需要校验的调用方
///
/// # 示例
/// ```no_run
/// use cfgx::schema::Validator;
/// use serde_json::json;
///
/// let validator = Validator::new(json!({"type": "object", "required": ["port"]})).unwrap();
/// assert!(validator.is_valid(&json!({"port": 8080})));
/// ```
#[derive(Clone)]
pub struct Validator {
    schema: JsonValue,
    name: String,
    compiled: Arc<jsonschema::Validator>,
}

impl Validator {
    /// 编译 schema；schema 本身不合法时返回 `SchemaInvalid`
    pub fn new(schema: JsonValue) -> Result<Self, ConfigError> {
        let name = schema
            .get("$id")
            .and_then(|v| v.as_str())
            .unwrap_or("<inline>")
            .to_string();
        let compiled = compile(&name, &schema, LocalRetriever::empty())?;
        Ok(Self {
            schema,
            name,
            compiled: Arc::new(compiled),
        })
    }

    pub(crate) fn from_compiled(
        name: &str,
        schema: JsonValue,
        compiled: Arc<jsonschema::Validator>,
    ) -> Self {
        Self {
            schema,
            name: name.to_string(),
            compiled,
        }
    }

    pub fn schema(&self) -> &JsonValue {
        &self.schema
    }

    pub fn check(&self, value: &JsonValue) -> Result<(), ConfigError> {
        check(&self.name, &self.compiled, value)
    }

    pub fn is_valid(&self, value: &JsonValue) -> bool {
        self.compiled.is_valid(value)
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl SchemaValidator for Validator {
    /// 独立校验器忽略 schema 名称，总是使用自身绑定的 schema
    fn validate(&self, value: &JsonValue, _schema: &str) -> Result<(), ConfigError> {
        self.check(value)
    }
}
