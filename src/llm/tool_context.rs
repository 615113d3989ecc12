use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat_context::{FunctionCall, FunctionCallOutput};
use crate::protocol::ToolSchema;
use crate::{Error, Result};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

/// A callable tool: name, JSON parameter schema and async handler.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: Option<String>,
    parameters: Value,
    handler: ToolHandler,
}

impl FunctionTool {
    /// Build a tool whose arguments are deserialized into `TArgs`; the parameter
    /// schema is derived from `TArgs`.
    ///
    /// # Errors
    /// Returns `Error::InvalidTool` if the name is empty or the schema cannot be serialized.
    pub fn new<TArgs, TResp, F, Fut>(name: impl Into<String>, handler: F) -> Result<Self>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidTool("tool name must not be empty".to_string()));
        }
        let schema = schemars::schema_for!(TArgs);
        let parameters = serde_json::to_value(&schema)
            .map_err(|e| Error::InvalidTool(format!("{name}: {e}")))?;

        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value)
                    .map_err(|e| Error::InvalidTool(e.to_string()))?;
                let resp = user_handler(args).await?;
                Ok(serde_json::to_value(resp)?)
            })
        };

        Ok(Self {
            name,
            description: None,
            parameters,
            handler: Arc::new(handler),
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub const fn parameters(&self) -> &Value {
        &self.parameters
    }

    #[must_use]
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// # Errors
    /// Returns an error if the arguments do not match the schema or the handler fails.
    pub async fn call(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// The set of tools a backend may invoke, keyed by unique name.
#[derive(Clone, Default)]
pub struct ToolContext {
    tools: BTreeMap<String, FunctionTool>,
}

impl ToolContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `Error::InvalidTool` if two tools share a name.
    pub fn from_tools(tools: impl IntoIterator<Item = FunctionTool>) -> Result<Self> {
        let mut ctx = Self::new();
        for tool in tools {
            ctx.add(tool)?;
        }
        Ok(ctx)
    }

    /// # Errors
    /// Returns `Error::InvalidTool` if a tool with the same name is registered.
    pub fn add(&mut self, tool: FunctionTool) -> Result<()> {
        if self.tools.contains_key(tool.name()) {
            return Err(Error::InvalidTool(format!("duplicate tool name: {}", tool.name())));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Register a typed handler under `name`.
    ///
    /// # Errors
    /// Returns `Error::InvalidTool` if the name is taken or invalid.
    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.add(FunctionTool::new(name, handler)?)
    }

    /// # Errors
    /// Returns `Error::InvalidTool` if the name is taken or invalid.
    pub fn tool_with_description<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.add(FunctionTool::new(name, handler)?.with_description(description))
    }

    pub fn remove(&mut self, name: &str) -> Option<FunctionTool> {
        self.tools.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FunctionTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Protocol-level definitions for every registered tool, sorted by name.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(FunctionTool::schema).collect()
    }

    /// Run the tool a backend requested. Unknown tools, malformed arguments and
    /// handler failures become an error output rather than an `Err`, so the
    /// result can always be fed back into the conversation.
    pub async fn execute(&self, call: &FunctionCall) -> FunctionCallOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "model requested an unknown tool");
            return FunctionCallOutput::new(call, format!("unknown tool: {}", call.name), true);
        };

        let result = match call.parsed_arguments() {
            Ok(arguments) => tool.call(arguments).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(value) => {
                let output = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                FunctionCallOutput::new(call, output, false)
            }
            Err(err) => {
                tracing::debug!(tool = %call.name, error = %err, "tool call failed");
                let output = serde_json::json!({ "error": err.to_string() }).to_string();
                FunctionCallOutput::new(call, output, true)
            }
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}
