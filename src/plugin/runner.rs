//! Plugin execution: content-fragment injection and delivery-time
//! evaluation, plus the response middleware generated for each plugin.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::body::{materialize, Body};
use crate::error::InterceptError;
use crate::matcher;
use crate::pipeline::{Headers, Middleware, Outcome, ResponseContext, ResponseHandler};
use crate::plugin::engine::ScriptEngine;
use crate::plugin::schema::Plugin;

/// Marker a response's content-type must contain for body rewriting.
pub const HTML_CONTENT_TYPE: &str = "text/html";

/// Injection anchor: the closing head-section marker of the document.
const HEAD_CLOSE_ANCHOR: &str = "</head>";

/// Executes split plugin code against materialized bodies through an
/// injected [`ScriptEngine`].
pub struct Runner {
    engine: Arc<dyn ScriptEngine>,
}

impl Runner {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> Arc<dyn ScriptEngine> {
        self.engine.clone()
    }

    /// Runs one plugin against a body. Returns `Some(new_body)` when the
    /// delivered body must change (content injection happened, the
    /// delivery fragment returned a string, or both), `None` when the
    /// original response should be delivered untouched.
    ///
    /// A fault in the delivery fragment is caught, logged, and treated as
    /// no modification for that fragment only; an injection already
    /// applied still goes out.
    pub async fn execute(
        &self,
        plugin: &Plugin,
        body: &str,
        url: &str,
        headers: &Headers,
    ) -> Option<String> {
        let start = Instant::now();

        let (body, injected) = match &plugin.code.content {
            Some(fragment) => match inject_content(body, fragment, url, &plugin.name) {
                Some(with_script) => (with_script, true),
                None => (body.to_string(), false),
            },
            None => (body.to_string(), false),
        };

        let rewritten = if plugin.code.delivery.trim().is_empty() {
            None
        } else {
            match self
                .engine
                .eval(&plugin.code.delivery, &body, url, headers)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!(plugin = %plugin.name, error = %e, "delivery fragment fault");
                    None
                }
            }
        };

        debug!(
            plugin = %plugin.name,
            duration_ms = start.elapsed().as_millis() as u64,
            injected,
            rewrote = rewritten.is_some(),
            "plugin executed"
        );

        match rewritten {
            Some(new_body) => Some(new_body),
            None if injected => Some(body),
            None => None,
        }
    }
}

/// Substitutes the wrapped content fragment immediately before the first
/// closing head marker. Returns `None` when the anchor is absent, in which
/// case no injection occurs.
fn inject_content(body: &str, fragment: &str, url: &str, plugin_name: &str) -> Option<String> {
    let idx = body.find(HEAD_CLOSE_ANCHOR)?;
    let script = wrap_content_fragment(fragment, url, plugin_name);

    let mut out = String::with_capacity(body.len() + script.len());
    out.push_str(&body[..idx]);
    out.push_str(&script);
    out.push_str(&body[idx..]);
    Some(out)
}

/// Wraps a content fragment in a self-invoking unit bound to two read-only
/// values, the target URL and the plugin name. The fragment runs guarded
/// so a fault inside it cannot break the surrounding document.
fn wrap_content_fragment(fragment: &str, url: &str, plugin_name: &str) -> String {
    // JSON string literals double as JavaScript string literals.
    let url_lit = serde_json::Value::String(url.to_string()).to_string();
    let name_lit = serde_json::Value::String(plugin_name.to_string()).to_string();

    format!(
        "<script>(function(url, pluginName) {{ try {{\n{fragment}\n}} catch (e) {{ console.error('plugin ' + pluginName + ' failed:', e); }} }})({url_lit}, {name_lit});</script>"
    )
}

/// The response handler generated for a plugin: site gate, HTML
/// content-type gate, non-destructive materialization, execution, and a
/// content-length fix-up on rewrite.
struct PluginResponseHandler {
    plugin: Plugin,
    runner: Arc<Runner>,
}

#[async_trait]
impl ResponseHandler for PluginResponseHandler {
    async fn handle(
        &self,
        mut ctx: ResponseContext,
    ) -> std::result::Result<Outcome<ResponseContext>, InterceptError> {
        if !matcher::matches(&self.plugin.sites, &ctx.request.url) {
            return Ok(Outcome::Next(ctx));
        }
        if !ctx.headers.value_contains("content-type", HTML_CONTENT_TYPE) {
            return Ok(Outcome::Next(ctx));
        }

        // An absent body is never treated as empty content.
        let Some(text) = materialize(ctx.body.as_ref()).await? else {
            return Ok(Outcome::Next(ctx));
        };

        let url = ctx.request.url.clone();
        if let Some(new_body) = self
            .runner
            .execute(&self.plugin, &text, url.as_str(), &ctx.headers)
            .await
        {
            ctx.headers
                .insert("content-length", new_body.len().to_string());
            ctx.body = Some(Body::Text(new_body));
        }

        Ok(Outcome::Next(ctx))
    }
}

/// Builds the pipeline unit for a plugin. The unit id is the plugin name;
/// the unit carries only a response capability.
pub fn middleware_for(plugin: &Plugin, runner: Arc<Runner>) -> Middleware {
    Middleware::new(&plugin.name).on_response(Arc::new(PluginResponseHandler {
        plugin: plugin.clone(),
        runner,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::engine::StaticEngine;
    use crate::plugin::schema::{CONTENT_BEGIN_MARKER, CONTENT_END_MARKER};

    fn runner_with(engine: StaticEngine) -> Runner {
        Runner::new(Arc::new(engine))
    }

    fn title_plugin(source: &str) -> Plugin {
        Plugin::new("t1", vec!["*".to_string()], source).unwrap()
    }

    #[tokio::test]
    async fn test_delivery_rewrite() {
        let engine = StaticEngine::new();
        engine.register("tag-title", |body, _, _| {
            Ok(Some(body.replace("<title>", "<title>[X] ")))
        });

        let runner = runner_with(engine);
        let plugin = title_plugin("tag-title");

        let out = runner
            .execute(
                &plugin,
                "<html><head><title>Hi</title></head></html>",
                "https://example.com/",
                &Headers::new(),
            )
            .await;

        assert!(out.unwrap().contains("<title>[X] Hi"));
    }

    #[tokio::test]
    async fn test_non_string_return_means_unchanged() {
        let engine = StaticEngine::new();
        engine.register("observe", |_, _, _| Ok(None));

        let runner = runner_with(engine);
        let plugin = title_plugin("observe");

        let out = runner
            .execute(&plugin, "<html></html>", "https://example.com/", &Headers::new())
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_fault_degrades_to_no_modification() {
        let engine = StaticEngine::new();
        engine.register("boom", |_, _, _| Err("kaput".to_string()));

        let runner = runner_with(engine);
        let plugin = title_plugin("boom");

        let out = runner
            .execute(&plugin, "<html></html>", "https://example.com/", &Headers::new())
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_content_fragment_is_injected_before_head_close() {
        let source = format!(
            "{CONTENT_BEGIN_MARKER}\ndocument.title = 'patched';\n{CONTENT_END_MARKER}"
        );
        let runner = runner_with(StaticEngine::new());
        let plugin = title_plugin(&source);

        let out = runner
            .execute(
                &plugin,
                "<html><head><meta></head><body></body></html>",
                "https://example.com/page",
                &Headers::new(),
            )
            .await
            .unwrap();

        let script_at = out.find("<script>").unwrap();
        let head_close_at = out.find("</head>").unwrap();
        assert!(script_at < head_close_at);
        assert!(out.contains("document.title = 'patched';"));
        // The wrapper binds the target URL and the plugin name.
        assert!(out.contains("\"https://example.com/page\""));
        assert!(out.contains("\"t1\""));
        assert!(out.contains("try {"));
    }

    #[tokio::test]
    async fn test_missing_anchor_means_no_injection() {
        let source = format!("{CONTENT_BEGIN_MARKER}\nwork();\n{CONTENT_END_MARKER}");
        let runner = runner_with(StaticEngine::new());
        let plugin = title_plugin(&source);

        let out = runner
            .execute(
                &plugin,
                "<html><body>no head here</body></html>",
                "https://example.com/",
                &Headers::new(),
            )
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_delivery_runs_against_injected_body() {
        let engine = StaticEngine::new();
        engine.register("check-script", |body, _, _| {
            Ok(Some(format!(
                "sees-script={}",
                body.contains("<script>")
            )))
        });

        let source = format!(
            "check-script{CONTENT_BEGIN_MARKER}mark();{CONTENT_END_MARKER}"
        );
        let runner = runner_with(engine);
        let plugin = title_plugin(&source);

        let out = runner
            .execute(
                &plugin,
                "<html><head></head></html>",
                "https://example.com/",
                &Headers::new(),
            )
            .await;
        assert_eq!(out.as_deref(), Some("sees-script=true"));
    }

    #[tokio::test]
    async fn test_injection_survives_delivery_fault() {
        let engine = StaticEngine::new();
        engine.register("boom", |_, _, _| Err("kaput".to_string()));

        let source = format!("boom{CONTENT_BEGIN_MARKER}mark();{CONTENT_END_MARKER}");
        let runner = runner_with(engine);
        let plugin = title_plugin(&source);

        let out = runner
            .execute(
                &plugin,
                "<html><head></head></html>",
                "https://example.com/",
                &Headers::new(),
            )
            .await
            .unwrap();
        // The injected script still goes out even though the delivery
        // fragment faulted.
        assert!(out.contains("mark();"));
    }
}
