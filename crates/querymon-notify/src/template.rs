use crate::context::TriggerContext;
use anyhow::Result;

/// Renders action subject/message templates. The full expansion language is
/// an external collaborator; this trait is the seam it plugs into.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, ctx: &TriggerContext<'_>) -> Result<String>;
}

/// Built-in `{{placeholder}}` substitution over the trigger context.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderTemplateEngine;

impl TemplateEngine for PlaceholderTemplateEngine {
    fn render(&self, template: &str, ctx: &TriggerContext<'_>) -> Result<String> {
        let total = ctx
            .results
            .map(|r| r.total.to_string())
            .unwrap_or_default();
        let results_json = match ctx.results {
            Some(r) => serde_json::to_string(r)?,
            None => String::new(),
        };

        Ok(template
            .replace("{{monitor.name}}", &ctx.monitor.name)
            .replace("{{monitor.id}}", &ctx.monitor.id)
            .replace("{{trigger.name}}", &ctx.trigger.name)
            .replace("{{trigger.id}}", &ctx.trigger.id)
            .replace("{{trigger.severity}}", &ctx.trigger.severity.to_string())
            .replace("{{results.total}}", &total)
            .replace("{{results.json}}", &results_json)
            .replace("{{error}}", ctx.error.unwrap_or("")))
    }
}
