//! Prompt compilation.
//!
//! The default template is embedded at compile time and asks the provider
//! for a fixed output layout plus an optional follow-up block.

use crate::types::Task;

/// Default prompt template embedded at compile time.
pub mod defaults {
    pub const TASK_PROMPT: &str = include_str!("defaults/task_prompt.md");
}

const NONE_PROVIDED: &str = "None provided.";

#[derive(Debug, Clone)]
pub struct PromptCompiler {
    template: String,
}

impl Default for PromptCompiler {
    fn default() -> Self {
        Self {
            template: defaults::TASK_PROMPT.to_string(),
        }
    }
}

impl PromptCompiler {
    /// Use a custom template. Recognised placeholders: `{{request}}`,
    /// `{{repo_path}}`, `{{constraints}}`, `{{acceptance}}`.
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn compile(&self, task: &Task) -> String {
        let constraints = task
            .constraints
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(NONE_PROVIDED);

        let acceptance = if task.acceptance.is_empty() {
            NONE_PROVIDED.to_string()
        } else {
            task.acceptance
                .iter()
                .map(|a| format!("- {}", a))
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.template
            .replace("{{request}}", task.request.trim())
            .replace("{{repo_path}}", &task.repo_path)
            .replace("{{constraints}}", constraints)
            .replace("{{acceptance}}", &acceptance)
            .trim()
            .to_string()
    }
}
