//! Prompt builders for code synthesis
//!
//! Every request is stateless: the prompt carries the component spec, the
//! importable lower-tier artifacts and, for repairs, the diagnostics to fix.

use crate::synthesis::GenerationContext;
use kiln_core::{ArtifactRecord, ComponentSpec, FixRequest};

const SYSTEM_PROMPT: &str = "You write production React components in TypeScript (TSX). \
Respond with exactly one fenced ```tsx code block containing the complete file and nothing else.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Build the prompt for generating one artifact
pub fn build_generate_prompt(spec: &ComponentSpec, context: &GenerationContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# GENERATE {} `{}`\n\n",
        spec.tier.to_string().to_uppercase(),
        spec.name
    ));

    prompt.push_str("## DESCRIPTION\n\n");
    if spec.description.is_empty() {
        prompt.push_str("(no description provided)");
    } else {
        prompt.push_str(&spec.description);
    }
    prompt.push_str("\n\n");

    if !context.design_name.is_empty() {
        prompt.push_str(&format!("Design system: {}\n\n", context.design_name));
    }

    if !context.tokens.is_null() {
        prompt.push_str("## DESIGN TOKENS\n\n```json\n");
        prompt.push_str(
            &serde_json::to_string_pretty(&context.tokens).unwrap_or_else(|_| "{}".to_string()),
        );
        prompt.push_str("\n```\n\n");
    }

    prompt.push_str("## AVAILABLE IMPORTS\n\n");
    if context.available.is_empty() {
        prompt.push_str("None. Do not import other design-system artifacts.\n\n");
    } else {
        prompt.push_str("Only these design-system artifacts may be imported:\n");
        for import in &context.available {
            prompt.push_str(&format!(
                "- `{}` ({}) from \"{}\"\n",
                import.name, import.tier, import.import_path
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("## REQUIREMENTS\n\n");
    prompt.push_str(&format!(
        "- Export a component named `{}` (named export)\n",
        spec.name
    ));
    prompt.push_str("- Export its props interface\n");
    prompt.push_str("- The file must type-check under `tsc --noEmit` in strict mode\n");

    prompt
}

/// Build the prompt for repairing an artifact
pub fn build_fix_prompt(request: &FixRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# FIX {} `{}`\n\n",
        request.tier.to_string().to_uppercase(),
        request.name
    ));
    prompt.push_str(&format_diagnostics_for_prompt(&request.diagnostics));
    prompt.push_str("## CURRENT SOURCE\n\n```tsx\n");
    prompt.push_str(request.code.trim_end());
    prompt.push_str("\n```\n\n");
    prompt.push_str("Return the complete corrected file. Keep the public exports unchanged.\n");

    prompt
}

/// Build the prompt for writing an artifact's story file
pub fn build_story_prompt(artifact: &ArtifactRecord, code: &str) -> String {
    format!(
        "# STORIES FOR `{name}`\n\n\
         Write a Storybook CSF3 stories file for the component below. \
         Import it with `import {{ {name} }} from \"./{name}\";` and cover its main variants.\n\n\
         ```tsx\n{code}\n```\n",
        name = artifact.name,
        code = code.trim_end()
    )
}

/// Format diagnostics as a prompt section
pub fn format_diagnostics_for_prompt(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }

    let mut output = String::from("## ERRORS TO FIX\n\n```\n");
    for line in diagnostics {
        output.push_str(line);
        output.push('\n');
    }
    output.push_str("```\n\n");
    output
}

/// Pull the code out of a model response
///
/// Takes the first fenced block (any language tag). Unfenced responses are
/// returned trimmed; an empty response yields `None`.
pub fn extract_code_block(output: &str) -> Option<String> {
    if let Some(start) = output.find("```") {
        let after_fence = &output[start + 3..];
        // Skip the language tag line
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let code = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let code = code.trim_end();
        return if code.trim().is_empty() {
            None
        } else {
            Some(format!("{}\n", code))
        };
    }

    let trimmed = output.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{}\n", trimmed))
    }
}
