//! Creates the four hosted assistants from an instructions document and
//! records their ids in an env file.
//!
//! The document is markdown split into `## ` sections; each section's
//! heading line names the assistant and the rest is its instructions.

use crate::ai::client::{AssistantApi, AssistantDefinition, AssistantTool};
use crate::ai::prompts;
use crate::config::AssistantIds;
use crate::error::LabError;
use std::collections::HashMap;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const ENGINEER: (&str, &str) = ("Prompt Engineer", "Prompt Engineer Assistant");
const GENERATOR: (&str, &str) = ("Test Generator", "Test Generator Assistant");
const EVALUATOR: (&str, &str) = ("Evaluator", "Evaluator Assistant");
const EXECUTOR: (&str, &str) = ("Test Executor", "Test Executor Assistant");

/// Heading → body, both trimmed. Text before the first heading is ignored.
pub fn parse_instruction_sections(markdown: &str) -> HashMap<String, String> {
    markdown
        .split("## ")
        .skip(1)
        .filter(|section| !section.trim().is_empty())
        .map(|section| {
            let (title, body) = section.split_once('\n').unwrap_or((section, ""));
            (title.trim().to_string(), body.trim().to_string())
        })
        .collect()
}

async fn create(
    api: &dyn AssistantApi,
    (name, heading): (&str, &str),
    instructions: String,
    model: &str,
) -> Result<String, LabError> {
    let definition = AssistantDefinition {
        name: name.to_string(),
        instructions,
        model: model.to_string(),
        tools: vec![AssistantTool::CodeInterpreter],
    };
    let id = api.create_assistant(&definition).await?;
    log::info!("   -> {heading}: {id}");
    Ok(id)
}

/// The engineer, generator and evaluator sections are required. The executor
/// gets its instructions per run, so it falls back to the conciseness rule.
pub async fn provision_assistants(
    api: &dyn AssistantApi,
    sections: &HashMap<String, String>,
    model: &str,
) -> Result<AssistantIds, LabError> {
    let section = |heading: &str| {
        sections
            .get(heading)
            .filter(|body| !body.is_empty())
            .cloned()
            .ok_or_else(|| LabError::MissingInstructions(heading.to_string()))
    };
    let engineer = section(ENGINEER.1)?;
    let generator = section(GENERATOR.1)?;
    let evaluator = section(EVALUATOR.1)?;
    let executor = section(EXECUTOR.1).unwrap_or_else(|_| prompts::EXECUTOR_CONCISENESS.to_string());

    log::info!("🏗️  Creating assistants with model {model}");
    Ok(AssistantIds {
        prompt_engineer: create(api, ENGINEER, engineer, model).await?,
        test_generator: create(api, GENERATOR, generator, model).await?,
        evaluator: create(api, EVALUATOR, evaluator, model).await?,
        test_executor: create(api, EXECUTOR, executor, model).await?,
    })
}

/// Rewrites the assistant id lines of an env file, appending any that are
/// missing. Every other line is kept as is.
pub fn merge_env(existing: &str, ids: &AssistantIds) -> String {
    let entries = [
        ("PROMPT_ENGINEER_ASSISTANT_ID", &ids.prompt_engineer),
        ("TEST_GENERATOR_ASSISTANT_ID", &ids.test_generator),
        ("EVALUATOR_ASSISTANT_ID", &ids.evaluator),
        ("TEST_EXECUTOR_ASSISTANT_ID", &ids.test_executor),
    ];
    let mut written = [false; 4];

    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let key = line.split_once('=').map(|(k, _)| k.trim());
            match entries.iter().position(|(name, _)| Some(*name) == key) {
                Some(i) => {
                    written[i] = true;
                    format!("{}={}", entries[i].0, entries[i].1)
                }
                None => line.to_string(),
            }
        })
        .collect();

    for (i, (name, id)) in entries.iter().enumerate() {
        if !written[i] {
            lines.push(format!("{name}={id}"));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
