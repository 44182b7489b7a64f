//! Prompt builders — structured oracle requests rendered into prompts.
//!
//! The core hands over an [`OracleRequest`] and never sees prompt text;
//! everything the backends receive is assembled here. Sampling parameters
//! vary by content kind: place descriptions can run warm and long,
//! one-line flavour stays short.

use wyrld_core::{ContentKind, OracleRequest};

use crate::types::CompletionRequest;

const NARRATOR_SYSTEM: &str = "You are the narrator of a grounded low-fantasy world. \
Write in second person, present tense, concrete and sensory. \
Never mention game mechanics, dice, or that you are generating content. \
Answer with prose only, no headings or lists.";

/// Render a structured request into a completion request.
#[must_use]
pub fn render(request: &OracleRequest, timeout_ms: u64) -> CompletionRequest {
    let (user, temperature, max_tokens) = match request.kind {
        ContentKind::Location => (location_prompt(request), 0.8, 220),
        ContentKind::Route => (route_prompt(request), 0.7, 120),
        ContentKind::NpcBio => (npc_prompt(request), 0.8, 180),
        ContentKind::AmbientFlavor => (ambient_prompt(request), 0.9, 80),
        ContentKind::Narration => (narration_prompt(request), 0.7, 260),
    };
    CompletionRequest {
        system: NARRATOR_SYSTEM.to_string(),
        user,
        temperature,
        max_tokens,
        timeout_ms,
    }
}

fn tags_clause(request: &OracleRequest) -> String {
    if request.tags.is_empty() {
        String::new()
    } else {
        format!(" Setting tags: {}.", request.tags.join(", "))
    }
}

fn location_prompt(request: &OracleRequest) -> String {
    let chain = if request.context.is_empty() {
        "the open world".to_string()
    } else {
        request.context.join(" > ")
    };
    format!(
        "Describe the location \"{}\" in 2-3 sentences. \
         It sits within: {chain}.{} \
         Mention at least one thing a visitor could act on.",
        request.keyword,
        tags_clause(request),
    )
}

fn route_prompt(request: &OracleRequest) -> String {
    format!(
        "Describe, in one or two sentences, the way between {}.{} \
         Focus on what travel along it feels like.",
        request.context.join(" and "),
        tags_clause(request),
    )
}

fn npc_prompt(request: &OracleRequest) -> String {
    format!(
        "Write a 2-sentence biography for \"{}\", who belongs to {}.{} \
         Give them one want and one flaw.",
        request.keyword,
        if request.context.is_empty() {
            "nowhere in particular".to_string()
        } else {
            request.context.join(", ")
        },
        tags_clause(request),
    )
}

fn ambient_prompt(request: &OracleRequest) -> String {
    format!(
        "In one sentence, narrate this happening: \"{}\" at {}.{}",
        request.keyword,
        request.context.join(", "),
        tags_clause(request),
    )
}

fn narration_prompt(request: &OracleRequest) -> String {
    format!(
        "The player acts: \"{}\". Current scene: {}.{} \
         Narrate the outcome in 2-4 sentences. Stay consequential but fair.",
        request.keyword,
        request.context.join("; "),
        tags_clause(request),
    )
}
