//! Prompt assembly with context governance.
//!
//! The user question is never shortened. When the full prompt exceeds the
//! configured length, only the retrieved context is cut and marked with
//! `[Context truncated]`.

use super::types::SourceRef;

pub const TRUNCATION_MARKER: &str = "[Context truncated]";

const PROMPT_HEADER: &str = "Based on the following context, please answer the question. \
If the context doesn't contain enough information to answer the question, say so.\n\nContext:\n";

/// A prompt ready for the generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub truncated: bool,
    /// How many leading sources reached the prompt with at least part of their content
    pub sources_used: usize,
}

const SEPARATOR: &str = "\n\n---\n\n";

fn source_header(source: &SourceRef) -> String {
    format!("Source: {}\n", source.title)
}

/// Join sources under `Source: {title}` headers.
pub fn build_context(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|s| format!("{}{}", source_header(s), s.content))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

fn question_part(question: &str) -> String {
    format!("\n\nQuestion: {}\n\nAnswer:", question)
}

/// Sources whose header and first content character fit in `budget`
/// context characters, and where the kept context should end.
fn fit_sources(sources: &[SourceRef], budget: usize) -> (usize, usize) {
    let separator = SEPARATOR.chars().count();
    let mut offset = 0;
    let mut end = 0;
    let mut used = 0;

    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            offset += separator;
        }
        let header = source_header(source).chars().count();
        if offset + header >= budget {
            break;
        }
        offset += header + source.content.chars().count();
        end = offset.min(budget);
        used += 1;
    }
    (used, end)
}

/// Assemble the prompt, truncating the context to fit `max_length` characters.
///
/// Sources that would only contribute a partial header are left out
/// entirely and not counted in `sources_used`.
pub fn build_prompt(question: &str, sources: &[SourceRef], max_length: usize) -> Prompt {
    let tail = question_part(question);
    let context = build_context(sources);
    let full = format!("{}{}{}", PROMPT_HEADER, context, tail);
    if full.chars().count() <= max_length {
        return Prompt {
            text: full,
            truncated: false,
            sources_used: sources.len(),
        };
    }

    let marker = format!("\n{}", TRUNCATION_MARKER);
    let fixed = PROMPT_HEADER.chars().count() + tail.chars().count() + marker.chars().count();
    let available = max_length.saturating_sub(fixed);
    let (sources_used, end) = fit_sources(sources, available);
    let kept: String = context.chars().take(end).collect();

    tracing::debug!(
        max_length,
        context_chars = context.chars().count(),
        kept_chars = end,
        sources_used,
        "Truncated prompt context"
    );

    Prompt {
        text: format!("{}{}{}{}", PROMPT_HEADER, kept.trim_end(), marker, tail),
        truncated: true,
        sources_used,
    }
}

/// System instructions for grounded answering.
pub fn system_prompt(low_confidence: bool) -> String {
    let mut prompt = String::from(
        "You are a knowledge assistant answering from the user's knowledge bases.\n\n",
    );

    if low_confidence {
        prompt.push_str(
            "Note: the retrieved passages are only loosely related to the question. \
             Be explicit about what they do and do not state.\n\n",
        );
    }

    prompt.push_str(
        "Instructions:\n\
         - Answer only from the provided context\n\
         - Name the source title when a fact comes from a specific source\n\
         - If the context does not contain the answer, say that the knowledge base lacks the information\n\
         - Keep the answer concise and factual\n",
    );
    prompt
}
