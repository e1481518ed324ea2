//! Prompt assembly for retrieval-grounded answers.
//!
//! Prompts have a fixed shape: role framing, kind-specific guidance, the
//! retrieved context, the question, and a closing instruction to cite sources.

use crate::model::QueryKind;
use crate::search::SearchMatch;

/// Text substituted for the context block when retrieval finds nothing.
pub const EMPTY_CONTEXT: &str = "No relevant information found in the knowledge base.";

const ROLE_FRAMING: &str = "You are an assistant for policy and compliance questions, \
answering from the company's knowledge base.";

const CITE_INSTRUCTION: &str = "Answer based on the context above. If the context does \
not contain enough information to answer, say so. When your answer draws on a source, \
mention which source it comes from.";

/// Render the retrieved chunks into a numbered context block.
pub fn compose_context(matches: &[SearchMatch], max_sources: usize) -> String {
    if matches.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    let mut context = String::new();
    for (index, hit) in matches.iter().take(max_sources).enumerate() {
        if index > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&format!(
            "[Source {}: {} ({})]\n{}",
            index + 1,
            hit.filename,
            hit.category,
            hit.text
        ));
    }
    context
}

fn kind_instruction(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::General => "Give a clear, accurate answer to the question.",
        QueryKind::Policy => {
            "Focus on internal policy requirements and name the specific policies involved."
        }
        QueryKind::Regulation => {
            "Focus on regulatory requirements and name the specific regulations involved."
        }
        QueryKind::Compliance => {
            "Focus on compliance obligations, required procedures, and potential risks."
        }
    }
}

/// Build the full generation prompt for a query.
pub fn build_prompt(kind: QueryKind, context: &str, query: &str) -> String {
    format!(
        "{ROLE_FRAMING}\n\n\
         {}\n\n\
         Context:\n{context}\n\n\
         Question: {query}\n\n\
         {CITE_INSTRUCTION}\n\nAnswer:",
        kind_instruction(kind)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(filename: &str, text: &str) -> SearchMatch {
        SearchMatch {
            document_id: "doc".into(),
            chunk_id: "doc_chunk_0".into(),
            text: text.into(),
            score: 0.9,
            filename: filename.into(),
            category: "policies".into(),
        }
    }

    #[test]
    fn empty_matches_use_placeholder_context() {
        assert_eq!(compose_context(&[], 5), EMPTY_CONTEXT);
    }

    #[test]
    fn context_is_capped_at_max_sources() {
        let matches: Vec<_> = (0..8)
            .map(|i| hit(&format!("doc{i}.txt"), "body"))
            .collect();
        let context = compose_context(&matches, 5);
        assert!(context.contains("[Source 5:"));
        assert!(!context.contains("[Source 6:"));
    }

    #[test]
    fn prompt_contains_context_question_and_instruction() {
        let prompt = build_prompt(QueryKind::Policy, "some context", "what is required?");
        assert!(prompt.contains("some context"));
        assert!(prompt.contains("Question: what is required?"));
        assert!(prompt.contains("internal policy requirements"));
    }

    #[test]
    fn every_kind_frames_role_and_asks_for_citations() {
        for kind in [
            QueryKind::General,
            QueryKind::Policy,
            QueryKind::Regulation,
            QueryKind::Compliance,
        ] {
            let prompt = build_prompt(kind, "ctx", "q");
            assert!(prompt.starts_with("You are"), "{kind:?} lacks role framing");
            assert!(
                prompt.contains("mention which source it comes from"),
                "{kind:?} lacks the cite instruction"
            );
            // Fixed section order: role, guidance, context, question, citation.
            let context_at = prompt.find("Context:").unwrap();
            let question_at = prompt.find("Question:").unwrap();
            let cite_at = prompt.find("mention which source").unwrap();
            assert!(context_at < question_at && question_at < cite_at);
        }
    }
}
