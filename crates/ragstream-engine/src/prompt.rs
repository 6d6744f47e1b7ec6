use ragstream_core::passage::RetrievedPassage;

pub const DEFAULT_TEMPLATE: &str = "You are an expert in spiritual answers. User has the following query. Answer the query: {query} . Also you have some additional context to give better answer: {context}";

const QUERY_SLOT: &str = "{query}";
const CONTEXT_SLOT: &str = "{context}";

/// Builds the generation prompt from a query and its retrieved passages.
#[derive(Clone, Debug)]
pub struct PromptComposer {
    template: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptComposer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitutes both slots in one pass, so placeholder text inside the
    /// query or the passages is never expanded.
    pub fn compose(&self, query: &str, passages: &[RetrievedPassage]) -> String {
        let context = context_block(passages);
        self.template
            .split(QUERY_SLOT)
            .map(|part| part.replace(CONTEXT_SLOT, &context))
            .collect::<Vec<_>>()
            .join(query)
    }
}

/// Passages trimmed, newlines flattened, empties dropped, joined by a space.
pub fn context_block(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| flatten_newlines(p.content.trim()))
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn flatten_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                out.push(' ');
            }
            in_break = true;
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out
}
