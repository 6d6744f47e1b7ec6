use serde::{Deserialize, Serialize};

/// A stored passage returned by similarity search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Page number (or point id) of the passage in the source document.
    #[serde(rename = "rank", alias = "pageNum")]
    pub page_num: u64,
    pub content: String,
    /// Similarity as reported by the index. Informational only.
    #[serde(default)]
    pub score: f32,
}

impl RetrievedPassage {
    pub fn new(page_num: u64, content: impl Into<String>) -> Self {
        Self {
            page_num,
            content: content.into(),
            score: 0.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_page_as_rank() {
        let p = RetrievedPassage::new(12, "Do your duty.").with_score(0.5);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["rank"], 12);
        assert_eq!(json["content"], "Do your duty.");
    }

    #[test]
    fn accepts_page_num_alias() {
        let p: RetrievedPassage =
            serde_json::from_str(r#"{"pageNum": 4, "content": "text"}"#).unwrap();
        assert_eq!(p.page_num, 4);
        assert_eq!(p.score, 0.0);
    }
}
