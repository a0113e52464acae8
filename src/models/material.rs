use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One worksheet / unit document and its extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialText {
    /// Stable across runs: derived from the relative directory and file name.
    pub id: String,
    pub title: String,
    /// Empty when extraction failed. Still evaluated.
    pub text: String,
    /// Unit / grouping label (first directory below the collection root).
    pub group: String,
    pub path: PathBuf,
}

impl MaterialText {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            group: String::new(),
            path: PathBuf::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}
