use crate::error::{Result, TermbaseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The root branch. Every other branch descends from it.
pub const MAIN: &str = "MAIN";

/// A hierarchical branch path such as `MAIN/PROJECT/TASK`.
///
/// The underscore is reserved as the flat-path separator in the document
/// store, so it may not appear in a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchPath(String);

impl BranchPath {
    pub fn new(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(TermbaseError::InvalidPath(
                path.to_string(),
                "path must not be empty".to_string(),
            ));
        }
        if path.contains('_') {
            return Err(TermbaseError::InvalidPath(
                path.to_string(),
                "path may not contain the underscore character".to_string(),
            ));
        }
        if path.split('/').any(|segment| segment.is_empty()) {
            return Err(TermbaseError::InvalidPath(
                path.to_string(),
                "path segments must not be empty".to_string(),
            ));
        }
        Ok(BranchPath(path.to_string()))
    }

    pub fn root() -> Self {
        BranchPath(MAIN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for paths without a parent (the root of a branch tree).
    pub fn is_root(&self) -> bool {
        !self.0.contains('/')
    }

    pub fn parent(&self) -> Option<BranchPath> {
        self.0
            .rfind('/')
            .map(|index| BranchPath(self.0[..index].to_string()))
    }

    /// This path followed by each ancestor up to the root.
    pub fn chain_to_root(&self) -> Vec<BranchPath> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    pub fn child(&self, segment: &str) -> Result<BranchPath> {
        BranchPath::new(&format!("{}/{}", self.0, segment))
    }
}

impl fmt::Display for BranchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchPath {
    type Err = TermbaseError;

    fn from_str(s: &str) -> Result<Self> {
        BranchPath::new(s)
    }
}
