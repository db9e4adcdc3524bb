/// Technique trees attached to success criteria.
///
/// The published JSON nests techniques under several relation names (`techniques`,
/// `groups`, `using`, `and`) with slightly different shapes at each depth. They all
/// deserialize into [`RawTechnique`] and are folded into one uniform [`TechniqueNode`]
/// tree, so formatting is a single pre-order walk.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::null_as_default;
use crate::text::clean_text;

/// Every technique shape in the source, with all relations optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTechnique {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub techniques: Vec<RawTechnique>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<RawTechnique>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub using: Vec<RawTechnique>,
    #[serde(default, rename = "and", deserialize_with = "null_as_default")]
    pub and_: Vec<RawTechnique>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTechniques {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sufficient: Vec<RawTechnique>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub advisory: Vec<RawTechnique>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub failure: Vec<RawTechnique>,
    #[serde(default)]
    pub sufficient_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechniqueNode {
    pub id: Option<String>,
    pub title: Option<String>,
    pub suffix: Option<String>,
    pub children: Vec<TechniqueNode>,
}

impl From<RawTechnique> for TechniqueNode {
    fn from(raw: RawTechnique) -> Self {
        let children = raw
            .techniques
            .into_iter()
            .chain(raw.groups)
            .chain(raw.using)
            .chain(raw.and_)
            .map(TechniqueNode::from)
            .collect();
        Self {
            id: raw.id.filter(|s| !s.trim().is_empty()),
            title: raw.title.filter(|s| !s.trim().is_empty()),
            suffix: raw.suffix.filter(|s| !s.trim().is_empty()),
            children,
        }
    }
}

impl TechniqueNode {
    /// `id: title`, or the bare title; `None` for untitled grouping nodes.
    pub fn line(&self) -> Option<String> {
        let title = self.title.as_deref()?;
        let mut line = match &self.id {
            Some(id) => format!("{id}: {title}"),
            None => title.to_string(),
        };
        if let Some(suffix) = &self.suffix {
            line.push(' ');
            line.push_str(suffix);
        }
        Some(clean_text(&line))
    }

    /// Depth-first pre-order lines for this node and everything beneath it.
    pub fn flatten_into(&self, out: &mut Vec<String>) {
        if let Some(line) = self.line().filter(|l| !l.is_empty()) {
            out.push(line);
        }
        for child in &self.children {
            child.flatten_into(out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueCategory {
    Sufficient,
    Advisory,
    Failure,
    SufficientNote,
}

/// Categorized technique trees for one success criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechniqueTree {
    pub sufficient: Vec<TechniqueNode>,
    pub advisory: Vec<TechniqueNode>,
    pub failure: Vec<TechniqueNode>,
    pub sufficient_note: Option<String>,
}

impl From<RawTechniques> for TechniqueTree {
    fn from(raw: RawTechniques) -> Self {
        let convert = |items: Vec<RawTechnique>| -> Vec<TechniqueNode> {
            items.into_iter().map(TechniqueNode::from).collect()
        };
        Self {
            sufficient: convert(raw.sufficient),
            advisory: convert(raw.advisory),
            failure: convert(raw.failure),
            sufficient_note: raw.sufficient_note.filter(|s| !s.trim().is_empty()),
        }
    }
}

pub type TechniqueSummary = BTreeMap<TechniqueCategory, Vec<String>>;

impl TechniqueTree {
    /// Flatten every category into formatted lines. Categories that produce no lines are
    /// left out, so an empty tree gives an empty map.
    pub fn summary(&self) -> TechniqueSummary {
        let mut summary = TechniqueSummary::new();
        for (category, nodes) in [
            (TechniqueCategory::Sufficient, &self.sufficient),
            (TechniqueCategory::Advisory, &self.advisory),
            (TechniqueCategory::Failure, &self.failure),
        ] {
            let mut lines = Vec::new();
            for node in nodes {
                node.flatten_into(&mut lines);
            }
            if !lines.is_empty() {
                summary.insert(category, lines);
            }
        }
        if let Some(note) = self
            .sufficient_note
            .as_deref()
            .map(clean_text)
            .filter(|n| !n.is_empty())
        {
            summary.insert(TechniqueCategory::SufficientNote, vec![note]);
        }
        summary
    }
}
