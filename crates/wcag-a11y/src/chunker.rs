/// Flattening of a [`WcagSpec`] into retrievable chunks.
///
/// Each principle, guideline, success criterion and term becomes one self-describing
/// [`Chunk`]. Parent fields are copied in at build time so chunks can be stored and
/// embedded without the tree they came from.
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::model::{ConformanceLevel, Guideline, Principle, SuccessCriterion, Term, WcagSpec};
use crate::related::{find_related, RelatedPolicy};
use crate::technique::{TechniqueCategory, TechniqueSummary};
use crate::text::clean_text;

const REQUIREMENT_PHRASES: [&str; 7] = [
    "must be", "shall", "required", "should", "can be", "cannot", "must not",
];

static SENTENCE_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+[A-Z]").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Principle,
    Guideline,
    SuccessCriterion,
    Definition,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Principle => "principle",
            ChunkType::Guideline => "guideline",
            ChunkType::SuccessCriterion => "success_criterion",
            ChunkType::Definition => "definition",
        }
    }

    pub fn chunk_id(&self, source_id: &str) -> String {
        format!("{}_{source_id}", self.as_str())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            ChunkType::Principle,
            ChunkType::Guideline,
            ChunkType::SuccessCriterion,
            ChunkType::Definition,
        ]
        .into_iter()
        .find(|t| t.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub parent_id: String,
    pub parent_type: ChunkType,
    pub parent_num: String,
    pub parent_title: String,
}

/// Fields that only exist for one kind of chunk. The variant also carries the
/// serialized `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkBody {
    Principle {
        guidelines_count: usize,
        guideline_ids: Vec<String>,
    },
    Guideline {
        success_criteria_count: usize,
        success_criteria_ids: Vec<String>,
    },
    SuccessCriterion {
        principle_id: String,
        principle_num: String,
        principle_title: String,
        versions_applicable: Vec<String>,
        compliance_level: ConformanceLevel,
        techniques: TechniqueSummary,
        testing_requirements: Vec<String>,
        related_requirements: Vec<String>,
    },
    Definition {
        term: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub spec_version: String,
    pub id: String,
    pub num: String,
    pub title: String,
    /// Conformance level for criteria, the chunk type otherwise.
    pub level: String,
    pub description: String,
    pub full_context: String,
    #[serde(flatten)]
    pub parent: Option<ParentRef>,
    #[serde(flatten)]
    pub body: ChunkBody,
}

impl Chunk {
    pub fn chunk_type(&self) -> ChunkType {
        match self.body {
            ChunkBody::Principle { .. } => ChunkType::Principle,
            ChunkBody::Guideline { .. } => ChunkType::Guideline,
            ChunkBody::SuccessCriterion { .. } => ChunkType::SuccessCriterion,
            ChunkBody::Definition { .. } => ChunkType::Definition,
        }
    }

    /// Short heading shown next to a ranked result.
    pub fn display_title(&self) -> String {
        match &self.body {
            ChunkBody::Principle { .. } => format!("Principle {}: {}", self.num, self.title),
            ChunkBody::Guideline { .. } => format!("Guideline {}: {}", self.num, self.title),
            ChunkBody::SuccessCriterion { compliance_level, .. } => {
                format!("{} {} (Level {compliance_level})", self.num, self.title)
            }
            ChunkBody::Definition { term } => format!("Definition: {term}"),
        }
    }

    /// Text that gets embedded for retrieval: the full context, plus the sufficient
    /// technique lines for success criteria.
    pub fn embedding_text(&self) -> String {
        let mut text = self.full_context.clone();
        if let ChunkBody::SuccessCriterion { techniques, .. } = &self.body {
            for line in techniques.get(&TechniqueCategory::Sufficient).into_iter().flatten() {
                text.push('\n');
                text.push_str(line);
            }
        }
        text
    }
}

/// Build the full corpus for one specification version and check its integrity.
///
/// Order: each principle, then each of its guidelines followed by that guideline's
/// criteria, then all terms.
pub fn build_corpus(spec: &WcagSpec, policy: &RelatedPolicy) -> Result<Vec<Chunk>, AppError> {
    let related = find_related(spec, policy);
    let mut chunks = Vec::new();

    for principle in &spec.principles {
        chunks.push(principle_chunk(&spec.version, principle));
        for guideline in &principle.guidelines {
            chunks.push(guideline_chunk(&spec.version, principle, guideline));
            for sc in &guideline.successcriteria {
                let related_nums = related.get(&sc.id).cloned().unwrap_or_default();
                chunks.push(criterion_chunk(&spec.version, principle, guideline, sc, related_nums));
            }
        }
    }
    for term in &spec.terms {
        chunks.push(definition_chunk(&spec.version, term));
    }

    validate_corpus(&chunks)?;
    Ok(chunks)
}

fn principle_chunk(version: &str, principle: &Principle) -> Chunk {
    let title = clean_text(&principle.title);
    Chunk {
        chunk_id: ChunkType::Principle.chunk_id(&principle.id),
        spec_version: version.to_string(),
        id: principle.id.clone(),
        num: principle.num.clone(),
        full_context: format!("WCAG {version} Principle {}: {title}", principle.num),
        title,
        level: ChunkType::Principle.as_str().to_string(),
        description: clean_text(&principle.content),
        parent: None,
        body: ChunkBody::Principle {
            guidelines_count: principle.guidelines.len(),
            guideline_ids: principle.guidelines.iter().map(|g| g.id.clone()).collect(),
        },
    }
}

fn guideline_chunk(version: &str, principle: &Principle, guideline: &Guideline) -> Chunk {
    let title = clean_text(&guideline.title);
    let principle_title = clean_text(&principle.title);
    Chunk {
        chunk_id: ChunkType::Guideline.chunk_id(&guideline.id),
        spec_version: version.to_string(),
        id: guideline.id.clone(),
        num: guideline.num.clone(),
        full_context: format!(
            "WCAG {version} Guideline {}: {title} (under Principle {}: {principle_title})",
            guideline.num, principle.num
        ),
        title,
        level: ChunkType::Guideline.as_str().to_string(),
        description: clean_text(&guideline.content),
        parent: Some(ParentRef {
            parent_id: principle.id.clone(),
            parent_type: ChunkType::Principle,
            parent_num: principle.num.clone(),
            parent_title: principle_title,
        }),
        body: ChunkBody::Guideline {
            success_criteria_count: guideline.successcriteria.len(),
            success_criteria_ids: guideline
                .successcriteria
                .iter()
                .map(|sc| sc.id.clone())
                .collect(),
        },
    }
}

fn criterion_chunk(
    version: &str,
    principle: &Principle,
    guideline: &Guideline,
    sc: &SuccessCriterion,
    related_requirements: Vec<String>,
) -> Chunk {
    let title = clean_text(&sc.title);
    let description = clean_text(&sc.content);
    Chunk {
        chunk_id: ChunkType::SuccessCriterion.chunk_id(&sc.id),
        spec_version: version.to_string(),
        id: sc.id.clone(),
        num: sc.num.clone(),
        full_context: format!(
            "WCAG {version} Success Criterion {} {title} (Level {}): {description}",
            sc.num, sc.level
        ),
        title,
        level: sc.level.as_str().to_string(),
        description,
        parent: Some(ParentRef {
            parent_id: guideline.id.clone(),
            parent_type: ChunkType::Guideline,
            parent_num: guideline.num.clone(),
            parent_title: clean_text(&guideline.title),
        }),
        body: ChunkBody::SuccessCriterion {
            principle_id: principle.id.clone(),
            principle_num: principle.num.clone(),
            principle_title: clean_text(&principle.title),
            versions_applicable: sc.versions.clone(),
            compliance_level: sc.level,
            techniques: sc.techniques.summary(),
            testing_requirements: testing_requirements(&sc.content),
            related_requirements,
        },
    }
}

fn definition_chunk(version: &str, term: &Term) -> Chunk {
    let name = clean_text(&term.name);
    let definition = clean_text(&term.definition);
    Chunk {
        chunk_id: ChunkType::Definition.chunk_id(&term.id),
        spec_version: version.to_string(),
        id: term.id.clone(),
        num: String::new(),
        title: name.clone(),
        level: ChunkType::Definition.as_str().to_string(),
        full_context: format!("WCAG {version} Definition: {name}. {definition}"),
        description: definition,
        parent: None,
        body: ChunkBody::Definition { term: name },
    }
}

/// Sentences of the criterion that state a requirement.
///
/// Phrase-major: for every phrase, each sentence containing it is appended, so a
/// sentence matching two phrases appears twice.
pub fn testing_requirements(content: &str) -> Vec<String> {
    let text = clean_text(content);
    let sentences = split_sentences(&text);
    let lowered: Vec<String> = sentences.iter().map(|s| s.to_lowercase()).collect();
    let text_lower = text.to_lowercase();

    let mut found = Vec::new();
    for phrase in REQUIREMENT_PHRASES {
        if !text_lower.contains(phrase) {
            continue;
        }
        for (sentence, lower) in sentences.iter().zip(&lowered) {
            if lower.contains(phrase) {
                found.push(sentence.to_string());
            }
        }
    }
    found
}

/// Split after `.`, `!` or `?` when whitespace and an uppercase ASCII letter follow.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_BREAK_RE.find_iter(text) {
        sentences.push(&text[start..m.start() + 1]);
        // The match ends with a single ASCII capital.
        start = m.end() - 1;
    }
    sentences.push(&text[start..]);
    sentences.retain(|s| !s.is_empty());
    sentences
}

/// Check that a corpus is internally consistent before anything is persisted.
pub fn validate_corpus(chunks: &[Chunk]) -> Result<(), AppError> {
    let mut ids = HashSet::with_capacity(chunks.len());
    let mut by_source: HashMap<(ChunkType, &str), &Chunk> = HashMap::with_capacity(chunks.len());
    for chunk in chunks {
        if !ids.insert(chunk.chunk_id.as_str()) {
            return Err(AppError::Integrity(format!("duplicate chunk id '{}'", chunk.chunk_id)));
        }
        by_source.insert((chunk.chunk_type(), chunk.id.as_str()), chunk);
    }

    for chunk in chunks {
        let expected_parent = match chunk.chunk_type() {
            ChunkType::Guideline => Some(ChunkType::Principle),
            ChunkType::SuccessCriterion => Some(ChunkType::Guideline),
            ChunkType::Principle | ChunkType::Definition => None,
        };
        match (expected_parent, &chunk.parent) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(AppError::Integrity(format!(
                    "chunk '{}' is a root but names a parent",
                    chunk.chunk_id
                )));
            }
            (Some(_), None) => {
                return Err(AppError::Integrity(format!(
                    "chunk '{}' has no parent",
                    chunk.chunk_id
                )));
            }
            (Some(expected), Some(parent)) => {
                if parent.parent_type != expected
                    || !by_source.contains_key(&(expected, parent.parent_id.as_str()))
                {
                    return Err(AppError::Integrity(format!(
                        "chunk '{}' references missing {} '{}'",
                        chunk.chunk_id,
                        expected.as_str(),
                        parent.parent_id
                    )));
                }
            }
        }

        if let ChunkBody::SuccessCriterion { principle_id, .. } = &chunk.body {
            if !by_source.contains_key(&(ChunkType::Principle, principle_id.as_str())) {
                return Err(AppError::Integrity(format!(
                    "chunk '{}' references missing principle '{principle_id}'",
                    chunk.chunk_id
                )));
            }
        }
    }
    Ok(())
}

/// SHA-256 over the serialized corpus, as lowercase hex.
pub fn corpus_digest(chunks: &[Chunk]) -> Result<String, AppError> {
    let bytes = serde_json::to_vec(chunks)
        .map_err(|e| AppError::Integrity(format!("corpus is not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
