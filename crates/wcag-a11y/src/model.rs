/// In-memory model of one published WCAG version.
///
/// The source JSON nests principle → guideline → success criterion, with terms alongside.
/// Children are owned by their parent; the upward links are plain ids filled in after
/// parsing and resolved through [`WcagSpec`] lookups.
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::AppError;
use crate::technique::{RawTechniques, TechniqueTree};

#[derive(Debug, Clone, Deserialize)]
pub struct WcagSpec {
    /// Version tag the document was loaded as, e.g. "2.2". Not part of the JSON.
    #[serde(skip)]
    pub version: String,
    pub principles: Vec<Principle>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Principle {
    pub id: String,
    pub num: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub versions: Vec<String>,
    pub guidelines: Vec<Guideline>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Guideline {
    pub id: String,
    pub num: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub versions: Vec<String>,
    pub successcriteria: Vec<SuccessCriterion>,
    #[serde(skip)]
    pub principle_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessCriterion {
    pub id: String,
    pub num: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub handle: Option<String>,
    pub level: ConformanceLevel,
    pub versions: Vec<String>,
    #[serde(default, deserialize_with = "techniques_or_empty")]
    pub techniques: TechniqueTree,
    #[serde(skip)]
    pub guideline_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Term {
    pub id: String,
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
pub enum ConformanceLevel {
    A,
    AA,
    AAA,
    /// Criteria removed from the standard (4.1.1 Parsing in 2.2) keep an empty level.
    #[serde(rename = "")]
    Unassigned,
}

impl ConformanceLevel {
    /// The level as written in the source; empty for unassigned criteria.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConformanceLevel::A => "A",
            ConformanceLevel::AA => "AA",
            ConformanceLevel::AAA => "AAA",
            ConformanceLevel::Unassigned => "",
        }
    }
}

impl fmt::Display for ConformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treat an explicit `null` the same as an absent field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn techniques_or_empty<'de, D>(deserializer: D) -> Result<TechniqueTree, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: RawTechniques = null_as_default(deserializer)?;
    Ok(TechniqueTree::from(raw))
}

impl WcagSpec {
    /// Parse and validate a specification document.
    ///
    /// Missing required fields, unknown conformance levels, empty or duplicate ids are all
    /// reported as validation errors; nothing partially parsed escapes.
    pub fn from_json(version: &str, json: &str) -> Result<Self, AppError> {
        let mut spec: WcagSpec = serde_json::from_str(json).map_err(|e| {
            AppError::Validation(format!("WCAG {version} specification is malformed: {e}"))
        })?;
        spec.version = version.to_string();
        spec.link_parents();
        spec.validate()?;
        Ok(spec)
    }

    /// Read a specification file. A missing file is reported as not found.
    pub fn load(path: &Path, version: &str) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!(
                    "WCAG {version} specification ({})",
                    path.display()
                ))
            } else {
                AppError::Io(e)
            }
        })?;
        Self::from_json(version, &json)
    }

    fn link_parents(&mut self) {
        for principle in &mut self.principles {
            for guideline in &mut principle.guidelines {
                guideline.principle_id = principle.id.clone();
                for sc in &mut guideline.successcriteria {
                    sc.guideline_id = guideline.id.clone();
                }
            }
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut principle_ids = HashSet::new();
        let mut guideline_ids = HashSet::new();
        let mut criterion_ids = HashSet::new();
        let mut term_ids = HashSet::new();

        for principle in &self.principles {
            check_unique(&mut principle_ids, "principle", &principle.id, &principle.num)?;
            for guideline in &principle.guidelines {
                check_unique(&mut guideline_ids, "guideline", &guideline.id, &guideline.num)?;
                for sc in &guideline.successcriteria {
                    check_unique(&mut criterion_ids, "success criterion", &sc.id, &sc.num)?;
                }
            }
        }
        for term in &self.terms {
            if term.name.trim().is_empty() {
                return Err(AppError::Validation(format!("term '{}' has an empty name", term.id)));
            }
            check_unique(&mut term_ids, "term", &term.id, &term.name)?;
        }
        Ok(())
    }

    /// Every success criterion with its owning guideline and principle, in document order.
    pub fn success_criteria(
        &self,
    ) -> impl Iterator<Item = (&Principle, &Guideline, &SuccessCriterion)> + '_ {
        self.principles.iter().flat_map(|p| {
            p.guidelines
                .iter()
                .flat_map(move |g| g.successcriteria.iter().map(move |sc| (p, g, sc)))
        })
    }

    pub fn success_criterion(&self, id: &str) -> Option<&SuccessCriterion> {
        self.success_criteria().map(|(_, _, sc)| sc).find(|sc| sc.id == id)
    }

    pub fn criterion_count(&self) -> usize {
        self.success_criteria().count()
    }
}

fn check_unique<'a>(
    seen: &mut HashSet<&'a str>,
    kind: &str,
    id: &'a str,
    label: &str,
) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::Validation(format!("{kind} '{label}' has an empty id")));
    }
    if label.trim().is_empty() {
        return Err(AppError::Validation(format!("{kind} '{id}' has an empty number")));
    }
    if !seen.insert(id) {
        return Err(AppError::Validation(format!("duplicate {kind} id '{id}'")));
    }
    Ok(())
}
