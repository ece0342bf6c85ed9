use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use super::{CriteriaError, CriteriaRegistry, CriteriaSet, Criterion, ScaleType};
use crate::workflows::judging::domain::Stage;

#[derive(Debug, thiserror::Error)]
pub enum CriteriaImportError {
    #[error("failed to read criteria export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid criteria CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("criteria row {row}: {reason}")]
    Row { row: usize, reason: String },
    #[error(transparent)]
    Criteria(#[from] CriteriaError),
}

/// Loads criteria exported by the admin configuration surface.
///
/// Expected header: `stage,id,name,description,scale,min,max,step,weight,required,category`.
/// A criterion used in several stages appears once per stage.
pub struct CriteriaImporter;

impl CriteriaImporter {
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        registry: &CriteriaRegistry,
    ) -> Result<Vec<Arc<CriteriaSet>>, CriteriaImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, registry)
    }

    /// Registers one version per stage present in the export, in pipeline order.
    pub fn from_reader<R: Read>(
        reader: R,
        registry: &CriteriaRegistry,
    ) -> Result<Vec<Arc<CriteriaSet>>, CriteriaImportError> {
        let grouped = parse_rows(reader)?;

        // All stages must pass before any version is frozen.
        for (stage, criteria) in &grouped {
            super::validate_criteria(*stage, criteria)?;
        }

        let mut registered = Vec::with_capacity(grouped.len());
        for (stage, criteria) in grouped {
            registered.push(registry.register_criteria(stage, criteria)?);
        }
        Ok(registered)
    }
}

fn parse_rows<R: Read>(reader: R) -> Result<BTreeMap<Stage, Vec<Criterion>>, CriteriaImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut grouped: BTreeMap<Stage, Vec<Criterion>> = BTreeMap::new();

    for (index, record) in csv_reader.deserialize::<CriterionRow>().enumerate() {
        // header is line 1
        let row_number = index + 2;
        let row = record?;
        let (stage, criterion) = row.into_criterion(row_number)?;
        grouped.entry(stage).or_default().push(criterion);
    }

    // A criterion listed under several stages is applicable to all of them.
    let mut applicability: BTreeMap<String, BTreeSet<Stage>> = BTreeMap::new();
    for (stage, criteria) in &grouped {
        for criterion in criteria {
            applicability
                .entry(criterion.id.clone())
                .or_default()
                .insert(*stage);
        }
    }
    for criteria in grouped.values_mut() {
        for criterion in criteria.iter_mut() {
            if let Some(stages) = applicability.get(&criterion.id) {
                criterion.stages = stages.clone();
            }
        }
    }

    Ok(grouped)
}

#[derive(Debug, Deserialize)]
struct CriterionRow {
    stage: String,
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    scale: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    min: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    max: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    step: Option<String>,
    weight: u8,
    required: String,
    #[serde(default)]
    category: String,
}

impl CriterionRow {
    fn into_criterion(self, row: usize) -> Result<(Stage, Criterion), CriteriaImportError> {
        let stage = Stage::parse(&self.stage).ok_or_else(|| CriteriaImportError::Row {
            row,
            reason: format!("unknown stage '{}'", self.stage),
        })?;

        let scale = match self.scale.trim().to_ascii_lowercase().as_str() {
            "numeric" | "range" => ScaleType::Numeric {
                min: parse_number(row, "min", self.min.as_deref())?,
                max: parse_number(row, "max", self.max.as_deref())?,
                step: match self.step.as_deref() {
                    Some(raw) => parse_number(row, "step", Some(raw))?,
                    None => 0.0,
                },
            },
            "boolean" | "bool" => ScaleType::Boolean,
            "text" | "free_text" => ScaleType::FreeText,
            other => {
                return Err(CriteriaImportError::Row {
                    row,
                    reason: format!("unknown scale '{other}'"),
                })
            }
        };

        let required = parse_flag(&self.required).ok_or_else(|| CriteriaImportError::Row {
            row,
            reason: format!("required flag '{}' is not yes/no", self.required),
        })?;

        Ok((
            stage,
            Criterion {
                id: self.id,
                name: self.name,
                description: self.description,
                stages: BTreeSet::from([stage]),
                scale,
                weight: self.weight,
                required,
                category: self.category,
            },
        ))
    }
}

fn parse_number(row: usize, column: &str, raw: Option<&str>) -> Result<f64, CriteriaImportError> {
    let raw = raw.ok_or_else(|| CriteriaImportError::Row {
        row,
        reason: format!("numeric criteria need a '{column}' value"),
    })?;
    raw.parse::<f64>().map_err(|_| CriteriaImportError::Row {
        row,
        reason: format!("'{raw}' in column '{column}' is not a number"),
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
