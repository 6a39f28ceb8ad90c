//! Catálogo de encuestas: metadatos de solo lectura (títulos, opciones, imágenes, colores).
//!
//! Se inyecta en el estado de la aplicación; nunca se muta después de cargarse.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Número de opciones aceptadas para encuestas sin metadatos en el catálogo
pub const DEFAULT_CHOICE_COUNT: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: i32,
    pub label: String,
    pub image: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub choices: Vec<Choice>,
}

impl SurveyDefinition {
    pub fn choice(&self, choice_id: i64) -> Option<&Choice> {
        self.choices.iter().find(|c| i64::from(c.id) == choice_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    surveys: Vec<SurveyDefinition>,
}

#[derive(Debug, Clone)]
pub struct SurveyCatalog {
    reserved_survey_id: String,
    surveys: Vec<SurveyDefinition>,
}

impl SurveyCatalog {
    /// Catálogo por defecto: sólo la encuesta demo con cuatro fotos
    pub fn demo(reserved_survey_id: impl Into<String>) -> Self {
        let reserved_survey_id = reserved_survey_id.into();
        let demo = SurveyDefinition {
            id: reserved_survey_id.clone(),
            title: "Elige la foto que más te guste".to_string(),
            subtitle: Some("Toca una imagen para votar".to_string()),
            choices: vec![
                demo_choice(1, "Foto 1", "/images/photoOne.jpg", "#FFB7C5"),
                demo_choice(2, "Foto 2", "/images/photoTwo.jpg", "#87CEEB"),
                demo_choice(3, "Foto 3", "/images/photoThree.jpg", "#DEB887"),
                demo_choice(4, "Foto 4", "/images/photoFour.jpg", "#DEB887"),
            ],
        };

        Self {
            reserved_survey_id,
            surveys: vec![demo],
        }
    }

    pub fn new(reserved_survey_id: impl Into<String>, surveys: Vec<SurveyDefinition>) -> Result<Self> {
        let catalog = Self {
            reserved_survey_id: reserved_survey_id.into(),
            surveys,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Carga el catálogo desde JSON: `{ "surveys": [ { id, title, choices: [...] } ] }`
    pub fn from_json(reserved_survey_id: impl Into<String>, raw: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(raw).context("Catálogo de encuestas con formato inválido")?;
        Self::new(reserved_survey_id, file.surveys)
    }

    pub fn from_file(reserved_survey_id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer el catálogo {}", path.display()))?;
        Self::from_json(reserved_survey_id, &raw)
    }

    fn validate(&self) -> Result<()> {
        let mut survey_ids = HashSet::new();

        for survey in &self.surveys {
            if survey.id.trim().is_empty() {
                bail!("El catálogo contiene una encuesta sin id");
            }
            if !survey_ids.insert(survey.id.as_str()) {
                bail!("Encuesta duplicada en el catálogo: {}", survey.id);
            }
            if survey.choices.is_empty() {
                bail!("La encuesta {} no tiene opciones", survey.id);
            }

            let mut choice_ids = HashSet::new();
            for choice in &survey.choices {
                if choice.id < 1 {
                    bail!("La encuesta {} tiene una opción con id {} (< 1)", survey.id, choice.id);
                }
                if !choice_ids.insert(choice.id) {
                    bail!("Opción {} duplicada en la encuesta {}", choice.id, survey.id);
                }
            }
        }

        if self.reserved_survey().is_none() {
            bail!(
                "El catálogo debe describir la encuesta reservada '{}'",
                self.reserved_survey_id
            );
        }

        Ok(())
    }

    pub fn reserved_survey_id(&self) -> &str {
        &self.reserved_survey_id
    }

    pub fn is_reserved(&self, survey_id: &str) -> bool {
        self.reserved_survey_id == survey_id
    }

    pub fn reserved_survey(&self) -> Option<&SurveyDefinition> {
        self.survey(&self.reserved_survey_id)
    }

    pub fn survey(&self, survey_id: &str) -> Option<&SurveyDefinition> {
        self.surveys.iter().find(|s| s.id == survey_id)
    }

    pub fn surveys(&self) -> &[SurveyDefinition] {
        &self.surveys
    }

    pub fn choice(&self, survey_id: &str, choice_id: i64) -> Option<&Choice> {
        self.survey(survey_id).and_then(|s| s.choice(choice_id))
    }

    /// Encuestas descritas: sólo sus opciones. Resto: 1..=DEFAULT_CHOICE_COUNT.
    pub fn accepts_choice(&self, survey_id: &str, choice_id: i64) -> bool {
        match self.survey(survey_id) {
            Some(survey) => survey.choice(choice_id).is_some(),
            None => (1..=DEFAULT_CHOICE_COUNT).contains(&choice_id),
        }
    }

    /// Opciones válidas para mensajes de error: `1~4` si son contiguas, `1, 3` si no
    pub fn choice_range_label(&self, survey_id: &str) -> String {
        let mut ids: Vec<i64> = match self.survey(survey_id) {
            Some(survey) => survey.choices.iter().map(|c| i64::from(c.id)).collect(),
            None => (1..=DEFAULT_CHOICE_COUNT).collect(),
        };
        ids.sort_unstable();

        match (ids.first(), ids.last()) {
            (Some(&min), Some(&max)) if max - min + 1 == ids.len() as i64 => {
                format!("{}~{}", min, max)
            }
            _ => ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn demo_choice(id: i32, label: &str, image: &str, color: &str) -> Choice {
    Choice {
        id,
        label: label.to_string(),
        image: image.to_string(),
        color: color.to_string(),
    }
}
