use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, GenerationStatus::Processing)
    }
}

impl FromStr for GenerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(GenerationStatus::Processing),
            "completed" => Ok(GenerationStatus::Completed),
            "failed" => Ok(GenerationStatus::Failed),
            other => anyhow::bail!("unknown generation status {other:?}"),
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Realistic,
    Artistic,
    Vintage,
    Modern,
}

impl Style {
    pub const ALL: [Style; 4] = [Style::Realistic, Style::Artistic, Style::Vintage, Style::Modern];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Realistic => "realistic",
            Style::Artistic => "artistic",
            Style::Vintage => "vintage",
            Style::Modern => "modern",
        }
    }
}

impl FromStr for Style {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Style::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown style {s:?}"))
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw `generations` row; status and style are plain text in the table.
#[derive(Debug, FromRow)]
pub struct GenerationRow {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub style: Option<String>,
    pub input_image_url: String,
    pub output_image_url: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub style: Option<Style>,
    pub input_image_url: String,
    pub output_image_url: Option<String>,
    pub status: GenerationStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl TryFrom<GenerationRow> for Generation {
    type Error = anyhow::Error;

    fn try_from(r: GenerationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            prompt: r.prompt,
            style: r.style.as_deref().map(str::parse::<Style>).transpose()?,
            input_image_url: r.input_image_url,
            output_image_url: r.output_image_url,
            status: r.status.parse::<GenerationStatus>()?,
            error_message: r.error_message,
            retry_count: r.retry_count,
            created_at: r.created_at,
            completed_at: r.completed_at,
        })
    }
}

/// Fields supplied when a generation is first recorded.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub user_id: i64,
    pub prompt: String,
    pub style: Option<Style>,
    pub input_image_url: String,
    pub retry_count: i32,
}

/// The only two writes a processing generation ever receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationUpdate {
    Completed { output_image_url: String },
    Failed { error_message: String },
}

impl GenerationUpdate {
    pub fn status(&self) -> GenerationStatus {
        match self {
            GenerationUpdate::Completed { .. } => GenerationStatus::Completed,
            GenerationUpdate::Failed { .. } => GenerationStatus::Failed,
        }
    }

    pub fn output_image_url(&self) -> Option<&str> {
        match self {
            GenerationUpdate::Completed { output_image_url } => Some(output_image_url),
            GenerationUpdate::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            GenerationUpdate::Completed { .. } => None,
            GenerationUpdate::Failed { error_message } => Some(error_message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, style: Option<&str>) -> GenerationRow {
        GenerationRow {
            id: 1,
            user_id: 2,
            prompt: "p".into(),
            style: style.map(Into::into),
            input_image_url: "/uploads/x.png".into(),
            output_image_url: None,
            status: status.into(),
            error_message: None,
            retry_count: 0,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    #[test]
    fn row_conversion_parses_enums() {
        let g = Generation::try_from(row("processing", Some("vintage"))).unwrap();
        assert_eq!(g.status, GenerationStatus::Processing);
        assert_eq!(g.style, Some(Style::Vintage));

        let g = Generation::try_from(row("failed", None)).unwrap();
        assert_eq!(g.style, None);
    }

    #[test]
    fn row_conversion_rejects_unknown_values() {
        assert!(Generation::try_from(row("queued", None)).is_err());
        assert!(Generation::try_from(row("processing", Some("cubist"))).is_err());
    }

    #[test]
    fn only_processing_is_non_terminal() {
        assert!(!GenerationStatus::Processing.is_terminal());
        assert!(GenerationStatus::Completed.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
    }

    #[test]
    fn update_carries_exactly_one_payload() {
        let done = GenerationUpdate::Completed {
            output_image_url: "/o.png".into(),
        };
        assert_eq!(done.status(), GenerationStatus::Completed);
        assert_eq!(done.output_image_url(), Some("/o.png"));
        assert_eq!(done.error_message(), None);

        let failed = GenerationUpdate::Failed {
            error_message: "boom".into(),
        };
        assert_eq!(failed.status(), GenerationStatus::Failed);
        assert_eq!(failed.output_image_url(), None);
        assert_eq!(failed.error_message(), Some("boom"));
    }
}
