use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;

/// Breast side of a mammography series, stored as `R` / `L`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Laterality {
    #[serde(rename = "R")]
    Right,
    #[serde(rename = "L")]
    Left,
}

impl Laterality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Laterality::Right => "R",
            Laterality::Left => "L",
        }
    }

    pub fn parse(value: &str) -> Option<Laterality> {
        match value.trim().to_uppercase().as_str() {
            "R" => Some(Laterality::Right),
            "L" => Some(Laterality::Left),
            _ => None,
        }
    }
}

impl Display for Laterality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Projection of a mammography view. Only CC and MLO are mirrored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewPosition {
    #[serde(rename = "CC")]
    CranioCaudal,
    #[serde(rename = "MLO")]
    MedioLateralOblique,
}

impl ViewPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewPosition::CranioCaudal => "CC",
            ViewPosition::MedioLateralOblique => "MLO",
        }
    }

    pub fn parse(value: &str) -> Option<ViewPosition> {
        match value.trim().to_uppercase().as_str() {
            "CC" => Some(ViewPosition::CranioCaudal),
            "MLO" => Some(ViewPosition::MedioLateralOblique),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcenterEntity {
    pub id: i32,
    pub name: String,
    pub authorized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: i32,
    pub uid: String,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub address: String,
    pub healthcenter: Option<HealthcenterEntity>,
}

/// Directory row created on local registration. `uid` comes from Firebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub uid: String,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub dni: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub study_instance_uid: String,
    pub patient_id: String,
    pub patient_name: String,
    pub study_date: NaiveDateTime,
    pub description: Option<String>,
    pub modality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_instance_uid: String,
    pub laterality: Laterality,
    pub view_position: Option<ViewPosition>,
    pub series_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub sop_instance_uid: String,
    pub image_url: String,
    pub original_metadata: Value,
    pub processed_metadata: Value,
}

/// Everything persisted for one uploaded DICOM instance.
/// Saved as a single transaction: study, series and image rows are upserted by UID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MammographyRecord {
    pub study: StudyRecord,
    pub series: SeriesRecord,
    pub image: ImageRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImageIds {
    pub study_id: i32,
    pub series_id: i32,
    pub image_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MammographyImageEntity {
    pub id: i32,
    #[serde(rename = "sopInstanceUID")]
    pub sop_instance_uid: String,
    pub image_url: String,
    pub original_metadata: Option<Value>,
    pub processed_metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MammographySeriesEntity {
    pub id: i32,
    #[serde(rename = "seriesInstanceUID")]
    pub series_instance_uid: String,
    pub laterality: Laterality,
    pub view_position: Option<ViewPosition>,
    pub series_description: Option<String>,
    pub images: Vec<MammographyImageEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MammographyStudyEntity {
    pub id: i32,
    #[serde(rename = "studyInstanceUID")]
    pub study_instance_uid: String,
    pub patient_id: String,
    pub patient_name: String,
    pub study_date: NaiveDateTime,
    pub description: Option<String>,
    pub modality: String,
    pub series: Vec<MammographySeriesEntity>,
}
