use crate::dicom_utils::is_dicom_uid;
use crate::extraction_error::MetadataError;
use chrono::NaiveDate;
use database::portal_entities::{
    ImageRecord, Laterality, MammographyRecord, SeriesRecord, StudyRecord, ViewPosition,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODALITY: &str = "MG";

/// Keys of the metadata document produced by the extractor.
pub mod keys {
    pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
    pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
    pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
    pub const PATIENT_ID: &str = "PatientID";
    pub const PATIENT_NAME: &str = "PatientName";
    pub const STUDY_DATE: &str = "StudyDate";
    pub const MODALITY: &str = "Modality";
    pub const IMAGE_LATERALITY: &str = "ImageLaterality";
    pub const VIEW_POSITION: &str = "ViewPosition";
}

fn text(metadata: &Value, key: &str) -> Option<String> {
    let value = match metadata.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    if value.is_empty() { None } else { Some(value) }
}

fn required(metadata: &Value, key: &'static str) -> Result<String, MetadataError> {
    text(metadata, key).ok_or(MetadataError::MissingField(key))
}

/// Identifiers of an extracted instance, needed before the row is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceUids {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

fn required_uid(metadata: &Value, key: &'static str) -> Result<String, MetadataError> {
    let uid = required(metadata, key)?;
    if !is_dicom_uid(&uid) {
        return Err(MetadataError::InvalidUid(key, uid));
    }
    Ok(uid)
}

/// UIDs end up in store URLs, row keys and log file names, so each must be a well-formed UI value.
pub fn instance_uids(metadata: &Value) -> Result<InstanceUids, MetadataError> {
    Ok(InstanceUids {
        study_instance_uid: required_uid(metadata, keys::STUDY_INSTANCE_UID)?,
        series_instance_uid: required_uid(metadata, keys::SERIES_INSTANCE_UID)?,
        sop_instance_uid: required_uid(metadata, keys::SOP_INSTANCE_UID)?,
    })
}

/// Map the extractor output onto study, series and image rows.
///
/// Missing UIDs, a StudyDate that is not `YYYYMMDD` and a laterality other than R/L are
/// rejected. Patient fields fall back to empty strings, an unknown view position is stored
/// as NULL and the modality defaults to `MG`.
pub fn build_record(metadata: &Value, image_url: &str) -> Result<MammographyRecord, MetadataError> {
    let uids = instance_uids(metadata)?;

    let raw_date = required(metadata, keys::STUDY_DATE)?;
    let study_date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| MetadataError::InvalidStudyDate(raw_date.clone()))?;

    let raw_laterality = text(metadata, keys::IMAGE_LATERALITY).unwrap_or_default();
    let laterality = Laterality::parse(&raw_laterality)
        .ok_or_else(|| MetadataError::InvalidLaterality(raw_laterality.clone()))?;

    let view_position =
        text(metadata, keys::VIEW_POSITION).and_then(|v| ViewPosition::parse(&v));
    let modality = text(metadata, keys::MODALITY).unwrap_or_else(|| DEFAULT_MODALITY.to_string());
    let patient_id = text(metadata, keys::PATIENT_ID).unwrap_or_default();
    let patient_name = text(metadata, keys::PATIENT_NAME).unwrap_or_default();

    let processed = json!({
        "studyInstanceUID": uids.study_instance_uid,
        "seriesInstanceUID": uids.series_instance_uid,
        "sopInstanceUID": uids.sop_instance_uid,
        "patientId": patient_id,
        "patientName": patient_name,
        "studyDate": study_date.format("%Y-%m-%d").to_string(),
        "modality": modality,
        "laterality": laterality.as_str(),
        "viewPosition": view_position.map(|v| v.as_str()),
    });

    Ok(MammographyRecord {
        study: StudyRecord {
            study_instance_uid: uids.study_instance_uid,
            patient_id,
            patient_name,
            study_date,
            description: None,
            modality,
        },
        series: SeriesRecord {
            series_instance_uid: uids.series_instance_uid,
            laterality,
            view_position,
            series_description: None,
        },
        image: ImageRecord {
            sop_instance_uid: uids.sop_instance_uid,
            image_url: image_url.to_string(),
            original_metadata: metadata.clone(),
            processed_metadata: processed,
        },
    })
}

/// Write the extracted metadata of one upload as pretty JSON text, `<dir>/<sop>.txt`.
pub async fn write_metadata_log(
    dir: &Path,
    sop_instance_uid: &str,
    metadata: &Value,
) -> std::io::Result<PathBuf> {
    if !is_dicom_uid(sop_instance_uid) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a DICOM UID: {}", sop_instance_uid),
        ));
    }
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.txt", sop_instance_uid));
    let text = serde_json::to_string_pretty(metadata)?;
    tokio::fs::write(&path, text).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Value {
        json!({
            "SOPInstanceUID": "1.2.3.4.5",
            "SeriesInstanceUID": "1.2.3.4",
            "StudyInstanceUID": "1.2.3",
            "PatientID": "PAT-001",
            "PatientName": "DOE^JANE",
            "StudyDate": "20240301",
            "Modality": "MG",
            "ImageLaterality": "L",
            "ViewPosition": "CC"
        })
    }

    #[test]
    fn complete_metadata_maps_to_all_rows() {
        let record = build_record(&sample_metadata(), "https://store/1").unwrap();
        assert_eq!(record.study.study_instance_uid, "1.2.3");
        assert_eq!(
            record.study.study_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(record.series.laterality, Laterality::Left);
        assert_eq!(record.series.view_position, Some(ViewPosition::CranioCaudal));
        assert_eq!(record.image.image_url, "https://store/1");
        assert_eq!(record.image.original_metadata, sample_metadata());
        assert_eq!(record.image.processed_metadata["laterality"], "L");
        assert_eq!(record.image.processed_metadata["studyDate"], "2024-03-01");
    }

    #[test]
    fn optional_fields_fall_back() {
        let mut metadata = sample_metadata();
        let map = metadata.as_object_mut().unwrap();
        map.remove("PatientID");
        map.remove("PatientName");
        map.remove("Modality");
        map.insert("ViewPosition".to_string(), json!("XCCL"));

        let record = build_record(&metadata, "u").unwrap();
        assert_eq!(record.study.patient_id, "");
        assert_eq!(record.study.patient_name, "");
        assert_eq!(record.study.modality, "MG");
        assert_eq!(record.series.view_position, None);
        assert!(record.image.processed_metadata["viewPosition"].is_null());
    }

    #[test]
    fn missing_uid_is_rejected() {
        let mut metadata = sample_metadata();
        metadata.as_object_mut().unwrap().remove("SeriesInstanceUID");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::MissingField("SeriesInstanceUID"))
        );

        let mut metadata = sample_metadata();
        metadata["SOPInstanceUID"] = json!("   ");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::MissingField("SOPInstanceUID"))
        );
    }

    #[test]
    fn path_like_uids_are_rejected() {
        let mut metadata = sample_metadata();
        metadata["SOPInstanceUID"] = json!("../../escaped");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::InvalidUid("SOPInstanceUID", "../../escaped".to_string()))
        );

        let mut metadata = sample_metadata();
        metadata["StudyInstanceUID"] = json!("1.2/../3");
        assert_eq!(
            instance_uids(&metadata),
            Err(MetadataError::InvalidUid("StudyInstanceUID", "1.2/../3".to_string()))
        );
    }

    #[test]
    fn bad_study_date_is_rejected() {
        let mut metadata = sample_metadata();
        metadata["StudyDate"] = json!("2024-03-01");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::InvalidStudyDate("2024-03-01".to_string()))
        );
    }

    #[test]
    fn laterality_other_than_r_or_l_is_rejected() {
        let mut metadata = sample_metadata();
        metadata["ImageLaterality"] = json!("B");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::InvalidLaterality("B".to_string()))
        );

        metadata.as_object_mut().unwrap().remove("ImageLaterality");
        assert_eq!(
            build_record(&metadata, "u"),
            Err(MetadataError::InvalidLaterality(String::new()))
        );
    }

    #[tokio::test]
    async fn metadata_log_is_written_as_text() {
        let dir = std::env::temp_dir().join(format!("portal-metadata-{}", std::process::id()));
        let path = write_metadata_log(&dir, "1.2.3.4.5", &sample_metadata())
            .await
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"SOPInstanceUID\": \"1.2.3.4.5\""));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn metadata_log_stays_inside_its_directory() {
        let root = std::env::temp_dir().join(format!("portal-escape-{}", std::process::id()));
        let dir = root.join("logs").join("metadata");
        let err = write_metadata_log(&dir, "../../escaped", &sample_metadata())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(!root.join("escaped.txt").exists());
        let _ = std::fs::remove_dir_all(&root);
    }
}
