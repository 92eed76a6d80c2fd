//! In-memory `DbProvider` for tests of the crates built on this one.

use crate::portal_dbprovider::{DbError, DbProvider};
use crate::portal_entities::{
    HealthcenterEntity, MammographyImageEntity, MammographyRecord, MammographySeriesEntity,
    MammographyStudyEntity, NewUser, SavedImageIds, UserEntity,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct MemoryTables {
    users: BTreeMap<String, UserEntity>,
    studies: BTreeMap<String, MammographyStudyEntity>,
    next_id: i32,
}

impl MemoryTables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// `DbProvider` over plain maps, with the same upsert-by-UID rules as Postgres.
#[derive(Default)]
pub struct InMemoryDb {
    tables: Mutex<MemoryTables>,
}

impl InMemoryDb {
    pub fn image_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap()
            .studies
            .values()
            .flat_map(|s| s.series.iter())
            .map(|s| s.images.len())
            .sum()
    }

    pub fn insert_study(&self, study: MammographyStudyEntity) {
        self.tables
            .lock()
            .unwrap()
            .studies
            .insert(study.study_instance_uid.clone(), study);
    }
}

#[async_trait]
impl DbProvider for InMemoryDb {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn register_user(
        &self,
        user: &NewUser,
        healthcenter: Option<&str>,
    ) -> Result<UserEntity, DbError> {
        let mut tables = self.tables.lock().unwrap();
        let healthcenter = match healthcenter {
            Some(name) => Some(HealthcenterEntity {
                id: tables.next_id(),
                name: name.to_string(),
                authorized: false,
            }),
            None => None,
        };
        let entity = UserEntity {
            id: tables.next_id(),
            uid: user.uid.clone(),
            title: user.title.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            dni: user.dni.clone(),
            address: user.address.clone(),
            healthcenter,
        };
        tables.users.insert(user.uid.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_user_by_uid(&self, uid: &str) -> Result<Option<UserEntity>, DbError> {
        Ok(self.tables.lock().unwrap().users.get(uid).cloned())
    }

    async fn delete_user_by_uid(&self, uid: &str) -> Result<bool, DbError> {
        Ok(self.tables.lock().unwrap().users.remove(uid).is_some())
    }

    async fn save_mammography_record(
        &self,
        record: &MammographyRecord,
    ) -> Result<SavedImageIds, DbError> {
        let mut guard = self.tables.lock().unwrap();
        let tables = &mut *guard;
        let study_uid = record.study.study_instance_uid.clone();
        if !tables.studies.contains_key(&study_uid) {
            let id = tables.next_id();
            tables.studies.insert(
                study_uid.clone(),
                MammographyStudyEntity {
                    id,
                    study_instance_uid: study_uid.clone(),
                    patient_id: String::new(),
                    patient_name: String::new(),
                    study_date: record.study.study_date,
                    description: None,
                    modality: String::new(),
                    series: vec![],
                },
            );
        }
        let series_id_candidate = tables.next_id();
        let image_id_candidate = tables.next_id();
        let Some(study) = tables.studies.get_mut(&study_uid) else {
            return Err(DbError::TransactionFailed("study vanished".to_string()));
        };
        study.patient_id = record.study.patient_id.clone();
        study.patient_name = record.study.patient_name.clone();
        study.study_date = record.study.study_date;
        study.modality = record.study.modality.clone();
        if record.study.description.is_some() {
            study.description = record.study.description.clone();
        }

        let series_uid = &record.series.series_instance_uid;
        let series_idx = match study
            .series
            .iter()
            .position(|s| &s.series_instance_uid == series_uid)
        {
            Some(idx) => idx,
            None => {
                study.series.push(MammographySeriesEntity {
                    id: series_id_candidate,
                    series_instance_uid: series_uid.clone(),
                    laterality: record.series.laterality,
                    view_position: None,
                    series_description: None,
                    images: vec![],
                });
                study.series.len() - 1
            }
        };
        let series = &mut study.series[series_idx];
        series.laterality = record.series.laterality;
        series.view_position = record.series.view_position;
        if record.series.series_description.is_some() {
            series.series_description = record.series.series_description.clone();
        }

        let image = MammographyImageEntity {
            id: image_id_candidate,
            sop_instance_uid: record.image.sop_instance_uid.clone(),
            image_url: record.image.image_url.clone(),
            original_metadata: Some(record.image.original_metadata.clone()),
            processed_metadata: Some(record.image.processed_metadata.clone()),
        };
        let image_id = match series
            .images
            .iter_mut()
            .find(|i| i.sop_instance_uid == image.sop_instance_uid)
        {
            Some(existing) => {
                let id = existing.id;
                *existing = MammographyImageEntity { id, ..image };
                id
            }
            None => {
                let id = image.id;
                series.images.push(image);
                id
            }
        };
        Ok(SavedImageIds {
            study_id: study.id,
            series_id: series.id,
            image_id,
        })
    }

    async fn get_study(
        &self,
        study_instance_uid: &str,
    ) -> Result<Option<MammographyStudyEntity>, DbError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .studies
            .get(study_instance_uid)
            .cloned())
    }

    async fn delete_study(&self, study_instance_uid: &str) -> Result<bool, DbError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .studies
            .remove(study_instance_uid)
            .is_some())
    }
}
