use crate::portal_dbprovider::{DbError, DbProvider};
use crate::portal_entities::{
    HealthcenterEntity, Laterality, MammographyImageEntity, MammographyRecord,
    MammographySeriesEntity, MammographyStudyEntity, NewUser, SavedImageIds, UserEntity,
    ViewPosition,
};
use crate::portal_schema::SCHEMA_DDL;
use async_trait::async_trait;
use slog::{Logger, error, info};
use tokio_postgres::{Client, NoTls, Row};

#[derive(Debug, Clone)]
pub struct PgDbProvider {
    db_connection_string: String,
    log: Logger,
}

impl PgDbProvider {
    pub fn new(database_url: String, log: Logger) -> Self {
        Self {
            db_connection_string: database_url,
            log,
        }
    }

    async fn make_client(&self) -> Result<Client, DbError> {
        let (client, connection) =
            tokio_postgres::connect(self.db_connection_string.as_str(), NoTls)
                .await
                .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        let log = self.log.clone();
        // Spawn the connection processor
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(log, "Database connection error: {}", e);
            }
        });
        Ok(client)
    }

    fn user_from_row(row: &Row) -> UserEntity {
        let healthcenter = row
            .get::<_, Option<i32>>("hc_id")
            .map(|id| HealthcenterEntity {
                id,
                name: row.get::<_, Option<String>>("hc_name").unwrap_or_default(),
                authorized: row
                    .get::<_, Option<bool>>("hc_authorized")
                    .unwrap_or(false),
            });
        UserEntity {
            id: row.get("id"),
            uid: row.get("uid"),
            title: row.get("title"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            dni: row.get("dni"),
            address: row.get("address"),
            healthcenter,
        }
    }

    fn series_from_row(row: &Row) -> Result<MammographySeriesEntity, DbError> {
        let laterality_text: String = row.get("laterality");
        let laterality = Laterality::parse(&laterality_text).ok_or_else(|| {
            DbError::ExtractionFailed(format!("unknown laterality {}", laterality_text))
        })?;
        let view_position = row
            .get::<_, Option<String>>("view_position")
            .and_then(|v| ViewPosition::parse(&v));
        Ok(MammographySeriesEntity {
            id: row.get("id"),
            series_instance_uid: row.get("series_instance_uid"),
            laterality,
            view_position,
            series_description: row.get("series_description"),
            images: Vec::new(),
        })
    }
}

const SELECT_USER_BY_UID: &str = r#"
    SELECT u.id, u.uid, u.title, u.first_name, u.last_name, u.dni, u.address,
           h.id AS hc_id, h.name AS hc_name, h.authorized AS hc_authorized
    FROM users u
    LEFT JOIN healthcenters h ON h.id = u.healthcenter_id
    WHERE u.uid = $1
"#;

#[async_trait]
impl DbProvider for PgDbProvider {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        let client = self.make_client().await?;
        client.batch_execute(SCHEMA_DDL).await.map_err(|e| {
            error!(self.log, "Failed to create schema: {}", e);
            DbError::DatabaseError(e.to_string())
        })?;
        info!(self.log, "Portal schema is up to date");
        Ok(())
    }

    async fn register_user(
        &self,
        user: &NewUser,
        healthcenter: Option<&str>,
    ) -> Result<UserEntity, DbError> {
        let mut client = self.make_client().await?;
        let transaction = client.transaction().await.map_err(|e| {
            error!(self.log, "Failed to start transaction: {}", e);
            DbError::TransactionFailed(e.to_string())
        })?;

        let healthcenter_entity = match healthcenter {
            Some(name) => {
                let row = transaction
                    .query_one(
                        "INSERT INTO healthcenters (name, authorized) VALUES ($1, FALSE) RETURNING id",
                        &[&name],
                    )
                    .await
                    .map_err(|e| DbError::DatabaseError(e.to_string()))?;
                Some(HealthcenterEntity {
                    id: row.get(0),
                    name: name.to_string(),
                    authorized: false,
                })
            }
            None => None,
        };
        let healthcenter_id = healthcenter_entity.as_ref().map(|h| h.id);

        let row = transaction
            .query_one(
                r#"
                INSERT INTO users (uid, title, first_name, last_name, dni, address, healthcenter_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (uid)
                DO UPDATE SET
                    title = EXCLUDED.title,
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    dni = EXCLUDED.dni,
                    address = EXCLUDED.address,
                    healthcenter_id = COALESCE(EXCLUDED.healthcenter_id, users.healthcenter_id)
                RETURNING id
                "#,
                &[
                    &user.uid,
                    &user.title,
                    &user.first_name,
                    &user.last_name,
                    &user.dni,
                    &user.address,
                    &healthcenter_id,
                ],
            )
            .await
            .map_err(|e| {
                error!(self.log, "Error inserting user {}: {:?}", user.uid, e);
                DbError::DatabaseError(e.to_string())
            })?;

        transaction.commit().await.map_err(|e| {
            error!(self.log, "Error committing transaction: {:?}", e);
            DbError::TransactionFailed(e.to_string())
        })?;

        Ok(UserEntity {
            id: row.get(0),
            uid: user.uid.clone(),
            title: user.title.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            dni: user.dni.clone(),
            address: user.address.clone(),
            healthcenter: healthcenter_entity,
        })
    }

    async fn get_user_by_uid(&self, uid: &str) -> Result<Option<UserEntity>, DbError> {
        let client = self.make_client().await?;
        let row = client
            .query_opt(SELECT_USER_BY_UID, &[&uid])
            .await
            .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        Ok(row.as_ref().map(Self::user_from_row))
    }

    async fn delete_user_by_uid(&self, uid: &str) -> Result<bool, DbError> {
        let client = self.make_client().await?;
        let affected = client
            .execute("DELETE FROM users WHERE uid = $1", &[&uid])
            .await
            .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        Ok(affected > 0)
    }

    async fn save_mammography_record(
        &self,
        record: &MammographyRecord,
    ) -> Result<SavedImageIds, DbError> {
        let mut client = self.make_client().await?;
        let transaction = client.transaction().await.map_err(|e| {
            error!(self.log, "Failed to start transaction: {}", e);
            DbError::TransactionFailed(e.to_string())
        })?;

        let study = &record.study;
        let study_id: i32 = transaction
            .query_one(
                r#"
                INSERT INTO mammography_study (
                    study_instance_uid, patient_id, patient_name, study_date, description, modality
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (study_instance_uid)
                DO UPDATE SET
                    patient_id = EXCLUDED.patient_id,
                    patient_name = EXCLUDED.patient_name,
                    study_date = EXCLUDED.study_date,
                    description = COALESCE(EXCLUDED.description, mammography_study.description),
                    modality = EXCLUDED.modality
                RETURNING id
                "#,
                &[
                    &study.study_instance_uid,
                    &study.patient_id,
                    &study.patient_name,
                    &study.study_date,
                    &study.description,
                    &study.modality,
                ],
            )
            .await
            .map_err(|e| {
                error!(self.log, "Error saving study {}: {:?}", study.study_instance_uid, e);
                DbError::DatabaseError(e.to_string())
            })?
            .get(0);

        let series = &record.series;
        let view_position = series.view_position.map(|v| v.as_str());
        let series_id: i32 = transaction
            .query_one(
                r#"
                INSERT INTO mammography_series (
                    series_instance_uid, laterality, view_position, series_description, study_id
                ) VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (series_instance_uid)
                DO UPDATE SET
                    laterality = EXCLUDED.laterality,
                    view_position = EXCLUDED.view_position,
                    series_description = COALESCE(EXCLUDED.series_description, mammography_series.series_description),
                    study_id = EXCLUDED.study_id
                RETURNING id
                "#,
                &[
                    &series.series_instance_uid,
                    &series.laterality.as_str(),
                    &view_position,
                    &series.series_description,
                    &study_id,
                ],
            )
            .await
            .map_err(|e| {
                error!(self.log, "Error saving series {}: {:?}", series.series_instance_uid, e);
                DbError::DatabaseError(e.to_string())
            })?
            .get(0);

        let image = &record.image;
        let image_id: i32 = transaction
            .query_one(
                r#"
                INSERT INTO mammography_image (
                    sop_instance_uid, image_url, original_metadata, processed_metadata, series_id
                ) VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (sop_instance_uid)
                DO UPDATE SET
                    image_url = EXCLUDED.image_url,
                    original_metadata = EXCLUDED.original_metadata,
                    processed_metadata = EXCLUDED.processed_metadata,
                    series_id = EXCLUDED.series_id
                RETURNING id
                "#,
                &[
                    &image.sop_instance_uid,
                    &image.image_url,
                    &image.original_metadata,
                    &image.processed_metadata,
                    &series_id,
                ],
            )
            .await
            .map_err(|e| {
                error!(self.log, "Error saving image {}: {:?}", image.sop_instance_uid, e);
                DbError::DatabaseError(e.to_string())
            })?
            .get(0);

        transaction.commit().await.map_err(|e| {
            error!(self.log, "Error committing transaction: {:?}", e);
            DbError::TransactionFailed(e.to_string())
        })?;

        Ok(SavedImageIds {
            study_id,
            series_id,
            image_id,
        })
    }

    async fn get_study(
        &self,
        study_instance_uid: &str,
    ) -> Result<Option<MammographyStudyEntity>, DbError> {
        let client = self.make_client().await?;
        let study_row = client
            .query_opt(
                r#"
                SELECT id, study_instance_uid, patient_id, patient_name, study_date, description, modality
                FROM mammography_study
                WHERE study_instance_uid = $1
                "#,
                &[&study_instance_uid],
            )
            .await
            .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        let study_row = match study_row {
            Some(row) => row,
            None => return Ok(None),
        };
        let study_id: i32 = study_row.get("id");

        let series_rows = client
            .query(
                r#"
                SELECT id, series_instance_uid, laterality, view_position, series_description
                FROM mammography_series
                WHERE study_id = $1
                ORDER BY id
                "#,
                &[&study_id],
            )
            .await
            .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        let mut series = series_rows
            .iter()
            .map(Self::series_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let series_ids: Vec<i32> = series.iter().map(|s| s.id).collect();
        if !series_ids.is_empty() {
            let image_rows = client
                .query(
                    r#"
                    SELECT id, sop_instance_uid, image_url, original_metadata, processed_metadata, series_id
                    FROM mammography_image
                    WHERE series_id = ANY($1)
                    ORDER BY id
                    "#,
                    &[&series_ids],
                )
                .await
                .map_err(|e| DbError::DatabaseError(e.to_string()))?;
            for row in &image_rows {
                let series_id: i32 = row.get("series_id");
                if let Some(owner) = series.iter_mut().find(|s| s.id == series_id) {
                    owner.images.push(MammographyImageEntity {
                        id: row.get("id"),
                        sop_instance_uid: row.get("sop_instance_uid"),
                        image_url: row.get("image_url"),
                        original_metadata: row.get("original_metadata"),
                        processed_metadata: row.get("processed_metadata"),
                    });
                }
            }
        }

        Ok(Some(MammographyStudyEntity {
            id: study_id,
            study_instance_uid: study_row.get("study_instance_uid"),
            patient_id: study_row.get("patient_id"),
            patient_name: study_row.get("patient_name"),
            study_date: study_row.get("study_date"),
            description: study_row.get("description"),
            modality: study_row.get("modality"),
            series,
        }))
    }

    async fn delete_study(&self, study_instance_uid: &str) -> Result<bool, DbError> {
        let client = self.make_client().await?;
        let affected = client
            .execute(
                "DELETE FROM mammography_study WHERE study_instance_uid = $1",
                &[&study_instance_uid],
            )
            .await
            .map_err(|e| DbError::DatabaseError(e.to_string()))?;
        Ok(affected > 0)
    }
}
