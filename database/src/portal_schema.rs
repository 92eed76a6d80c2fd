/// Idempotent DDL for the portal tables.
pub const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS healthcenters (
    id          SERIAL PRIMARY KEY,
    name        VARCHAR(255) NOT NULL,
    authorized  BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS users (
    id              SERIAL PRIMARY KEY,
    uid             VARCHAR(255) NOT NULL UNIQUE,
    title           VARCHAR(255) NOT NULL,
    first_name      VARCHAR(255) NOT NULL,
    last_name       VARCHAR(255) NOT NULL,
    dni             VARCHAR(255) NOT NULL,
    address         VARCHAR(255) NOT NULL,
    healthcenter_id INTEGER REFERENCES healthcenters (id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS mammography_study (
    id                 SERIAL PRIMARY KEY,
    study_instance_uid VARCHAR(128) NOT NULL UNIQUE,
    patient_id         VARCHAR(64) NOT NULL,
    patient_name       VARCHAR(128) NOT NULL,
    study_date         TIMESTAMP NOT NULL,
    description        TEXT,
    modality           VARCHAR(2) NOT NULL DEFAULT 'MG'
);

CREATE TABLE IF NOT EXISTS mammography_series (
    id                  SERIAL PRIMARY KEY,
    series_instance_uid VARCHAR(128) NOT NULL UNIQUE,
    laterality          VARCHAR(1) NOT NULL CHECK (laterality IN ('R', 'L')),
    view_position       VARCHAR(3) CHECK (view_position IN ('CC', 'MLO')),
    series_description  TEXT,
    study_id            INTEGER NOT NULL REFERENCES mammography_study (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS mammography_image (
    id                 SERIAL PRIMARY KEY,
    sop_instance_uid   VARCHAR(128) NOT NULL UNIQUE,
    image_url          TEXT NOT NULL,
    original_metadata  JSONB,
    processed_metadata JSONB,
    series_id          INTEGER NOT NULL REFERENCES mammography_series (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_mammography_series_study ON mammography_series (study_id);
CREATE INDEX IF NOT EXISTS idx_mammography_image_series ON mammography_image (series_id);
"#;
