//! Chargement des données initiales depuis les fichiers JSON statiques.
//!
//! Chaque fichier contient un objet avec une seule propriété dont la valeur
//! est le tableau des enregistrements, par exemple `{ "medicos": [...] }`.
//! Une collection n'est chargée que si sa clé est encore absente du stockage.

use std::{fs, io, path::Path};

use log::{error, info};
use serde_json::Value;
use thiserror::Error;

use crate::consts;
use crate::db::{Database, Record, StorageError};
use crate::models::{Doctor, Insurer, Slot, Specialty};

#[derive(Debug, Error)]
enum SeedError {
    #[error("lecture impossible: {0}")]
    Io(#[from] io::Error),
    #[error("JSON invalide: {0}")]
    Json(#[from] serde_json::Error),
    #[error("le fichier doit contenir un objet avec un tableau")]
    Shape,
    #[error("le tableau est vide")]
    Empty,
}

/// Charge toutes les collections absentes, puis sauvegarde une fois si
/// au moins un fichier a été chargé.
/// Retourne le nombre de collections chargées depuis un fichier.
pub fn seed(db: &mut Database, data_dir: &Path) -> Result<usize, StorageError> {
    let loaded = [
        seed_collection::<Doctor>(db, &data_dir.join(consts::DOCTORS_FILE)),
        seed_collection::<Insurer>(db, &data_dir.join(consts::INSURERS_FILE)),
        seed_collection::<Specialty>(db, &data_dir.join(consts::SPECIALTIES_FILE)),
        seed_collection::<Slot>(db, &data_dir.join(consts::SLOTS_FILE)),
    ]
    .into_iter()
    .filter(|&loaded| loaded)
    .count();

    // Sans nouvelle donnée, le fichier existant reste intact
    if loaded > 0 {
        db.flush()?;
    }
    Ok(loaded)
}

fn seed_collection<R: Record>(db: &mut Database, file: &Path) -> bool {
    if db.is_initialized::<R>() {
        info!("{} already present in storage", R::KEY);
        return false;
    }

    match read_records::<R>(file) {
        Ok(raw) => {
            info!("{}: loaded from {}", R::KEY, file.display());
            db.put_raw(R::KEY, raw);
            true
        }
        Err(e) => {
            error!("{}: cannot load {} ({e}), starting empty", R::KEY, file.display());
            db.put_raw(R::KEY, "[]".to_owned());
            false
        }
    }
}

fn read_records<R: Record>(file: &Path) -> Result<String, SeedError> {
    let document: Value = serde_json::from_str(&fs::read_to_string(file)?)?;

    let array = document
        .as_object()
        .and_then(|object| object.values().next())
        .ok_or(SeedError::Shape)?;

    // On vérifie que les enregistrements sont lisibles avant de les garder
    let records: Vec<R> = serde_json::from_value(array.clone())?;
    if records.is_empty() {
        return Err(SeedError::Empty);
    }

    Ok(serde_json::to_string(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_seed_loads_missing_collections() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            consts::SPECIALTIES_FILE,
            r#"{"especialidades": [{"id": 2, "nombre": "Pediatría"}, {"id": 1, "nombre": "Cardiología"}]}"#,
        );
        write(
            dir.path(),
            consts::INSURERS_FILE,
            r#"{"obrasSociales": [{"id": 1, "nombre": "OSDE", "porcentaje": 20, "activo": true}]}"#,
        );
        write(dir.path(), consts::SLOTS_FILE, r#"{"turnos": []}"#);

        let mut db = Database::in_memory();
        let loaded = seed(&mut db, dir.path()).unwrap();

        assert_eq!(loaded, 2);
        let specialties = db.list::<Specialty>();
        assert_eq!(specialties.len(), 2);
        assert_eq!(specialties[0].name, "Cardiología");
        assert_eq!(db.list::<Insurer>()[0].discount, 20.0);

        // Fichier absent ou tableau vide: collection initialisée mais vide
        assert!(db.is_initialized::<Doctor>());
        assert!(db.list::<Doctor>().is_empty());
        assert!(db.is_initialized::<Slot>());
    }

    #[test]
    fn test_seed_keeps_existing_collections() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            consts::SPECIALTIES_FILE,
            r#"{"especialidades": [{"id": 1, "nombre": "Cardiología"}]}"#,
        );

        let mut db = Database::in_memory();
        db.save(&[Specialty {
            id: RecordId::new(9),
            name: "Dermatología".to_owned(),
        }])
        .unwrap();

        seed(&mut db, dir.path()).unwrap();

        let specialties = db.list::<Specialty>();
        assert_eq!(specialties.len(), 1);
        assert_eq!(specialties[0].id, RecordId::new(9));
    }

    #[test]
    fn test_seed_rejects_malformed_records() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), consts::INSURERS_FILE, r#"{"obrasSociales": [{"id": "x"}]}"#);
        write(dir.path(), consts::SLOTS_FILE, r#"[1, 2, 3]"#);

        let mut db = Database::in_memory();
        assert_eq!(seed(&mut db, dir.path()).unwrap(), 0);
        assert!(db.list::<Insurer>().is_empty());
        assert!(db.list::<Slot>().is_empty());
    }

    #[test]
    fn test_seed_without_data_keeps_db_file() {
        let dir = TempDir::new().unwrap();
        let db_file = dir.path().join("galeno.json");
        fs::write(&db_file, "{ not json").unwrap();

        let mut db = Database::open(db_file.clone()).unwrap();
        assert_eq!(seed(&mut db, &dir.path().join("missing")).unwrap(), 0);

        assert_eq!(fs::read_to_string(&db_file).unwrap(), "{ not json");
    }

    #[test]
    fn test_seed_writes_loaded_collections() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            consts::SPECIALTIES_FILE,
            r#"{"especialidades": [{"id": 1, "nombre": "Cardiología"}]}"#,
        );
        let db_file = dir.path().join("galeno.json");

        let mut db = Database::open(db_file.clone()).unwrap();
        assert_eq!(seed(&mut db, dir.path()).unwrap(), 1);

        let reopened = Database::open(db_file).unwrap();
        assert_eq!(reopened.list::<Specialty>().len(), 1);
    }
}
