//! Stockage clé-valeur des collections, avec sauvegarde en JSON
//!
//! Chaque collection est rangée sous une clé fixe, sous forme de tableau
//! JSON sérialisé. Le document complet est écrit dans un seul fichier.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, ErrorKind::NotFound, Write},
    path::{Path, PathBuf},
};

use log::{error, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::models::RecordId;

/// Un type d'enregistrement stocké dans sa propre collection.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Clé de la collection dans le stockage
    const KEY: &'static str;

    fn id(&self) -> RecordId;

    /// Ordre naturel de la collection (nom, date, ...)
    fn natural_cmp(&self, other: &Self) -> Ordering;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Stockage indisponible: {0}")]
    Unavailable(#[from] io::Error),
    #[error("Impossible de sérialiser la collection {key}: {source}")]
    Serialize {
        key: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize, Default)]
pub struct Database {
    #[serde(skip)]
    path: Option<PathBuf>,
    /// Collections sérialisées, indexées par leur clé
    #[serde(default)]
    entries: BTreeMap<String, String>,
    /// Plus grand identifiant jamais distribué par collection
    #[serde(default)]
    sequences: BTreeMap<String, u32>,
}

/// Un ensemble de collections à remplacer en une seule écriture.
#[derive(Default)]
pub struct Batch {
    entries: Vec<(&'static str, String)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<R: Record>(&mut self, records: &[R]) -> Result<&mut Self, StorageError> {
        let serialized = serialize(records)?;
        self.entries.retain(|(key, _)| *key != R::KEY);
        self.entries.push((R::KEY, serialized));
        Ok(self)
    }
}

fn serialize<R: Record>(records: &[R]) -> Result<String, StorageError> {
    serde_json::to_string(records).map_err(|source| StorageError::Serialize {
        key: R::KEY,
        source,
    })
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self, io::Error> {
        match File::open(&path) {
            Ok(f) => {
                let mut db = match serde_json::from_reader::<_, Self>(f) {
                    Ok(db) => db,
                    // Document illisible: on repart à vide sans écraser le fichier
                    Err(e) => {
                        error!("DB file {} is unreadable ({e}), starting empty", path.display());
                        Database::default()
                    }
                };
                db.path = Some(path);
                Ok(db)
            }

            Err(not_found) if not_found.kind() == NotFound => {
                info!("DB file not found, creating new empty DB");
                let mut new_db = Database::default();
                new_db.path = Some(path);

                // On vérifie la sauvegarde immédiatement pour diminuer le risque de perte de données
                new_db.flush()?;
                Ok(new_db)
            }

            Err(other) => Err(other),
        }
    }

    /// Un stockage sans fichier associé
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Écrit le document complet dans un fichier temporaire, puis le renomme,
    /// pour que le fichier sur disque soit toujours un état complet.
    pub fn flush(&self) -> Result<(), io::Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)
    }

    pub fn is_initialized<R: Record>(&self) -> bool {
        self.entries.contains_key(R::KEY)
    }

    /// Toute la collection, dans son ordre naturel. Un contenu illisible
    /// est traité comme une collection vide.
    pub fn list<R: Record>(&self) -> Vec<R> {
        let Some(raw) = self.entries.get(R::KEY) else {
            return Vec::new();
        };

        match serde_json::from_str::<Vec<R>>(raw) {
            Ok(mut records) => {
                records.sort_by(R::natural_cmp);
                records
            }
            Err(e) => {
                warn!("Collection {} is unreadable, treated as empty: {e}", R::KEY);
                Vec::new()
            }
        }
    }

    /// Remplace toute la collection et sauvegarde
    pub fn save<R: Record>(&mut self, records: &[R]) -> Result<(), StorageError> {
        let mut batch = Batch::new();
        batch.put(records)?;
        self.commit(batch)
    }

    /// Applique toutes les collections du lot puis sauvegarde en une seule
    /// écriture. Si l'écriture échoue, l'état en mémoire est restauré.
    pub fn commit(&mut self, batch: Batch) -> Result<(), StorageError> {
        let mut previous = Vec::with_capacity(batch.entries.len());
        for (key, value) in batch.entries {
            previous.push((key, self.entries.insert(key.to_owned(), value)));
        }

        if let Err(e) = self.flush() {
            error!("DB write failed, rolling back {} collection(s): {e}", previous.len());
            for (key, old) in previous {
                match old {
                    Some(value) => self.entries.insert(key.to_owned(), value),
                    None => self.entries.remove(key),
                };
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn get_by_id<R: Record>(&self, id: RecordId) -> Option<R> {
        self.list::<R>().into_iter().find(|r| r.id() == id)
    }

    /// Prochain identifiant libre: au-delà du plus grand identifiant existant
    /// et de tous ceux déjà distribués, même si l'enregistrement a été supprimé.
    pub fn next_id<R: Record>(&mut self) -> RecordId {
        let max_existing = self
            .list::<R>()
            .iter()
            .map(|r| r.id().get())
            .max()
            .unwrap_or(0);
        let issued = self.sequences.entry(R::KEY.to_owned()).or_insert(0);
        let next = max_existing.max(*issued) + 1;
        *issued = next;
        RecordId::new(next)
    }

    /// Écrit le contenu brut d'une collection (données initiales)
    pub(crate) fn put_raw(&mut self, key: &str, raw: String) {
        self.entries.insert(key.to_owned(), raw);
    }
}
