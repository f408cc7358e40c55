//! Modèle de données
//!
//! Les noms de champs sérialisés reprennent ceux des fichiers de données
//! existants (`nombre`, `precio`, `fechaHora`, ...), pour que les exports
//! déjà produits se rechargent tels quels.

use std::{cmp::Ordering, num::ParseIntError, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;
use thiserror::Error;
use uuid::Uuid;

use crate::consts;
use crate::db::Record;
use crate::utils::input_validation::Username;
use crate::utils::password_utils::PWHash;

/// Identifiant numérique d'un enregistrement, unique dans sa collection.
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Display,
)]
#[serde(transparent)]
pub struct RecordId(u32);

impl RecordId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecordId {
    #[error("Identifiant invalide: {0}")]
    Malformed(#[from] ParseIntError),
    #[error("Un identifiant doit être strictement positif")]
    Zero,
}

/// Les identifiants venant de l'interface sont du texte: on les convertit
/// une fois, ici, et on rejette tout ce qui n'est pas un entier positif.
impl FromStr for RecordId {
    type Err = InvalidRecordId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s.trim().parse()?;
        if raw == 0 {
            return Err(InvalidRecordId::Zero);
        }
        Ok(Self(raw))
    }
}

fn by_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn default_true() -> bool {
    true
}

/// Un médecin et son tarif de consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[display("{name}")]
pub struct Doctor {
    pub id: RecordId,
    #[serde(rename = "matricula")]
    pub license: u32,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "especialidad")]
    pub specialty: RecordId,
    #[serde(rename = "precio")]
    pub price: f64,
    #[serde(rename = "obrasSociales", default)]
    pub insurers: Vec<RecordId>,
    #[serde(rename = "imagen", default)]
    pub image: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(rename = "horarioAtencion", default)]
    pub office_hours: Option<String>,
    #[serde(rename = "descripcion", default)]
    pub description: String,
}

impl Doctor {
    pub fn accepts(&self, insurer: RecordId) -> bool {
        self.insurers.contains(&insurer)
    }
}

impl Record for Doctor {
    const KEY: &'static str = consts::DOCTORS_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        by_name(&self.name, &other.name)
    }
}

/// Une obra social: tiers payant accordant une remise en pourcentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[display("{name}")]
pub struct Insurer {
    pub id: RecordId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "porcentaje", default)]
    pub discount: f64,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(rename = "activo", default = "default_true")]
    pub active: bool,
}

impl Record for Insurer {
    const KEY: &'static str = consts::INSURERS_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        by_name(&self.name, &other.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{name}")]
pub struct Specialty {
    pub id: RecordId,
    #[serde(rename = "nombre")]
    pub name: String,
}

impl Record for Specialty {
    const KEY: &'static str = consts::SPECIALTIES_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        by_name(&self.name, &other.name)
    }
}

/// Un créneau (turno) réservable chez un médecin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: RecordId,
    #[serde(rename = "medicoId")]
    pub doctor: RecordId,
    #[serde(rename = "fechaHora")]
    pub date_time: DateTime<Utc>,
    #[serde(rename = "disponible", default = "default_true")]
    pub available: bool,
}

impl Record for Slot {
    const KEY: &'static str = consts::SLOTS_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.date_time
            .cmp(&other.date_time)
            .then(self.id.cmp(&other.id))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
pub enum Gender {
    #[serde(rename = "femenino")]
    #[display("Femme")]
    Female,
    #[serde(rename = "masculino")]
    #[display("Homme")]
    Male,
    #[serde(rename = "otro")]
    #[display("Autre")]
    Other,
}

/// Les données du patient saisies au moment de la réservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "documento")]
    pub document: String,
    #[serde(rename = "fechaNacimiento")]
    pub birth_date: NaiveDate,
    #[serde(rename = "genero")]
    pub gender: Gender,
    pub email: String,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(rename = "direccion", default)]
    pub address: Option<String>,
    #[serde(rename = "obraSocialId", default)]
    pub insurer: Option<RecordId>,
    #[serde(rename = "numeroAfiliado", default)]
    pub policy_number: Option<String>,
    #[serde(rename = "motivoConsulta", default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum BookingStatus {
    #[serde(rename = "confirmada")]
    #[display("confirmée")]
    Confirmed,
}

/// Une réservation confirmée d'un créneau par un patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: RecordId,
    #[serde(rename = "paciente")]
    pub patient: Patient,
    #[serde(rename = "medicoId")]
    pub doctor: RecordId,
    #[serde(rename = "turnoId")]
    pub slot: RecordId,
    #[serde(rename = "especialidad")]
    pub specialty: RecordId,
    #[serde(rename = "obraSocialId", default)]
    pub insurer: Option<RecordId>,
    #[serde(rename = "valorConsultaOriginal")]
    pub original_price: f64,
    #[serde(rename = "porcentajeDescuento")]
    pub discount: f64,
    #[serde(rename = "valorFinal")]
    pub final_price: f64,
    #[serde(rename = "fechaReserva")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "estado")]
    pub status: BookingStatus,
}

impl Record for Booking {
    const KEY: &'static str = consts::BOOKINGS_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.id.cmp(&other.id))
    }
}

/// Role d'un utilisateur de la console d'administration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
pub enum Role {
    #[serde(rename = "administrador")]
    #[display("Administrateur")]
    Admin,
    #[serde(rename = "recepcionista")]
    #[display("Réceptionniste")]
    Receptionist,
}

/// Un compte de la console d'administration
#[derive(Debug, Clone, Serialize, Deserialize, Display)]
#[display("{username}")]
pub struct User {
    pub id: RecordId,
    pub username: Username,
    pub password: PWHash,
    pub email: String,
    #[serde(rename = "rol")]
    pub role: Role,
    #[serde(rename = "activo", default = "default_true")]
    pub active: bool,
}

impl Record for User {
    const KEY: &'static str = consts::USERS_KEY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        by_name(self.username.as_ref(), other.username.as_ref())
    }
}

/// Une session ouverte sur la console d'administration
#[derive(Debug, Clone, Serialize, Hash)]
pub struct Session {
    pub token: Uuid,
    pub user: RecordId,
    pub username: Username,
    pub role: Role,
}

impl Session {
    pub fn open(user: &User) -> Self {
        Self {
            token: Uuid::new_v4(),
            user: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}
