//! API d'administration du catalogue, et point d'entrée unique pour le
//! contrôle d'accès.
//!
use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::authorization::{AccessDenied, Context, Enforcer};
use crate::db::{Database, Record, StorageError};
use crate::export::{booking_details, export_bookings_csv, BookingDetail, ExportError};
use crate::models::{Booking, Doctor, Insurer, RecordId, Role, Session, Slot, Specialty, User};
use crate::pricing::{Discount, InvalidDiscount};
use crate::utils::input_validation::{
    email_validation, optional_text, password_validation, Username,
};
use crate::utils::password_utils::{hash, verify};

pub struct Service {
    session: Option<Session>,
    db: Database,
    enforcer: Enforcer,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    #[error("Vous devez vous connecter")]
    NotAuthenticated,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0} introuvable: {1}")]
    NotFound(&'static str, RecordId),

    #[error("Champ obligatoire manquant: {0}")]
    MissingField(&'static str),

    #[error("Valeur invalide pour le champ: {0}")]
    InvalidField(&'static str),

    #[error("La matrícula {license} est déjà attribuée à {doctor}")]
    DuplicateLicense { license: u32, doctor: String },

    #[error("Une spécialité nommée {0} existe déjà")]
    DuplicateSpecialty(String),

    #[error("La spécialité {name} est encore attribuée à {count} médecin(s)")]
    SpecialtyInUse { name: String, count: usize },

    #[error("Impossible de créer un créneau dans le passé")]
    SlotInPast,

    #[error("Le créneau {0} est réservé: il ne peut être ni libéré ni déplacé")]
    SlotBooked(RecordId),

    #[error("Les comptes utilisateurs sont illisibles")]
    UsersUnreadable,

    #[error("Utilisateur déja inscrit")]
    UserAlreadyExists,

    #[error("Mot de passe trop faible")]
    WeakPassword,

    #[error("Erreur de hachage du mot de passe: {0}")]
    Hash(String),

    #[error(transparent)]
    InvalidDiscount(#[from] InvalidDiscount),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Mauvais mot de passe ou utilisateur inconnu")]
    InvalidCredentials,
}

/// Données saisies pour créer ou modifier un médecin
#[derive(Debug, Clone, Default)]
pub struct DoctorInput {
    pub license: u32,
    pub name: String,
    pub specialty: Option<RecordId>,
    pub price: f64,
    pub insurers: Vec<RecordId>,
    pub image: String,
    pub email: String,
    pub phone: String,
    pub office_hours: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct InsurerInput {
    pub name: String,
    pub discount: f64,
    pub logo: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SlotInput {
    pub doctor: RecordId,
    pub date_time: DateTime<Utc>,
    pub available: bool,
}

fn required(value: &str, field: &'static str) -> Result<String, ServiceError> {
    optional_text(value).ok_or(ServiceError::MissingField(field))
}

/// Remplace l'enregistrement portant le même identifiant
fn replace<R: Record>(records: &mut [R], record: R) {
    if let Some(slot) = records.iter_mut().find(|r| r.id() == record.id()) {
        *slot = record;
    }
}

impl Service {
    pub fn new(db: Database, enforcer: Enforcer) -> Self {
        Self {
            db,
            session: None,
            enforcer,
        }
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        self.db.flush()
    }

    /// Le stockage, pour le parcours de réservation public
    pub fn store(&self) -> &Database {
        &self.db
    }

    pub fn store_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Crée un contexte d'autorisation ayant la session courante comme sujet
    fn enforce(&self) -> Result<Context<'_>, ServiceError> {
        let session = self.session.as_ref().ok_or(ServiceError::NotAuthenticated)?;
        Ok(self.enforcer.with_subject(session))
    }

    fn require<R: Record>(&self, what: &'static str, id: RecordId) -> Result<R, ServiceError> {
        self.db.get_by_id(id).ok_or(ServiceError::NotFound(what, id))
    }

    // ---------------------------------- Sessions -------------------------------------------

    /// Vrai dès que la collection des comptes existe, même illisible
    pub fn has_users(&self) -> bool {
        self.db.is_initialized::<User>()
    }

    /// Enregistre un nouveau compte. Le tout premier compte peut être créé
    /// sans session et devient administrateur.
    pub fn register_user(
        &mut self,
        username: Username,
        password: &str,
        email: &str,
        role: Role,
    ) -> Result<RecordId, ServiceError> {
        let role = if self.has_users() {
            self.enforce()?.manage_users()?;
            role
        } else {
            Role::Admin
        };

        let mut users = self.db.list::<User>();
        if users.is_empty() && self.has_users() {
            // Une sauvegarde écraserait les comptes existants
            return Err(ServiceError::UsersUnreadable);
        }
        if users.iter().any(|u| u.username == username) {
            return Err(ServiceError::UserAlreadyExists);
        }
        if !password_validation(password, username.as_ref()) {
            return Err(ServiceError::WeakPassword);
        }
        let email = email_validation(email).map_err(|_| ServiceError::InvalidField("email"))?;
        let password = hash(password).map_err(|e| ServiceError::Hash(e.to_string()))?;

        let user = User {
            id: self.db.next_id::<User>(),
            username,
            password,
            email,
            role,
            active: true,
        };
        let id = user.id;

        info!("Compte créé avec succès pour l'utilisateur {}", &user.username);
        users.push(user);
        self.db.save(&users)?;
        Ok(id)
    }

    /// Vérifie si le mot de passe est correct, et si oui, ouvre une session
    pub fn login(&mut self, username: &Username, password: &str) -> Result<&Session, LoginError> {
        let user = self
            .db
            .list::<User>()
            .into_iter()
            .find(|u| &u.username == username);

        if !verify(password, user.as_ref().map(|u| &u.password)) {
            return Err(LoginError::InvalidCredentials);
        }
        let user = user
            .filter(|u| u.active)
            .ok_or(LoginError::InvalidCredentials)?;

        info!("Session ouverte pour {}", user.username);
        Ok(self.session.insert(Session::open(&user)))
    }

    /// Ferme la session
    pub fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Session fermée pour {}", session.username);
        }
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        self.enforce()?.manage_users()?;
        Ok(self.db.list())
    }

    // ---------------------------------- Catalogue ------------------------------------------

    pub fn doctors(&self) -> Vec<Doctor> {
        self.db.list()
    }

    pub fn insurers(&self) -> Vec<Insurer> {
        self.db.list()
    }

    pub fn specialties(&self) -> Vec<Specialty> {
        self.db.list()
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.db.list()
    }

    fn build_doctor(&self, id: RecordId, input: DoctorInput) -> Result<Doctor, ServiceError> {
        if input.license == 0 {
            return Err(ServiceError::InvalidField("matrícula"));
        }
        let name = required(&input.name, "nom")?;
        let specialty = input.specialty.ok_or(ServiceError::MissingField("spécialité"))?;
        self.require::<Specialty>("Spécialité", specialty)?;
        if !input.price.is_finite() || input.price < 0.0 {
            return Err(ServiceError::InvalidField("prix"));
        }
        let description = required(&input.description, "description")?;

        for &insurer in &input.insurers {
            self.require::<Insurer>("Obra social", insurer)?;
        }

        if let Some(other) = self
            .db
            .list::<Doctor>()
            .into_iter()
            .find(|d| d.license == input.license && d.id != id)
        {
            return Err(ServiceError::DuplicateLicense {
                license: input.license,
                doctor: other.name,
            });
        }

        Ok(Doctor {
            id,
            license: input.license,
            name,
            specialty,
            price: input.price,
            insurers: input.insurers,
            image: optional_text(&input.image),
            email: optional_text(&input.email),
            phone: optional_text(&input.phone),
            office_hours: optional_text(&input.office_hours),
            description,
        })
    }

    pub fn create_doctor(&mut self, input: DoctorInput) -> Result<RecordId, ServiceError> {
        self.enforce()?.write_catalog(Doctor::KEY)?;

        let id = self.db.next_id::<Doctor>();
        let doctor = self.build_doctor(id, input)?;

        let mut doctors = self.db.list::<Doctor>();
        info!("Médecin {} créé ({})", doctor.id, doctor.name);
        doctors.push(doctor);
        self.db.save(&doctors)?;
        Ok(id)
    }

    pub fn update_doctor(&mut self, id: RecordId, input: DoctorInput) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Doctor::KEY)?;
        self.require::<Doctor>("Médecin", id)?;

        let doctor = self.build_doctor(id, input)?;
        let mut doctors = self.db.list::<Doctor>();
        replace(&mut doctors, doctor);
        self.db.save(&doctors)?;
        info!("Médecin {id} modifié");
        Ok(())
    }

    pub fn delete_doctor(&mut self, id: RecordId) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Doctor::KEY)?;
        self.require::<Doctor>("Médecin", id)?;

        let mut doctors = self.db.list::<Doctor>();
        doctors.retain(|d| d.id != id);
        self.db.save(&doctors)?;
        info!("Médecin {id} supprimé");
        Ok(())
    }

    fn build_insurer(id: RecordId, input: InsurerInput) -> Result<Insurer, ServiceError> {
        let name = required(&input.name, "nom")?;
        let discount = Discount::try_from(input.discount)?;

        Ok(Insurer {
            id,
            name,
            discount: discount.get(),
            logo: optional_text(&input.logo),
            active: input.active,
        })
    }

    pub fn create_insurer(&mut self, input: InsurerInput) -> Result<RecordId, ServiceError> {
        self.enforce()?.write_catalog(Insurer::KEY)?;

        let id = self.db.next_id::<Insurer>();
        let insurer = Self::build_insurer(id, input)?;

        let mut insurers = self.db.list::<Insurer>();
        info!("Obra social {} créée ({})", insurer.id, insurer.name);
        insurers.push(insurer);
        self.db.save(&insurers)?;
        Ok(id)
    }

    pub fn update_insurer(&mut self, id: RecordId, input: InsurerInput) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Insurer::KEY)?;
        self.require::<Insurer>("Obra social", id)?;

        let insurer = Self::build_insurer(id, input)?;
        let mut insurers = self.db.list::<Insurer>();
        replace(&mut insurers, insurer);
        self.db.save(&insurers)?;
        Ok(())
    }

    pub fn delete_insurer(&mut self, id: RecordId) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Insurer::KEY)?;
        self.require::<Insurer>("Obra social", id)?;

        let mut insurers = self.db.list::<Insurer>();
        insurers.retain(|i| i.id != id);
        self.db.save(&insurers)?;
        info!("Obra social {id} supprimée");
        Ok(())
    }

    fn check_specialty_name(&self, name: &str, id: Option<RecordId>) -> Result<String, ServiceError> {
        let name = required(name, "nom")?;
        let taken = self
            .db
            .list::<Specialty>()
            .iter()
            .any(|s| s.name.to_lowercase() == name.to_lowercase() && Some(s.id) != id);

        if taken {
            return Err(ServiceError::DuplicateSpecialty(name));
        }
        Ok(name)
    }

    pub fn create_specialty(&mut self, name: &str) -> Result<RecordId, ServiceError> {
        self.enforce()?.write_catalog(Specialty::KEY)?;
        let name = self.check_specialty_name(name, None)?;

        let id = self.db.next_id::<Specialty>();
        let mut specialties = self.db.list::<Specialty>();
        specialties.push(Specialty { id, name });
        self.db.save(&specialties)?;
        Ok(id)
    }

    pub fn update_specialty(&mut self, id: RecordId, name: &str) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Specialty::KEY)?;
        self.require::<Specialty>("Spécialité", id)?;
        let name = self.check_specialty_name(name, Some(id))?;

        let mut specialties = self.db.list::<Specialty>();
        replace(&mut specialties, Specialty { id, name });
        self.db.save(&specialties)?;
        Ok(())
    }

    /// Une spécialité encore attribuée à un médecin ne peut pas être supprimée
    pub fn delete_specialty(&mut self, id: RecordId) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Specialty::KEY)?;
        let specialty = self.require::<Specialty>("Spécialité", id)?;

        let count = self
            .db
            .list::<Doctor>()
            .iter()
            .filter(|d| d.specialty == id)
            .count();
        if count > 0 {
            return Err(ServiceError::SpecialtyInUse {
                name: specialty.name,
                count,
            });
        }

        let mut specialties = self.db.list::<Specialty>();
        specialties.retain(|s| s.id != id);
        self.db.save(&specialties)?;
        Ok(())
    }

    fn build_slot(
        &self,
        id: RecordId,
        input: SlotInput,
        now: DateTime<Utc>,
    ) -> Result<Slot, ServiceError> {
        self.require::<Doctor>("Médecin", input.doctor)?;
        if input.date_time < now {
            return Err(ServiceError::SlotInPast);
        }

        Ok(Slot {
            id,
            doctor: input.doctor,
            date_time: input.date_time,
            available: input.available,
        })
    }

    pub fn create_slot(&mut self, input: SlotInput, now: DateTime<Utc>) -> Result<RecordId, ServiceError> {
        self.enforce()?.write_catalog(Slot::KEY)?;

        let id = self.db.next_id::<Slot>();
        let slot = self.build_slot(id, input, now)?;

        let mut slots = self.db.list::<Slot>();
        info!("Créneau {} créé pour le médecin {}", slot.id, slot.doctor);
        slots.push(slot);
        self.db.save(&slots)?;
        Ok(id)
    }

    pub fn update_slot(
        &mut self,
        id: RecordId,
        input: SlotInput,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Slot::KEY)?;
        let current = self.require::<Slot>("Créneau", id)?;

        let booked = self.db.list::<Booking>().iter().any(|b| b.slot == id);
        let changed = input.available
            || input.doctor != current.doctor
            || input.date_time != current.date_time;
        if booked && changed {
            warn!("Slot {id} refused: already booked");
            return Err(ServiceError::SlotBooked(id));
        }

        let slot = self.build_slot(id, input, now)?;
        let mut slots = self.db.list::<Slot>();
        replace(&mut slots, slot);
        self.db.save(&slots)?;
        Ok(())
    }

    pub fn delete_slot(&mut self, id: RecordId) -> Result<(), ServiceError> {
        self.enforce()?.write_catalog(Slot::KEY)?;
        self.require::<Slot>("Créneau", id)?;

        let mut slots = self.db.list::<Slot>();
        slots.retain(|s| s.id != id);
        self.db.save(&slots)?;
        info!("Créneau {id} supprimé");
        Ok(())
    }

    // ---------------------------------- Réservations ---------------------------------------

    pub fn list_bookings(&self) -> Result<Vec<BookingDetail>, ServiceError> {
        self.enforce()?.read_bookings()?;
        Ok(booking_details(&self.db))
    }

    pub fn booking_detail(&self, id: RecordId) -> Result<BookingDetail, ServiceError> {
        self.enforce()?.read_bookings()?;
        let booking = self.require::<Booking>("Réservation", id)?;
        Ok(BookingDetail::resolve(&self.db, booking))
    }

    pub fn export_bookings(&self) -> Result<String, ServiceError> {
        self.enforce()?.export_bookings()?;
        Ok(export_bookings_csv(&self.db)?)
    }
}
