//! Parcours de réservation d'un créneau
//!
//! Le parcours suit quatre étapes: choix du médecin, choix du créneau,
//! saisie des données du patient, confirmation. L'état courant est porté
//! par un [`BookingFlow`], une instance par parcours; chaque étape relit le
//! catalogue dans le stockage qu'on lui passe.
//!
//! La confirmation remplace les collections des réservations et des
//! créneaux dans une seule écriture: soit les deux changements sont
//! sauvegardés, soit aucun.

use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use log::{info, warn};
use thiserror::Error;

use crate::db::{Batch, Database, StorageError};
use crate::models::{Booking, BookingStatus, Doctor, Gender, Insurer, Patient, RecordId, Slot};
use crate::pricing::{InvalidDiscount, Quote};
use crate::utils::input_validation::{
    document_validation, email_validation, optional_text, phone_validation,
};

/// Étape du parcours, sans les données associées
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Step {
    #[display("choix du médecin")]
    SelectingDoctor,
    #[display("choix du créneau")]
    SelectingSlot,
    #[display("saisie du patient")]
    EnteringDetails,
    #[display("confirmé")]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    SelectingDoctor,
    SelectingSlot { doctor: Doctor },
    EnteringDetails { doctor: Doctor, slot: Slot },
    Confirmed { booking: Booking },
}

impl FlowState {
    pub fn step(&self) -> Step {
        match self {
            FlowState::SelectingDoctor => Step::SelectingDoctor,
            FlowState::SelectingSlot { .. } => Step::SelectingSlot,
            FlowState::EnteringDetails { .. } => Step::EnteringDetails,
            FlowState::Confirmed { .. } => Step::Confirmed,
        }
    }

    pub fn doctor(&self) -> Option<&Doctor> {
        match self {
            FlowState::SelectingSlot { doctor } | FlowState::EnteringDetails { doctor, .. } => {
                Some(doctor)
            }
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<&Slot> {
        match self {
            FlowState::EnteringDetails { slot, .. } => Some(slot),
            _ => None,
        }
    }
}

/// Champs du formulaire patient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Field {
    #[display("nom")]
    Name,
    #[display("document")]
    Document,
    #[display("date de naissance")]
    BirthDate,
    #[display("genre")]
    Gender,
    #[display("email")]
    Email,
    #[display("téléphone")]
    Phone,
    #[display("obra social")]
    Insurer,
}

/// Les grandes familles d'erreurs du parcours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    StorageUnavailable,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Médecin introuvable: {0}")]
    DoctorNotFound(RecordId),

    #[error("Créneau introuvable: {0}")]
    SlotNotFound(RecordId),

    #[error("Obra social introuvable: {0}")]
    InsurerNotFound(RecordId),

    #[error("Le créneau {0} n'est pas disponible")]
    SlotUnavailable(RecordId),

    #[error("Le créneau {slot} n'appartient pas au médecin {doctor}")]
    SlotDoctorMismatch { slot: RecordId, doctor: RecordId },

    #[error("Veuillez compléter le champ obligatoire: {0}")]
    MissingField(Field),

    #[error("Valeur invalide pour le champ: {0}")]
    InvalidField(Field),

    #[error("Vous devez accepter les conditions générales pour continuer")]
    TermsNotAccepted,

    #[error(transparent)]
    InvalidDiscount(#[from] InvalidDiscount),

    #[error("Aucun médecin ou créneau sélectionné")]
    NothingSelected,

    #[error("Action impossible à l'étape: {0}")]
    WrongStep(Step),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::DoctorNotFound(_)
            | BookingError::SlotNotFound(_)
            | BookingError::InsurerNotFound(_) => ErrorKind::NotFound,
            BookingError::Storage(_) => ErrorKind::StorageUnavailable,
            _ => ErrorKind::ValidationFailed,
        }
    }
}

/// Choix de prise en charge du patient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsurerChoice {
    /// Consultation particulière, sans remise
    SelfPay,
    Insurer(RecordId),
}

/// Le formulaire patient tel que saisi. Les champs texte vides comptent
/// comme absents.
#[derive(Debug, Clone, Default)]
pub struct PatientForm {
    pub name: String,
    pub document: String,
    /// Format `AAAA-MM-JJ`
    pub birth_date: String,
    pub gender: Option<Gender>,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub insurer: Option<InsurerChoice>,
    pub policy_number: String,
    pub reason: String,
    pub accepted_terms: bool,
}

fn required(value: &str, field: Field) -> Result<&str, BookingError> {
    let value = value.trim();
    if value.is_empty() {
        Err(BookingError::MissingField(field))
    } else {
        Ok(value)
    }
}

impl PatientForm {
    /// Vérifie le formulaire: d'abord la présence de chaque champ
    /// obligatoire, puis l'acceptation des conditions, puis les formats.
    pub fn validate(&self, today: NaiveDate) -> Result<(Patient, InsurerChoice), BookingError> {
        let name = required(&self.name, Field::Name)?;
        let document = required(&self.document, Field::Document)?;
        let birth_date = required(&self.birth_date, Field::BirthDate)?;
        let gender = self.gender.ok_or(BookingError::MissingField(Field::Gender))?;
        let email = required(&self.email, Field::Email)?;
        let phone = required(&self.phone, Field::Phone)?;
        let insurer = self
            .insurer
            .ok_or(BookingError::MissingField(Field::Insurer))?;

        if !self.accepted_terms {
            return Err(BookingError::TermsNotAccepted);
        }

        let document =
            document_validation(document).map_err(|_| BookingError::InvalidField(Field::Document))?;
        let birth_date = NaiveDate::parse_from_str(birth_date, "%Y-%m-%d")
            .ok()
            .filter(|date| *date <= today)
            .ok_or(BookingError::InvalidField(Field::BirthDate))?;
        let email = email_validation(email).map_err(|_| BookingError::InvalidField(Field::Email))?;
        let phone = phone_validation(phone).map_err(|_| BookingError::InvalidField(Field::Phone))?;

        let patient = Patient {
            name: name.to_owned(),
            document,
            birth_date,
            gender,
            email,
            phone,
            address: optional_text(&self.address),
            insurer: match insurer {
                InsurerChoice::SelfPay => None,
                InsurerChoice::Insurer(id) => Some(id),
            },
            policy_number: optional_text(&self.policy_number),
            reason: optional_text(&self.reason),
        };
        Ok((patient, insurer))
    }
}

/// Reçoit le nouvel état après chaque transition, pour mettre à jour l'affichage.
pub trait FlowObserver {
    fn on_transition(&mut self, state: &FlowState);
}

impl<F: FnMut(&FlowState)> FlowObserver for F {
    fn on_transition(&mut self, state: &FlowState) {
        self(state)
    }
}

/// Un parcours de réservation en cours
pub struct BookingFlow {
    state: FlowState,
    observers: Vec<Box<dyn FlowObserver>>,
}

impl Default for BookingFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::SelectingDoctor,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl FlowObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn step(&self) -> Step {
        self.state.step()
    }

    fn transition(&mut self, state: FlowState) {
        info!("Booking flow: {} -> {}", self.state.step(), state.step());
        self.state = state;
        for observer in &mut self.observers {
            observer.on_transition(&self.state);
        }
    }

    /// SelectingDoctor -> SelectingSlot
    pub fn select_doctor(&mut self, db: &Database, id: RecordId) -> Result<(), BookingError> {
        if self.step() != Step::SelectingDoctor {
            return Err(BookingError::WrongStep(self.step()));
        }

        let doctor = db
            .get_by_id::<Doctor>(id)
            .ok_or(BookingError::DoctorNotFound(id))?;

        self.transition(FlowState::SelectingSlot { doctor });
        Ok(())
    }

    /// SelectingSlot -> EnteringDetails
    pub fn select_slot(&mut self, db: &Database, id: RecordId) -> Result<(), BookingError> {
        let FlowState::SelectingSlot { doctor } = &self.state else {
            return Err(BookingError::WrongStep(self.step()));
        };

        let slot = claimable_slot(db, id, doctor.id)?;
        let doctor = doctor.clone();
        self.transition(FlowState::EnteringDetails { doctor, slot });
        Ok(())
    }

    /// Retour à l'étape précédente, en oubliant le choix de l'étape quittée
    pub fn back(&mut self) -> Result<(), BookingError> {
        let previous = match &self.state {
            FlowState::SelectingSlot { .. } => FlowState::SelectingDoctor,
            FlowState::EnteringDetails { doctor, .. } => FlowState::SelectingSlot {
                doctor: doctor.clone(),
            },
            FlowState::SelectingDoctor | FlowState::Confirmed { .. } => {
                return Err(BookingError::WrongStep(self.step()))
            }
        };
        self.transition(previous);
        Ok(())
    }

    /// Le prix à payer pour le médecin choisi, selon la prise en charge
    pub fn quote(&self, db: &Database, insurer: Option<InsurerChoice>) -> Result<Quote, BookingError> {
        let doctor = self.state.doctor().ok_or(BookingError::NothingSelected)?;
        let insurer = resolve_insurer(db, insurer.unwrap_or(InsurerChoice::SelfPay))?;
        Ok(Quote::new(doctor, insurer.as_ref())?)
    }

    /// EnteringDetails -> Confirmed
    ///
    /// En cas d'erreur, l'état reste `EnteringDetails` et le stockage
    /// n'est pas modifié.
    pub fn confirm(
        &mut self,
        db: &mut Database,
        form: &PatientForm,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let (doctor_id, slot_id) = match &self.state {
            FlowState::EnteringDetails { doctor, slot } => (doctor.id, slot.id),
            FlowState::Confirmed { .. } => return Err(BookingError::WrongStep(Step::Confirmed)),
            _ => return Err(BookingError::NothingSelected),
        };

        let (patient, choice) = form.validate(now.date_naive())?;
        let insurer = resolve_insurer(db, choice)?;

        // On relit le médecin et le créneau: ils ont pu changer depuis leur sélection
        let doctor = db
            .get_by_id::<Doctor>(doctor_id)
            .ok_or(BookingError::DoctorNotFound(doctor_id))?;
        claimable_slot(db, slot_id, doctor_id)?;

        let quote = Quote::new(&doctor, insurer.as_ref())?;

        let booking = Booking {
            id: db.next_id::<Booking>(),
            patient,
            doctor: doctor.id,
            slot: slot_id,
            specialty: doctor.specialty,
            insurer: insurer.as_ref().map(|i| i.id),
            original_price: quote.original_price,
            discount: quote.discount.get(),
            final_price: quote.final_price,
            created_at: now,
            status: BookingStatus::Confirmed,
        };

        let mut bookings = db.list::<Booking>();
        bookings.push(booking.clone());

        let mut slots = db.list::<Slot>();
        for slot in slots.iter_mut().filter(|s| s.id == slot_id) {
            slot.available = false;
        }

        let mut batch = Batch::new();
        batch.put(&bookings)?.put(&slots)?;
        db.commit(batch)?;

        info!(
            "Booking {} confirmed: doctor {}, slot {}, final price {}",
            booking.id, booking.doctor, booking.slot, booking.final_price
        );
        self.transition(FlowState::Confirmed {
            booking: booking.clone(),
        });
        Ok(booking)
    }
}

/// Un créneau existant, libre et appartenant au médecin donné
fn claimable_slot(db: &Database, id: RecordId, doctor: RecordId) -> Result<Slot, BookingError> {
    let slot = db
        .get_by_id::<Slot>(id)
        .ok_or(BookingError::SlotNotFound(id))?;

    if slot.doctor != doctor {
        warn!("Slot {id} refused: belongs to doctor {}", slot.doctor);
        return Err(BookingError::SlotDoctorMismatch { slot: id, doctor });
    }
    if !slot.available {
        warn!("Slot {id} refused: already taken");
        return Err(BookingError::SlotUnavailable(id));
    }
    Ok(slot)
}

fn resolve_insurer(db: &Database, choice: InsurerChoice) -> Result<Option<Insurer>, BookingError> {
    match choice {
        InsurerChoice::SelfPay => Ok(None),
        InsurerChoice::Insurer(id) => {
            let insurer = db
                .get_by_id::<Insurer>(id)
                .ok_or(BookingError::InsurerNotFound(id))?;
            if !insurer.active {
                return Err(BookingError::InvalidField(Field::Insurer));
            }
            Ok(Some(insurer))
        }
    }
}

/// Les médecins proposés à la réservation
pub fn doctors(db: &Database) -> Vec<Doctor> {
    db.list()
}

/// Les créneaux libres d'un médecin, par date
pub fn available_slots(db: &Database, doctor: RecordId) -> Vec<Slot> {
    db.list::<Slot>()
        .into_iter()
        .filter(|slot| slot.doctor == doctor && slot.available)
        .collect()
}

/// Les obras sociales proposées dans le formulaire
pub fn active_insurers(db: &Database) -> Vec<Insurer> {
    db.list::<Insurer>()
        .into_iter()
        .filter(|insurer| insurer.active)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Record;
    use crate::models::Specialty;
    use crate::pricing::final_price;
    use chrono::TimeZone;
    use std::{cell::RefCell, rc::Rc};
    use tempfile::TempDir;

    const CARDIOLOGY: RecordId = RecordId::new(1);
    const DR_RUIZ: RecordId = RecordId::new(1);
    const DR_PAZ: RecordId = RecordId::new(2);
    const OSDE: RecordId = RecordId::new(2);
    const IOMA_INACTIVE: RecordId = RecordId::new(3);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 12, 0, 0).unwrap()
    }

    fn doctor(id: RecordId, name: &str, price: f64) -> Doctor {
        Doctor {
            id,
            license: 1000 + id.get(),
            name: name.to_owned(),
            specialty: CARDIOLOGY,
            price,
            insurers: vec![OSDE],
            image: None,
            email: None,
            phone: None,
            office_hours: None,
            description: "Cardiología clínica".to_owned(),
        }
    }

    fn slot(id: u32, doctor: RecordId, day: u32) -> Slot {
        Slot {
            id: RecordId::new(id),
            doctor,
            date_time: Utc.with_ymd_and_hms(2030, 3, day, 10, 0, 0).unwrap(),
            available: true,
        }
    }

    fn fill(db: &mut Database) {
        db.save(&[Specialty {
            id: CARDIOLOGY,
            name: "Cardiología".to_owned(),
        }])
        .unwrap();
        db.save(&[doctor(DR_RUIZ, "Dra. Ruiz", 8500.0), doctor(DR_PAZ, "Dr. Paz", 6000.0)])
            .unwrap();
        db.save(&[
            Insurer {
                id: OSDE,
                name: "OSDE".to_owned(),
                discount: 15.0,
                logo: None,
                active: true,
            },
            Insurer {
                id: IOMA_INACTIVE,
                name: "IOMA".to_owned(),
                discount: 30.0,
                logo: None,
                active: false,
            },
        ])
        .unwrap();
        db.save(&[slot(1, DR_RUIZ, 5), slot(2, DR_RUIZ, 6), slot(3, DR_PAZ, 5)])
            .unwrap();
    }

    fn catalog() -> Database {
        let mut db = Database::in_memory();
        fill(&mut db);
        db
    }

    fn form(insurer: InsurerChoice) -> PatientForm {
        PatientForm {
            name: "Juan Pérez".to_owned(),
            document: "30.123.456".to_owned(),
            birth_date: "1985-07-14".to_owned(),
            gender: Some(Gender::Male),
            email: "Juan.Perez@example.com".to_owned(),
            phone: "+54 11 5555-1234".to_owned(),
            address: String::new(),
            insurer: Some(insurer),
            policy_number: "A-123".to_owned(),
            reason: "Control anual".to_owned(),
            accepted_terms: true,
        }
    }

    fn at_details(db: &Database, slot_id: u32) -> BookingFlow {
        let mut flow = BookingFlow::new();
        flow.select_doctor(db, DR_RUIZ).unwrap();
        flow.select_slot(db, RecordId::new(slot_id)).unwrap();
        flow
    }

    fn taken_slots(db: &Database) -> Vec<RecordId> {
        db.list::<Slot>()
            .into_iter()
            .filter(|s| !s.available)
            .map(|s| s.id)
            .collect()
    }

    #[test]
    fn test_unknown_doctor_is_refused() {
        let db = catalog();
        let mut flow = BookingFlow::new();

        let err = flow.select_doctor(&db, RecordId::new(42)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(flow.step(), Step::SelectingDoctor);
    }

    #[test]
    fn test_unavailable_slot_is_refused() {
        let mut db = catalog();
        let mut slots = db.list::<Slot>();
        slots[1].available = false;
        db.save(&slots).unwrap();

        let mut flow = BookingFlow::new();
        flow.select_doctor(&db, DR_RUIZ).unwrap();

        let err = flow.select_slot(&db, RecordId::new(2)).unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable(_)));
        assert_eq!(flow.step(), Step::SelectingSlot);
    }

    #[test]
    fn test_slot_of_other_doctor_or_unknown_is_refused() {
        let db = catalog();
        let mut flow = BookingFlow::new();
        flow.select_doctor(&db, DR_RUIZ).unwrap();

        assert!(matches!(
            flow.select_slot(&db, RecordId::new(3)),
            Err(BookingError::SlotDoctorMismatch { .. })
        ));
        assert_eq!(
            flow.select_slot(&db, RecordId::new(99)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(flow.step(), Step::SelectingSlot);
    }

    #[test]
    fn test_booking_with_insurer() {
        let mut db = catalog();
        let mut flow = at_details(&db, 1);

        let booking = flow
            .confirm(&mut db, &form(InsurerChoice::Insurer(OSDE)), now())
            .unwrap();

        assert_eq!(booking.original_price, 8500.0);
        assert_eq!(booking.discount, 15.0);
        assert_eq!(booking.final_price, 7225.0);
        assert_eq!(booking.final_price, final_price(8500.0, 15.0));
        assert_eq!(booking.specialty, CARDIOLOGY);
        assert_eq!(booking.insurer, Some(OSDE));
        assert_eq!(booking.patient.document, "30123456");
        assert_eq!(booking.patient.email, "juan.perez@example.com");
        assert_eq!(booking.patient.address, None);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.created_at, now());

        assert_eq!(flow.step(), Step::Confirmed);
        assert_eq!(db.list::<Booking>(), vec![booking]);
        assert_eq!(taken_slots(&db), vec![RecordId::new(1)]);
    }

    #[test]
    fn test_self_pay_booking() {
        let mut db = catalog();
        let mut flow = at_details(&db, 2);

        let booking = flow
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .unwrap();

        assert_eq!(booking.discount, 0.0);
        assert_eq!(booking.final_price, booking.original_price);
        assert_eq!(booking.insurer, None);
        assert_eq!(booking.patient.insurer, None);
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let mut db = catalog();
        let mut flow = at_details(&db, 1);

        let cases: Vec<(Box<dyn Fn(&mut PatientForm)>, Field)> = vec![
            (Box::new(|f: &mut PatientForm| f.name = "  ".to_owned()), Field::Name),
            (Box::new(|f: &mut PatientForm| f.document.clear()), Field::Document),
            (Box::new(|f: &mut PatientForm| f.birth_date.clear()), Field::BirthDate),
            (Box::new(|f: &mut PatientForm| f.gender = None), Field::Gender),
            (Box::new(|f: &mut PatientForm| f.email.clear()), Field::Email),
            (Box::new(|f: &mut PatientForm| f.phone.clear()), Field::Phone),
            (Box::new(|f: &mut PatientForm| f.insurer = None), Field::Insurer),
        ];

        for (mutate, field) in cases {
            let mut patient = form(InsurerChoice::SelfPay);
            mutate(&mut patient);

            match flow.confirm(&mut db, &patient, now()) {
                Err(BookingError::MissingField(missing)) => assert_eq!(missing, field),
                other => panic!("Expected missing {field}, got {other:?}"),
            }
            assert_eq!(flow.step(), Step::EnteringDetails);
        }

        assert!(db.list::<Booking>().is_empty());
        assert!(taken_slots(&db).is_empty());
    }

    #[test]
    fn test_terms_and_formats_are_checked() {
        let mut db = catalog();
        let mut flow = at_details(&db, 1);

        let mut no_terms = form(InsurerChoice::SelfPay);
        no_terms.accepted_terms = false;
        assert!(matches!(
            flow.confirm(&mut db, &no_terms, now()),
            Err(BookingError::TermsNotAccepted)
        ));

        let mut bad_email = form(InsurerChoice::SelfPay);
        bad_email.email = "juan-at-example".to_owned();
        assert!(matches!(
            flow.confirm(&mut db, &bad_email, now()),
            Err(BookingError::InvalidField(Field::Email))
        ));

        let mut born_later = form(InsurerChoice::SelfPay);
        born_later.birth_date = "2031-01-01".to_owned();
        assert!(matches!(
            flow.confirm(&mut db, &born_later, now()),
            Err(BookingError::InvalidField(Field::BirthDate))
        ));

        let inactive = form(InsurerChoice::Insurer(IOMA_INACTIVE));
        assert!(matches!(
            flow.confirm(&mut db, &inactive, now()),
            Err(BookingError::InvalidField(Field::Insurer))
        ));

        let unknown = form(InsurerChoice::Insurer(RecordId::new(77)));
        assert_eq!(
            flow.confirm(&mut db, &unknown, now()).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        assert_eq!(flow.step(), Step::EnteringDetails);
        assert!(db.list::<Booking>().is_empty());
    }

    #[test]
    fn test_confirm_without_selection() {
        let mut db = catalog();
        let mut flow = BookingFlow::new();

        assert!(matches!(
            flow.confirm(&mut db, &form(InsurerChoice::SelfPay), now()),
            Err(BookingError::NothingSelected)
        ));
        assert_eq!(flow.step(), Step::SelectingDoctor);
    }

    #[test]
    fn test_back_transitions_drop_selection() {
        let db = catalog();
        let mut flow = at_details(&db, 1);

        flow.back().unwrap();
        assert_eq!(flow.step(), Step::SelectingSlot);
        assert_eq!(flow.state().slot(), None);
        assert_eq!(flow.state().doctor().map(|d| d.id), Some(DR_RUIZ));

        flow.back().unwrap();
        assert_eq!(flow.step(), Step::SelectingDoctor);
        assert_eq!(flow.state().doctor(), None);

        assert!(matches!(flow.back(), Err(BookingError::WrongStep(Step::SelectingDoctor))));
    }

    #[test]
    fn test_confirmed_is_final() {
        let mut db = catalog();
        let mut flow = at_details(&db, 1);
        flow.confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .unwrap();

        assert!(flow.back().is_err());
        assert!(flow.select_doctor(&db, DR_RUIZ).is_err());
        assert!(flow
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .is_err());
        assert_eq!(flow.step(), Step::Confirmed);
        assert_eq!(db.list::<Booking>().len(), 1);
    }

    #[test]
    fn test_slot_cannot_be_booked_twice() {
        let mut db = catalog();
        let mut first = at_details(&db, 1);
        let mut second = at_details(&db, 1);

        first
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .unwrap();
        let err = second
            .confirm(&mut db, &form(InsurerChoice::Insurer(OSDE)), now())
            .unwrap_err();

        assert!(matches!(err, BookingError::SlotUnavailable(_)));
        assert_eq!(second.step(), Step::EnteringDetails);
        assert_eq!(db.list::<Booking>().len(), 1);
        assert!(available_slots(&db, DR_RUIZ)
            .iter()
            .all(|s| s.id != RecordId::new(1)));
    }

    #[test]
    fn test_booking_ids_increase() {
        let mut db = catalog();

        let first = at_details(&db, 1)
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .map(|b| b.id)
            .unwrap();
        let second = at_details(&db, 2)
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .map(|b| b.id)
            .unwrap();

        assert_eq!(first, RecordId::new(1));
        assert!(second > first);
    }

    #[test]
    fn test_storage_failure_keeps_state_and_slot() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::open(dir.path().join("galeno.json")).unwrap();
        fill(&mut db);

        let mut flow = at_details(&db, 1);
        dir.close().unwrap();

        let err = flow
            .confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert_eq!(flow.step(), Step::EnteringDetails);
        assert!(db.list::<Booking>().is_empty());
        assert!(taken_slots(&db).is_empty());
    }

    #[test]
    fn test_quote_follows_insurer_choice() {
        let db = catalog();
        let flow = at_details(&db, 1);

        assert_eq!(
            flow.quote(&db, Some(InsurerChoice::Insurer(OSDE)))
                .unwrap()
                .final_price,
            7225.0
        );
        assert_eq!(flow.quote(&db, None).unwrap().final_price, 8500.0);
        assert!(matches!(
            BookingFlow::new().quote(&db, None),
            Err(BookingError::NothingSelected)
        ));
    }

    #[test]
    fn test_observer_sees_every_transition() {
        let mut db = catalog();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut flow =
            BookingFlow::new().with_observer(move |state: &FlowState| sink.borrow_mut().push(state.step()));

        flow.select_doctor(&db, DR_RUIZ).unwrap();
        flow.select_slot(&db, RecordId::new(1)).unwrap();
        flow.back().unwrap();
        flow.select_slot(&db, RecordId::new(2)).unwrap();
        assert!(flow.select_slot(&db, RecordId::new(1)).is_err());
        flow.confirm(&mut db, &form(InsurerChoice::SelfPay), now())
            .unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                Step::SelectingSlot,
                Step::EnteringDetails,
                Step::SelectingSlot,
                Step::EnteringDetails,
                Step::Confirmed,
            ]
        );
    }

    #[test]
    fn test_catalog_reads() {
        let db = catalog();

        let names: Vec<String> = doctors(&db).into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["Dr. Paz", "Dra. Ruiz"]);

        let slots: Vec<RecordId> = available_slots(&db, DR_RUIZ).iter().map(|s| s.id).collect();
        assert_eq!(slots, [RecordId::new(1), RecordId::new(2)]);

        let insurers = active_insurers(&db);
        assert_eq!(insurers.len(), 1);
        assert_eq!(insurers[0].id(), OSDE);
    }
}
