//! Vue détaillée des réservations et export CSV

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::db::Database;
use crate::models::{Booking, Doctor, Insurer, Slot, Specialty};

const SEPARATOR: &str = ";";
const PRIVATE: &str = "Particulier";
const UNKNOWN: &str = "Inconnu";
const UNSPECIFIED: &str = "Non spécifiée";
const NOT_AVAILABLE: &str = "N/A";

const HEADER: [&str; 15] = [
    "ID",
    "Patient",
    "Document",
    "Email",
    "Téléphone",
    "Médecin",
    "Spécialité",
    "Date créneau",
    "Heure créneau",
    "Obra social",
    "Remise %",
    "Prix initial",
    "Prix final",
    "Statut",
    "Date réservation",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Aucune réservation à exporter")]
    NothingToExport,
}

/// Une réservation avec les enregistrements qu'elle référence.
/// Les références disparues depuis (médecin supprimé, ...) valent `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDetail {
    pub booking: Booking,
    pub doctor: Option<Doctor>,
    pub slot: Option<Slot>,
    pub specialty: Option<Specialty>,
    pub insurer: Option<Insurer>,
}

impl BookingDetail {
    pub fn resolve(db: &Database, booking: Booking) -> Self {
        Self {
            doctor: db.get_by_id(booking.doctor),
            slot: db.get_by_id(booking.slot),
            specialty: db.get_by_id(booking.specialty),
            insurer: booking.insurer.and_then(|id| db.get_by_id(id)),
            booking,
        }
    }

    pub fn doctor_name(&self) -> &str {
        self.doctor.as_ref().map_or(UNKNOWN, |d| d.name.as_str())
    }

    pub fn specialty_name(&self) -> &str {
        self.specialty.as_ref().map_or(UNSPECIFIED, |s| s.name.as_str())
    }

    pub fn insurer_name(&self) -> &str {
        self.insurer.as_ref().map_or(PRIVATE, |i| i.name.as_str())
    }

    pub fn slot_time(&self) -> Option<DateTime<Utc>> {
        self.slot.as_ref().map(|s| s.date_time)
    }
}

pub fn booking_details(db: &Database) -> Vec<BookingDetail> {
    db.list::<Booking>()
        .into_iter()
        .map(|booking| BookingDetail::resolve(db, booking))
        .collect()
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn row(detail: &BookingDetail) -> String {
    let booking = &detail.booking;
    let patient = &booking.patient;
    let slot_time = detail.slot_time();

    [
        booking.id.to_string(),
        quoted(&patient.name),
        quoted(&patient.document),
        quoted(&patient.email),
        quoted(&patient.phone),
        quoted(detail.doctor_name()),
        quoted(detail.specialty_name()),
        slot_time.map_or(NOT_AVAILABLE.to_owned(), |t| t.format("%d/%m/%Y").to_string()),
        slot_time.map_or(NOT_AVAILABLE.to_owned(), |t| t.format("%H:%M").to_string()),
        detail
            .insurer
            .as_ref()
            .map_or(PRIVATE.to_owned(), |i| quoted(&i.name)),
        booking.discount.to_string(),
        booking.original_price.to_string(),
        format!("{:.2}", booking.final_price),
        booking.status.to_string(),
        booking.created_at.format("%d/%m/%Y").to_string(),
    ]
    .join(SEPARATOR)
}

/// Toutes les réservations, une par ligne, séparées par des points-virgules
pub fn export_bookings_csv(db: &Database) -> Result<String, ExportError> {
    let details = booking_details(db);
    if details.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut csv = HEADER.join(SEPARATOR);
    csv.push('\n');
    for detail in &details {
        csv.push_str(&row(detail));
        csv.push('\n');
    }
    Ok(csv)
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("reservations_galeno_{}.csv", date.format("%Y-%m-%d"))
}
