//! Définition des constantes globales pour l'application.

pub const DB_FILE: &str = "galeno.json"; // Document JSON contenant toutes les collections.
pub const DATA_DIR: &str = "./data"; // Fichiers de données initiales.
pub const LOG_FILE: &str = "./galeno.log";

// Clés des collections dans le stockage
pub const DOCTORS_KEY: &str = "medicos_galeno";
pub const INSURERS_KEY: &str = "obras_sociales_galeno";
pub const SPECIALTIES_KEY: &str = "especialidades_galeno";
pub const SLOTS_KEY: &str = "turnos_galeno";
pub const BOOKINGS_KEY: &str = "reservas_galeno";
pub const USERS_KEY: &str = "usuarios_galeno";

// Fichiers de données initiales, relatifs à DATA_DIR
pub const DOCTORS_FILE: &str = "medicos.json";
pub const INSURERS_FILE: &str = "obras-sociales.json";
pub const SPECIALTIES_FILE: &str = "especialidades.json";
pub const SLOTS_FILE: &str = "turnos.json";
