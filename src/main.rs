use std::fs;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use derive_more::Display;
use dotenv::dotenv;
use galeno::authorization::Enforcer;
use galeno::booking::{self, BookingFlow, FlowState, InsurerChoice, PatientForm};
use galeno::bootstrap;
use galeno::config::Config;
use galeno::db::Database;
use galeno::export::export_file_name;
use galeno::models::*;
use galeno::pricing::format_price;
use galeno::services::{DoctorInput, InsurerInput, Service, SlotInput};
use galeno::utils::input_validation::{password_feedback, password_validation, Username};
use inquire::{
    list_option::ListOption, Confirm, CustomType, DateSelect, Editor, error::InquireResult, InquireError,
    MultiSelect, Password, Select, Text,
};
use log::info;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

type MenuExit = Option<()>;
const MENU_EXIT: MenuExit = None;
const MENU_LOOP: MenuExit = Some(());

/// Représente un menu texte
trait Menu {
    /// Implémente le contenu du menu. La valeur de retour
    /// doit être None si le menu souhaite terminer,
    /// ou Some(()) s'il faut le relancer.
    fn enter(&mut self) -> Result<Option<()>>;

    /// Lance le menu en boucle, en interceptant les erreurs,
    /// sauf si le menu souhaite quitter.
    fn enter_loop(&mut self) {
        while let Some(result) = self.enter().transpose() {
            if let Err(error) = result {
                eprintln!("Erreur: {error}");
            }
        }
    }
}

fn local_time(date_time: DateTime<Utc>) -> String {
    date_time
        .with_timezone(&Local)
        .format("%d/%m/%Y %H:%M")
        .to_string()
}

fn username_input(message: &str) -> Result<Username> {
    Username::try_from(Text::new(message).prompt()?)
        .map_err(|_| anyhow!("Nom d'utilisateur invalide"))
}

/// Propose une liste, `None` si elle est vide ou si l'utilisateur annule
fn pick<T: std::fmt::Display>(message: &str, items: Vec<T>) -> Result<Option<T>> {
    if items.is_empty() {
        println!("[*] Aucun élément");
        return Ok(None);
    }
    Ok(Select::new(message, items).prompt_skippable()?)
}

/// Propose des libellés, et retourne l'indice choisi
fn pick_index(message: &str, labels: Vec<String>) -> Result<Option<usize>> {
    if labels.is_empty() {
        println!("[*] Aucun élément");
        return Ok(None);
    }
    selected_index(Select::new(message, labels).raw_prompt())
}

/// Échap revient en arrière au lieu d'être une erreur
fn selected_index<T>(answer: InquireResult<ListOption<T>>) -> Result<Option<usize>> {
    match answer {
        Ok(option) => Ok(Some(option.index)),
        Err(InquireError::OperationCanceled) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub struct App {
    service: Service,
}

impl App {
    pub fn new(service: Service) -> Self {
        App { service }
    }

    pub fn start(&mut self) -> Result<()> {
        println!("Bienvenue sur GALENO, la prise de rendez-vous médicaux en ligne.");
        self.enter_loop();
        self.service.save()?;
        Ok(())
    }

    fn login(&mut self) -> Result<()> {
        if !self.service.has_users() {
            println!("[*] Aucun compte n'existe encore: création du compte administrateur.");
            register(&mut self.service)?;
        }

        let username = username_input("Username: ")?;
        let password = Password::new("Entrez votre mot de passe : ")
            .without_confirmation()
            .with_display_mode(inquire::PasswordDisplayMode::Masked)
            .prompt()?;

        let session = self.service.login(&username, &password)?;
        eprintln!("[*] Bienvenue, {} ({}).", session.username, session.role);

        AdminMenu {
            service: &mut self.service,
        }
        .enter_loop();
        self.service.logout();
        Ok(())
    }
}

impl Menu for App {
    fn enter(&mut self) -> Result<MenuExit> {
        #[derive(EnumIter, Display)]
        enum Choice {
            #[display("Réserver un créneau")]
            Book,
            #[display("Console d'administration")]
            Admin,
            #[display("Quitter")]
            Exit,
        }

        let choice = Select::new("Que voulez-vous faire ?", Choice::iter().collect()).prompt()?;

        match choice {
            Choice::Book => BookingMenu {
                service: &mut self.service,
                flow: BookingFlow::new()
                    .with_observer(|state: &FlowState| println!("\n[*] Étape: {}", state.step())),
            }
            .enter_loop(),
            Choice::Admin => self.login()?,
            Choice::Exit => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

// ---------------------------------- Réservation ----------------------------------------------

struct BookingMenu<'srv> {
    service: &'srv mut Service,
    flow: BookingFlow,
}

#[derive(Display)]
enum Coverage {
    #[display("Particulier (sans obra social)")]
    SelfPay,
    #[display("{} (-{}%)", _0.name, _0.discount)]
    Insurer(Insurer),
}

impl Coverage {
    fn choice(&self) -> InsurerChoice {
        match self {
            Coverage::SelfPay => InsurerChoice::SelfPay,
            Coverage::Insurer(insurer) => InsurerChoice::Insurer(insurer.id),
        }
    }
}

/// Saisie du formulaire patient. `None` si l'utilisateur annule dès le nom.
fn patient_form(db: &Database) -> Result<Option<PatientForm>> {
    let Some(name) = Text::new("Nom et prénom:")
        .with_help_message("Échap pour revenir au choix du créneau")
        .prompt_skippable()?
    else {
        return Ok(None);
    };

    let document = Text::new("Numéro de document (DNI):").prompt()?;
    let birth_date = DateSelect::new("Date de naissance:")
        .with_max_date(Local::now().date_naive())
        .prompt()?;
    let gender = Select::new("Genre:", Gender::iter().collect()).prompt()?;
    let email = Text::new("Email:").prompt()?;
    let phone = Text::new("Téléphone:").prompt()?;
    let address = Text::new("Adresse (facultatif):").prompt()?;

    let mut coverages = vec![Coverage::SelfPay];
    coverages.extend(booking::active_insurers(db).into_iter().map(Coverage::Insurer));
    let coverage = Select::new("Prise en charge:", coverages).prompt()?;

    let policy_number = match coverage {
        Coverage::Insurer(_) => Text::new("Numéro d'affilié (facultatif):").prompt()?,
        Coverage::SelfPay => String::new(),
    };
    let reason = Text::new("Motif de la consultation (facultatif):").prompt()?;
    let accepted_terms = Confirm::new("Acceptez-vous les conditions générales ?")
        .with_default(false)
        .prompt()?;

    Ok(Some(PatientForm {
        name,
        document,
        birth_date: birth_date.format("%Y-%m-%d").to_string(),
        gender: Some(gender),
        email,
        phone,
        address,
        insurer: Some(coverage.choice()),
        policy_number,
        reason,
        accepted_terms,
    }))
}

impl Menu for BookingMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        let db = self.service.store();

        match self.flow.state().clone() {
            FlowState::SelectingDoctor => {
                let doctors = booking::doctors(db);
                let labels = doctors
                    .iter()
                    .map(|d| {
                        let specialty = db
                            .get_by_id::<Specialty>(d.specialty)
                            .map_or_else(|| "Non spécifiée".to_owned(), |s| s.name);
                        format!("{} - {} - {}", d.name, specialty, format_price(d.price))
                    })
                    .collect();

                let Some(index) = pick_index("Choisissez un médecin:", labels)? else {
                    return Ok(MENU_EXIT);
                };
                self.flow.select_doctor(db, doctors[index].id)?;
            }

            FlowState::SelectingSlot { doctor } => {
                let slots = booking::available_slots(db, doctor.id);
                if let Some(hours) = &doctor.office_hours {
                    println!("{}: {}", doctor.name, hours);
                }
                let labels = slots.iter().map(|s| local_time(s.date_time)).collect();

                match pick_index("Choisissez un créneau (Échap pour revenir):", labels)? {
                    Some(index) => self.flow.select_slot(db, slots[index].id)?,
                    None => self.flow.back()?,
                }
            }

            FlowState::EnteringDetails { doctor, slot } => {
                println!("{} - {}", doctor.name, local_time(slot.date_time));

                let Some(form) = patient_form(db)? else {
                    self.flow.back()?;
                    return Ok(MENU_LOOP);
                };

                let quote = self.flow.quote(db, form.insurer)?;
                println!(
                    "\nConsultation: {}\nRemise: {} ({})\nTotal à payer: {}\n",
                    format_price(quote.original_price),
                    quote.discount,
                    quote.insurer.as_deref().unwrap_or("particulier"),
                    format_price(quote.final_price),
                );

                if Confirm::new("Confirmer la réservation ?")
                    .with_default(true)
                    .prompt()?
                {
                    self.flow
                        .confirm(self.service.store_mut(), &form, Utc::now())?;
                }
            }

            FlowState::Confirmed { booking } => {
                println!(
                    "Réservation n°{} confirmée pour {}.\nMontant à payer: {}",
                    booking.id,
                    booking.patient.name,
                    format_price(booking.final_price)
                );
                return Ok(MENU_EXIT);
            }
        }
        Ok(MENU_LOOP)
    }
}

// ---------------------------------- Administration -------------------------------------------

fn register(service: &mut Service) -> Result<()> {
    let username = username_input("Username à enregistrer: ")?;
    let password = Password::new("Mot de passe: ")
        .with_display_mode(inquire::PasswordDisplayMode::Masked)
        .prompt()?;

    if !password_validation(&password, username.as_ref()) {
        for message in password_feedback(&password, username.as_ref()) {
            println!("[!] {message}");
        }
        return Err(anyhow!("Mot de passe trop faible"));
    }

    let email = Text::new("Email:").prompt()?;
    let role = if service.has_users() {
        Select::new("Rôle:", Role::iter().collect()).prompt()?
    } else {
        Role::Admin
    };

    service.register_user(username, &password, &email, role)?;
    println!("[*] Compte créé");
    Ok(())
}

struct AdminMenu<'srv> {
    service: &'srv mut Service,
}

impl Menu for AdminMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        #[derive(EnumIter, Display)]
        enum Choice {
            #[display("Médecins")]
            Doctors,
            #[display("Obras sociales")]
            Insurers,
            #[display("Spécialités")]
            Specialties,
            #[display("Créneaux")]
            Slots,
            #[display("Réservations")]
            Bookings,
            #[display("Exporter les réservations (CSV)")]
            Export,
            #[display("Comptes utilisateurs")]
            Users,
            #[display("Se déconnecter")]
            Logout,
        }

        let choice = Select::new("Administration:", Choice::iter().collect()).prompt()?;
        match choice {
            Choice::Doctors => DoctorsMenu { service: self.service }.enter_loop(),
            Choice::Insurers => InsurersMenu { service: self.service }.enter_loop(),
            Choice::Specialties => SpecialtiesMenu { service: self.service }.enter_loop(),
            Choice::Slots => SlotsMenu { service: self.service }.enter_loop(),
            Choice::Bookings => show_bookings(self.service)?,
            Choice::Export => {
                let csv = self.service.export_bookings()?;
                let file = export_file_name(Local::now().date_naive());
                fs::write(&file, csv)?;
                info!("Réservations exportées dans {file}");
                println!("[*] Réservations exportées dans {file}");
            }
            Choice::Users => {
                for user in self.service.list_users()? {
                    let state = if user.active { "actif" } else { "inactif" };
                    println!("[{}] {} - {} - {} ({state})", user.id, user.username, user.email, user.role);
                }
                if Confirm::new("Créer un compte ?").with_default(false).prompt()? {
                    register(self.service)?;
                }
            }
            Choice::Logout => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

#[derive(EnumIter, Display)]
enum CrudChoice {
    #[display("Lister")]
    List,
    #[display("Ajouter")]
    Create,
    #[display("Modifier")]
    Update,
    #[display("Supprimer")]
    Delete,
    #[display("Retour")]
    Back,
}

fn crud_choice(title: &str) -> Result<CrudChoice> {
    Ok(Select::new(title, CrudChoice::iter().collect()).prompt()?)
}

fn confirm_delete(what: &str) -> Result<bool> {
    Ok(Confirm::new(&format!("Supprimer {what} ?"))
        .with_default(false)
        .prompt()?)
}

struct DoctorsMenu<'srv> {
    service: &'srv mut Service,
}

fn doctor_input(service: &Service, current: Option<&Doctor>) -> Result<DoctorInput> {
    let mut license = CustomType::<u32>::new("Matrícula:");
    let mut price = CustomType::<f64>::new("Prix de la consultation:");
    if let Some(doctor) = current {
        license = license.with_default(doctor.license);
        price = price.with_default(doctor.price);
    }
    let text = |message: &str, initial: Option<&str>| -> Result<String> {
        Ok(Text::new(message)
            .with_initial_value(initial.unwrap_or_default())
            .prompt()?)
    };

    let license = license.prompt()?;
    let name = text("Nom:", current.map(|d| d.name.as_str()))?;
    let specialty = Select::new("Spécialité:", service.specialties())
        .prompt_skippable()?
        .map(|s| s.id);
    let price = price.prompt()?;

    let insurers = service.insurers();
    let selected: Vec<usize> = insurers
        .iter()
        .enumerate()
        .filter(|(_, i)| current.is_some_and(|d| d.accepts(i.id)))
        .map(|(index, _)| index)
        .collect();
    let insurers = if insurers.is_empty() {
        Vec::new()
    } else {
        MultiSelect::new("Obras sociales acceptées:", insurers)
            .with_default(&selected)
            .prompt()?
            .into_iter()
            .map(|i| i.id)
            .collect()
    };

    let image = text("Image (facultatif):", current.and_then(|d| d.image.as_deref()))?;
    let email = text("Email (facultatif):", current.and_then(|d| d.email.as_deref()))?;
    let phone = text("Téléphone (facultatif):", current.and_then(|d| d.phone.as_deref()))?;
    let office_hours = text(
        "Horaires (facultatif):",
        current.and_then(|d| d.office_hours.as_deref()),
    )?;
    let description = Editor::new("Description:")
        .with_predefined_text(current.map_or("", |d| d.description.as_str()))
        .prompt()?;

    Ok(DoctorInput {
        license,
        name,
        specialty,
        price,
        insurers,
        image,
        email,
        phone,
        office_hours,
        description,
    })
}

impl Menu for DoctorsMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        match crud_choice("Médecins:")? {
            CrudChoice::List => {
                for doctor in self.service.doctors() {
                    println!(
                        "[{}] {} - matrícula {} - {}",
                        doctor.id,
                        doctor.name,
                        doctor.license,
                        format_price(doctor.price)
                    );
                }
            }
            CrudChoice::Create => {
                let input = doctor_input(self.service, None)?;
                let id = self.service.create_doctor(input)?;
                println!("[*] Médecin {id} créé");
            }
            CrudChoice::Update => {
                if let Some(doctor) = pick("Médecin à modifier:", self.service.doctors())? {
                    let input = doctor_input(self.service, Some(&doctor))?;
                    self.service.update_doctor(doctor.id, input)?;
                }
            }
            CrudChoice::Delete => {
                if let Some(doctor) = pick("Médecin à supprimer:", self.service.doctors())? {
                    if confirm_delete(&doctor.name)? {
                        self.service.delete_doctor(doctor.id)?;
                    }
                }
            }
            CrudChoice::Back => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

struct InsurersMenu<'srv> {
    service: &'srv mut Service,
}

fn insurer_input(current: Option<&Insurer>) -> Result<InsurerInput> {
    let name = Text::new("Nom:")
        .with_initial_value(current.map_or("", |i| i.name.as_str()))
        .prompt()?;
    let discount = CustomType::<f64>::new("Remise (%):")
        .with_default(current.map_or(0.0, |i| i.discount))
        .prompt()?;
    let logo = Text::new("Logo (facultatif):")
        .with_initial_value(current.and_then(|i| i.logo.as_deref()).unwrap_or_default())
        .prompt()?;
    let active = Confirm::new("Active ?")
        .with_default(current.map_or(true, |i| i.active))
        .prompt()?;

    Ok(InsurerInput {
        name,
        discount,
        logo,
        active,
    })
}

impl Menu for InsurersMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        match crud_choice("Obras sociales:")? {
            CrudChoice::List => {
                for insurer in self.service.insurers() {
                    let state = if insurer.active { "active" } else { "inactive" };
                    println!("[{}] {} - {}% ({state})", insurer.id, insurer.name, insurer.discount);
                }
            }
            CrudChoice::Create => {
                let id = self.service.create_insurer(insurer_input(None)?)?;
                println!("[*] Obra social {id} créée");
            }
            CrudChoice::Update => {
                if let Some(insurer) = pick("Obra social à modifier:", self.service.insurers())? {
                    let input = insurer_input(Some(&insurer))?;
                    self.service.update_insurer(insurer.id, input)?;
                }
            }
            CrudChoice::Delete => {
                if let Some(insurer) = pick("Obra social à supprimer:", self.service.insurers())? {
                    if confirm_delete(&insurer.name)? {
                        self.service.delete_insurer(insurer.id)?;
                    }
                }
            }
            CrudChoice::Back => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

struct SpecialtiesMenu<'srv> {
    service: &'srv mut Service,
}

impl Menu for SpecialtiesMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        match crud_choice("Spécialités:")? {
            CrudChoice::List => {
                for specialty in self.service.specialties() {
                    println!("[{}] {}", specialty.id, specialty.name);
                }
            }
            CrudChoice::Create => {
                let name = Text::new("Nom:").prompt()?;
                self.service.create_specialty(&name)?;
            }
            CrudChoice::Update => {
                if let Some(specialty) = pick("Spécialité à modifier:", self.service.specialties())? {
                    let name = Text::new("Nom:")
                        .with_initial_value(&specialty.name)
                        .prompt()?;
                    self.service.update_specialty(specialty.id, &name)?;
                }
            }
            CrudChoice::Delete => {
                if let Some(specialty) = pick("Spécialité à supprimer:", self.service.specialties())? {
                    if confirm_delete(&specialty.name)? {
                        self.service.delete_specialty(specialty.id)?;
                    }
                }
            }
            CrudChoice::Back => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

struct SlotsMenu<'srv> {
    service: &'srv mut Service,
}

impl SlotsMenu<'_> {
    fn label(&self, slot: &Slot) -> String {
        let doctor = self
            .service
            .store()
            .get_by_id::<Doctor>(slot.doctor)
            .map_or_else(|| "Inconnu".to_owned(), |d| d.name);
        let state = if slot.available { "libre" } else { "réservé" };
        format!("[{}] {} - {doctor} ({state})", slot.id, local_time(slot.date_time))
    }

    fn pick_slot(&self, message: &str) -> Result<Option<Slot>> {
        let slots = self.service.slots();
        let labels = slots.iter().map(|s| self.label(s)).collect();
        Ok(pick_index(message, labels)?.map(|index| slots[index].clone()))
    }

    fn input(&self, current: Option<&Slot>) -> Result<SlotInput> {
        let doctor = Select::new("Médecin:", self.service.doctors())
            .prompt_skippable()?
            .ok_or(anyhow!("Aucun médecin choisi"))?;

        let current_local = current.map(|s| s.date_time.with_timezone(&Local));
        let mut date = DateSelect::new("Date:").with_min_date(Local::now().date_naive());
        if let Some(current) = current_local {
            date = date.with_starting_date(current.date_naive());
        }
        let date = date.prompt()?;

        let time = Text::new("Heure (HH:MM):")
            .with_initial_value(&current_local.map_or_else(String::new, |t| t.format("%H:%M").to_string()))
            .prompt()?;
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
            .map_err(|_| anyhow!("Heure invalide"))?;

        let date_time = Local
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or(anyhow!("Heure ambiguë ou inexistante"))?
            .with_timezone(&Utc);

        let available = Confirm::new("Disponible ?")
            .with_default(current.map_or(true, |s| s.available))
            .prompt()?;

        Ok(SlotInput {
            doctor: doctor.id,
            date_time,
            available,
        })
    }
}

impl Menu for SlotsMenu<'_> {
    fn enter(&mut self) -> Result<Option<()>> {
        match crud_choice("Créneaux:")? {
            CrudChoice::List => {
                for slot in self.service.slots() {
                    println!("{}", self.label(&slot));
                }
            }
            CrudChoice::Create => {
                let input = self.input(None)?;
                let id = self.service.create_slot(input, Utc::now())?;
                println!("[*] Créneau {id} créé");
            }
            CrudChoice::Update => {
                if let Some(slot) = self.pick_slot("Créneau à modifier:")? {
                    let input = self.input(Some(&slot))?;
                    self.service.update_slot(slot.id, input, Utc::now())?;
                }
            }
            CrudChoice::Delete => {
                if let Some(slot) = self.pick_slot("Créneau à supprimer:")? {
                    if confirm_delete(&format!("le créneau {}", slot.id))? {
                        self.service.delete_slot(slot.id)?;
                    }
                }
            }
            CrudChoice::Back => return Ok(MENU_EXIT),
        }
        Ok(MENU_LOOP)
    }
}

fn show_bookings(service: &Service) -> Result<()> {
    let details = service.list_bookings()?;
    let labels = details
        .iter()
        .map(|d| {
            format!(
                "[{}] {} - {} - {}",
                d.booking.id,
                d.booking.patient.name,
                d.doctor_name(),
                d.slot_time().map_or_else(|| "N/A".to_owned(), local_time)
            )
        })
        .collect();

    let Some(index) = pick_index("Choisissez une réservation:", labels)? else {
        return Ok(());
    };
    let detail = service.booking_detail(details[index].booking.id)?;
    let booking = &detail.booking;
    let patient = &booking.patient;

    println!(
        "\n[{}] {}\nPatient: {} (DNI {}, né(e) le {}, {})\nContact: {} / {}",
        booking.id,
        booking.status,
        patient.name,
        patient.document,
        patient.birth_date.format("%d/%m/%Y"),
        patient.gender,
        patient.email,
        patient.phone,
    );
    if let Some(address) = &patient.address {
        println!("Adresse: {address}");
    }
    println!(
        "Médecin: {} ({})\nCréneau: {}",
        detail.doctor_name(),
        detail.specialty_name(),
        detail.slot_time().map_or_else(|| "N/A".to_owned(), local_time)
    );
    println!(
        "Prise en charge: {}{}",
        detail.insurer_name(),
        patient
            .policy_number
            .as_deref()
            .map(|n| format!(" (affilié {n})"))
            .unwrap_or_default()
    );
    println!(
        "Prix: {} - {}% = {}",
        format_price(booking.original_price),
        booking.discount,
        format_price(booking.final_price)
    );
    if let Some(reason) = &patient.reason {
        println!("Motif: {reason}");
    }
    println!("Réservé le {}\n===============", local_time(booking.created_at));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::from_env();
    simple_logging::log_to_file(&config.log_file, log::LevelFilter::Info)?;

    let mut db = Database::open(config.db_file.clone())?;
    let seeded = bootstrap::seed(&mut db, &config.data_dir)?;
    info!("{seeded} collection(s) chargée(s) depuis {}", config.data_dir.display());

    let enforcer = Enforcer::load()?;
    App::new(Service::new(db, enforcer)).start()
}
