//! Wrapper d'appel à Casbin pour le contrôle d'accès de la console
//! d'administration

use casbin::CoreApi;
use log::{error, info};
use serde_json::json;
use thiserror::Error;

use crate::models::Session;

const CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/access_control/model.conf");
const POLICY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/access_control/policy.csv");

/// Un enforcer Casbin
pub struct Enforcer(casbin::Enforcer);

type CasbinResult = Result<(), AccessDenied>;

/// Une erreur sans détails en cas d'accès refusé
#[derive(Debug, Error)]
#[error("Accès refusé.")]
pub struct AccessDenied;

/// Un contexte contenant une référence à un enforcer et à la session courante.
pub struct Context<'ctx> {
    enforcer: &'ctx Enforcer,
    subject: &'ctx Session,
}

impl Enforcer {
    pub fn load() -> Result<Self, casbin::Error> {
        let mut enforcer = futures::executor::block_on(casbin::Enforcer::new(CONFIG, POLICY))?;
        futures::executor::block_on(enforcer.load_policy())?;
        Ok(Enforcer(enforcer))
    }

    pub fn with_subject<'ctx>(&'ctx self, subject: &'ctx Session) -> Context<'ctx> {
        Context {
            enforcer: self,
            subject,
        }
    }
}

impl Context<'_> {
    fn enforce(&self, collection: &str, action: &str) -> CasbinResult {
        let subject = self.subject;

        info!(
            "Enforcing {}",
            json!({ "sub": subject.username, "role": subject.role, "obj": collection, "act": action })
        );

        match self.enforcer.0.enforce((subject, collection, action)) {
            Err(e) => {
                error!("Casbin error: {e:?}");
                Err(AccessDenied)
            }
            Ok(r) => {
                info!("Granted: {r}");
                if r {
                    Ok(())
                } else {
                    Err(AccessDenied)
                }
            }
        }
    }

    /// Médecins, obras sociales, spécialités et créneaux. La lecture du
    /// catalogue est publique.
    pub fn write_catalog(&self, collection: &str) -> CasbinResult {
        self.enforce(collection, "write-catalog")
    }

    pub fn read_bookings(&self) -> CasbinResult {
        self.enforce(crate::consts::BOOKINGS_KEY, "read-bookings")
    }

    pub fn export_bookings(&self) -> CasbinResult {
        self.enforce(crate::consts::BOOKINGS_KEY, "export-bookings")
    }

    pub fn manage_users(&self) -> CasbinResult {
        self.enforce(crate::consts::USERS_KEY, "manage-users")
    }
}
