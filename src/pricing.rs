//! Calcul du prix final d'une consultation

use derive_more::Display;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Doctor, Insurer};

/// Prix après remise. Ni borne ni arrondi: les appelants valident la remise
/// avec [`Discount`], l'arrondi se fait à l'affichage.
pub fn final_price(base_price: f64, discount_percent: f64) -> f64 {
    base_price - base_price * discount_percent / 100.0
}

/// Formatage d'un montant pour l'affichage, à deux décimales
pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("La remise doit être un pourcentage entre 0 et 100 (reçu {0})")]
pub struct InvalidDiscount(pub f64);

/// Un pourcentage de remise validé, dans [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Display)]
#[display("{_0}%")]
pub struct Discount(f64);

impl Discount {
    pub const NONE: Discount = Discount(0.0);

    pub fn get(self) -> f64 {
        self.0
    }

    pub fn apply(self, base_price: f64) -> f64 {
        final_price(base_price, self.0)
    }
}

impl TryFrom<f64> for Discount {
    type Error = InvalidDiscount;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidDiscount(value))
        }
    }
}

/// Résumé du prix d'une réservation, avant ou après confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub original_price: f64,
    pub discount: Discount,
    pub final_price: f64,
    /// `None` pour une consultation particulière
    pub insurer: Option<String>,
}

impl Quote {
    pub fn new(doctor: &Doctor, insurer: Option<&Insurer>) -> Result<Self, InvalidDiscount> {
        let discount = match insurer {
            Some(insurer) => Discount::try_from(insurer.discount)?,
            None => Discount::NONE,
        };

        Ok(Self {
            original_price: doctor.price,
            discount,
            final_price: discount.apply(doctor.price),
            insurer: insurer.map(|i| i.name.clone()),
        })
    }
}
