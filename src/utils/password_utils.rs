//! Hachage et vérification des mots de passe

use argon2::{
    password_hash::{self, rand_core::OsRng, PasswordHashString, PasswordVerifier, SaltString},
    Argon2, PasswordHasher,
};
use derive_more::derive::Display;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

static DEFAULT_HASHER: Lazy<Argon2<'static>> = Lazy::new(Argon2::default);

/// Le hash d'un mot de passe quelconque, à utiliser quand l'utilisateur n'existe pas
/// pour éviter une attaque par canal auxiliaire
static DUMMY_HASH: Lazy<Option<PWHash>> = Lazy::new(|| hash("galeno-dummy-password").ok());

/// Un mot de passe haché
#[derive(Clone, Debug, Display)]
pub struct PWHash(PasswordHashString);

impl Serialize for PWHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PWHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let hash = PasswordHashString::from_str(&s)
            .map_err(|_| <D::Error as serde::de::Error>::custom("Invalid PHC string"))?;
        Ok(PWHash(hash))
    }
}

/// Calcule un haché a partir d'un mot de passe en clair, en choisissant un sel au hasard
pub fn hash(password: &str) -> Result<PWHash, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);

    // Argon2id avec le sel généré
    let hash = DEFAULT_HASHER
        .hash_password(password.as_bytes(), &salt)?
        .serialize();

    Ok(PWHash(hash))
}

/// Vérifie si le mot de passe correspond au hash stocké.
///
/// Si un hash n'est pas fourni, on teste quand même le mot de passe
/// avec un faux hash pour éviter une timing attack.
pub fn verify(password: &str, maybe_hash: Option<&PWHash>) -> bool {
    let Some(hash) = maybe_hash.or(DUMMY_HASH.as_ref()) else {
        return false;
    };

    let matches = DEFAULT_HASHER
        .verify_password(password.as_bytes(), &hash.0.password_hash())
        .is_ok();

    matches && maybe_hash.is_some()
}
