/**
 * CREW CONTACTS - Address book for on-site staff
 *
 * ROLE:
 * Keeps the people a dispatch can reach (security leads, duty managers,
 * operations crew, medics) and answers "who should hear about this zone".
 *
 * HOW IT WORKS:
 * - JSON file on disk, mirrored in an in-memory cache
 * - Every mutation rewrites the whole file (small book, rare writes)
 * - Zone type decides the contact group; zones without a dedicated group
 *   route to everyone
 */

use crate::venues::ZoneType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("Contact not found: {0}")]
    NotFound(String),
    #[error("Invalid contact: {0}")]
    Invalid(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactGroup {
    Security,
    Management,
    Operations,
    Medical,
}

impl ContactGroup {
    /// Group responsible for a zone, `None` meaning every contact.
    pub fn for_zone(zone_type: ZoneType) -> Option<Self> {
        match zone_type {
            ZoneType::Entrance | ZoneType::Exit | ZoneType::Security => Some(ContactGroup::Security),
            ZoneType::Facility | ZoneType::FoodCourt => Some(ContactGroup::Operations),
            ZoneType::Seating => Some(ContactGroup::Management),
            ZoneType::Concourse | ZoneType::Parking => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    pub role: String,
    pub group: ContactGroup,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub role: String,
    pub group: ContactGroup,
    #[serde(default)]
    pub is_primary: bool,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub role: Option<String>,
    pub group: Option<ContactGroup>,
    pub is_primary: Option<bool>,
}

fn require(field: &str, value: &str) -> Result<(), ContactError> {
    if value.trim().is_empty() {
        return Err(ContactError::Invalid(format!("{field} must not be blank")));
    }
    Ok(())
}

pub struct ContactBook {
    storage_path: PathBuf,
    cache: parking_lot::Mutex<Vec<Contact>>,
}

impl ContactBook {
    /// Opens the book, creating an empty file on first use.
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, ContactError> {
        let book = Self {
            storage_path: storage_path.into(),
            cache: parking_lot::Mutex::new(Vec::new()),
        };
        book.load_from_disk()?;
        info!("[contacts] {} contacts loaded from {}", book.cache.lock().len(), book.storage_path.display());
        Ok(book)
    }

    fn load_from_disk(&self) -> Result<(), ContactError> {
        if !self.storage_path.exists() {
            if let Some(parent) = self.storage_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.storage_path, "[]")?;
        }
        let content = fs::read_to_string(&self.storage_path)?;
        *self.cache.lock() = serde_json::from_str(&content)?;
        Ok(())
    }

    fn save(&self, contacts: &[Contact]) -> Result<(), ContactError> {
        fs::write(&self.storage_path, serde_json::to_string_pretty(contacts)?)?;
        Ok(())
    }

    pub fn list(&self, group: Option<ContactGroup>) -> Vec<Contact> {
        self.cache
            .lock()
            .iter()
            .filter(|c| group.map_or(true, |g| c.group == g))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Contact> {
        self.cache.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn add(&self, new: NewContact) -> Result<Contact, ContactError> {
        require("name", &new.name)?;
        require("phone", &new.phone)?;

        let now = OffsetDateTime::now_utc();
        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            phone: new.phone,
            email: new.email,
            whatsapp: new.whatsapp,
            role: new.role,
            group: new.group,
            is_primary: new.is_primary,
            created_at: now,
            updated_at: now,
        };

        let mut cache = self.cache.lock();
        let mut next = cache.clone();
        next.push(contact.clone());
        self.save(&next)?;
        *cache = next;
        info!("[contacts] added {} ({:?})", contact.id, contact.group);
        Ok(contact)
    }

    pub fn update(&self, id: &str, update: ContactUpdate) -> Result<Contact, ContactError> {
        if let Some(name) = &update.name {
            require("name", name)?;
        }
        if let Some(phone) = &update.phone {
            require("phone", phone)?;
        }

        let mut cache = self.cache.lock();
        let mut next = cache.clone();
        let contact = next
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContactError::NotFound(id.to_string()))?;

        if let Some(v) = update.name { contact.name = v; }
        if let Some(v) = update.phone { contact.phone = v; }
        if let Some(v) = update.email { contact.email = Some(v); }
        if let Some(v) = update.whatsapp { contact.whatsapp = Some(v); }
        if let Some(v) = update.role { contact.role = v; }
        if let Some(v) = update.group { contact.group = v; }
        if let Some(v) = update.is_primary { contact.is_primary = v; }
        contact.updated_at = OffsetDateTime::now_utc();

        let updated = contact.clone();
        self.save(&next)?;
        *cache = next;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<(), ContactError> {
        let mut cache = self.cache.lock();
        if !cache.iter().any(|c| c.id == id) {
            return Err(ContactError::NotFound(id.to_string()));
        }
        let next: Vec<Contact> = cache.iter().filter(|c| c.id != id).cloned().collect();
        self.save(&next)?;
        *cache = next;
        info!("[contacts] deleted {id}");
        Ok(())
    }

    /// Crew to notify for a zone, primary contacts first.
    pub fn crew_for_zone(&self, zone_type: ZoneType) -> Vec<Contact> {
        let mut crew = self.list(ContactGroup::for_zone(zone_type));
        crew.sort_by_key(|c| !c.is_primary);
        crew
    }
}
