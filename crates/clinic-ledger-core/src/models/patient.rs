//! Patient models.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A patient record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Opaque UUID, generated locally
    pub id: String,
    /// Full name
    pub name: String,
    /// Date of birth (age is derived from it at query time)
    pub birth_date: Option<NaiveDate>,
    /// Photo reference (path or URL, rendered by the shell)
    pub photo: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Free-form notes about the patient
    pub notes: Option<String>,
    /// Price of a single consultation; required before credits can be sold
    pub consultation_price: Option<Decimal>,
    /// Prepaid consultation balance. Only the credit ledger changes it.
    pub credits: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Create a new patient with no credits.
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            birth_date: None,
            photo: None,
            phone: None,
            email: None,
            notes: None,
            consultation_price: None,
            credits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The default consultation price, if one is set and positive.
    /// Credit sales and price-less consultations both need it.
    pub fn billable_price(&self) -> Option<Decimal> {
        self.consultation_price.filter(|price| *price > Decimal::ZERO)
    }

    /// Age in whole years on the given day.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.map(|birth| age_between(birth, today))
    }

    /// Minimal projection returned alongside consultations.
    pub fn summary(&self) -> PatientSummary {
        PatientSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            photo: self.photo.clone(),
            birth_date: self.birth_date,
        }
    }
}

/// Completed years between `birth` and `today`; zero for future dates.
pub fn age_between(birth: NaiveDate, today: NaiveDate) -> u32 {
    if today < birth {
        return 0;
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Patient projection joined onto consultation results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientSummary {
    pub id: String,
    pub name: String,
    pub photo: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

/// Input for registering a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewPatient {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub photo: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub consultation_price: Option<Decimal>,
}

/// Profile changes for an existing patient. `None` leaves a field as is.
///
/// Credits are not editable here: the balance moves only through sales
/// and consumptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PatientUpdate {
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub photo: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub consultation_price: Option<Decimal>,
}

impl PatientUpdate {
    pub fn is_empty(&self) -> bool {
        self == &PatientUpdate::default()
    }

    /// Apply the changes onto `patient`.
    pub fn apply(self, patient: &mut Patient) {
        if let Some(name) = self.name {
            patient.name = name;
        }
        if self.birth_date.is_some() {
            patient.birth_date = self.birth_date;
        }
        if self.photo.is_some() {
            patient.photo = self.photo;
        }
        if self.phone.is_some() {
            patient.phone = self.phone;
        }
        if self.email.is_some() {
            patient.email = self.email;
        }
        if self.notes.is_some() {
            patient.notes = self.notes;
        }
        if self.consultation_price.is_some() {
            patient.consultation_price = self.consultation_price;
        }
        patient.updated_at = Utc::now();
    }
}
