//! Patient registry.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::ListingConfig;
use crate::error::{require_id, LedgerError, LedgerResult, StoreContext};
use crate::ledger::validate_price;
use crate::listing::{ListQuery, Page, PatientSort, RawListQuery};
use crate::models::{NewPatient, Patient, PatientUpdate};
use crate::store::Transactional;

/// Longest accepted patient name, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Patient CRUD. Balances are read-only here.
pub struct PatientRegistry<'a, S: Transactional> {
    store: &'a S,
    listing: ListingConfig,
}

impl<'a, S: Transactional> PatientRegistry<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_listing(store, ListingConfig::default())
    }

    pub fn with_listing(store: &'a S, listing: ListingConfig) -> Self {
        Self { store, listing }
    }

    /// Register a patient with a zero balance.
    pub fn create(&self, input: NewPatient) -> LedgerResult<Patient> {
        let mut fields = BTreeMap::new();
        check_name(&input.name, &mut fields);
        check_email(input.email.as_deref(), &mut fields);
        if let Some(price) = input.consultation_price {
            check_price(price, &mut fields);
        }
        if !fields.is_empty() {
            return Err(LedgerError::invalid_fields("invalid patient", fields));
        }

        let mut patient = Patient::new(input.name.trim().to_string());
        patient.birth_date = input.birth_date;
        patient.photo = input.photo;
        patient.phone = input.phone;
        patient.email = input.email;
        patient.notes = input.notes;
        patient.consultation_price = input.consultation_price;

        self.store
            .store()
            .insert_patient(&patient)
            .context("failed to create patient")?;

        info!(patient_id = %patient.id, "Patient registered");
        Ok(patient)
    }

    /// Change profile fields. Consultations already created keep their price.
    pub fn update(&self, id: &str, update: PatientUpdate) -> LedgerResult<Patient> {
        require_id("id", id)?;
        if update.is_empty() {
            return Err(LedgerError::invalid_field("body", "nothing to update"));
        }

        let mut fields = BTreeMap::new();
        if let Some(name) = &update.name {
            check_name(name, &mut fields);
        }
        check_email(update.email.as_deref(), &mut fields);
        if let Some(price) = update.consultation_price {
            check_price(price, &mut fields);
        }
        if !fields.is_empty() {
            return Err(LedgerError::invalid_fields("invalid patient update", fields));
        }

        let patient = self.store.atomically(|tx| {
            let mut patient = tx
                .get_patient(id)
                .context("failed to load patient")?
                .ok_or_else(|| LedgerError::not_found("patient", id))?;
            update.apply(&mut patient);
            patient.name = patient.name.trim().to_string();
            if !tx
                .update_patient_profile(&patient)
                .context("failed to update patient")?
            {
                return Err(LedgerError::not_found("patient", id));
            }
            Ok(patient)
        })?;

        info!(patient_id = id, "Patient updated");
        Ok(patient)
    }

    /// Remove a patient with no consultations.
    pub fn delete(&self, id: &str) -> LedgerResult<()> {
        require_id("id", id)?;

        self.store.atomically(|tx| {
            if tx.get_patient(id).context("failed to load patient")?.is_none() {
                return Err(LedgerError::not_found("patient", id));
            }
            let consultations = tx
                .list_patient_consultations(id)
                .context("failed to load consultations")?;
            if !consultations.is_empty() {
                warn!(
                    patient_id = id,
                    consultations = consultations.len(),
                    "Refusing to delete patient with consultations"
                );
                return Err(LedgerError::business_rule(
                    "patient has consultations and cannot be deleted",
                ));
            }
            match tx.delete_patient(id) {
                Ok(true) => Ok(()),
                Ok(false) => Err(LedgerError::not_found("patient", id)),
                Err(e) if e.is_conflict() => Err(LedgerError::business_rule(
                    "patient has consultations and cannot be deleted",
                )),
                Err(e) => Err(LedgerError::Persistence {
                    context: "failed to delete patient".to_string(),
                    source: e,
                }),
            }
        })?;

        info!(patient_id = id, "Patient deleted");
        Ok(())
    }

    pub fn get(&self, id: &str) -> LedgerResult<Patient> {
        require_id("id", id)?;
        self.store
            .store()
            .get_patient(id)
            .context("failed to load patient")?
            .ok_or_else(|| LedgerError::not_found("patient", id))
    }

    /// Sorted, searchable page of patients.
    pub fn list(&self, query: &ListQuery<PatientSort>) -> LedgerResult<Page<Patient>> {
        let store = self.store.store();
        let total = store
            .count_patients(query.search.as_deref())
            .context("failed to count patients")?;
        let items = store.list_patients(query).context("failed to list patients")?;
        Ok(Page::new(items, total, query.page, query.limit))
    }

    pub fn list_raw(&self, query: &RawListQuery) -> LedgerResult<Page<Patient>> {
        let query = query.parse::<PatientSort>(self.listing.default_limit)?;
        self.list(&query)
    }
}

fn check_name(name: &str, fields: &mut BTreeMap<String, String>) {
    let name = name.trim();
    if name.is_empty() {
        fields.insert("name".to_string(), "name required".to_string());
    } else if name.chars().count() > MAX_NAME_CHARS {
        fields.insert(
            "name".to_string(),
            format!("name must be at most {} characters", MAX_NAME_CHARS),
        );
    }
}

fn check_email(email: Option<&str>, fields: &mut BTreeMap<String, String>) {
    if let Some(email) = email {
        if !email.is_empty() && !email.contains('@') {
            fields.insert("email".to_string(), "email must contain '@'".to_string());
        }
    }
}

fn check_price(price: Decimal, fields: &mut BTreeMap<String, String>) {
    if let Err(LedgerError::Validation { message, .. }) =
        validate_price("consultationPrice", price)
    {
        fields.insert("consultationPrice".to_string(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::ErrorKind;
    use crate::lifecycle::ConsultationLifecycle;
    use crate::listing::SortOrder;
    use rust_decimal_macros::dec;

    fn named(name: &str) -> NewPatient {
        NewPatient {
            name: name.to_string(),
            consultation_price: Some(dec!(100)),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_trims_and_starts_empty() {
        let db = Database::open_in_memory().unwrap();
        let patient = PatientRegistry::new(&db).create(named("  Ana  ")).unwrap();
        assert_eq!(patient.name, "Ana");
        assert_eq!(patient.credits, 0);

        let stored = PatientRegistry::new(&db).get(&patient.id).unwrap();
        assert_eq!(stored.consultation_price, Some(dec!(100)));
    }

    #[test]
    fn test_create_collects_field_errors() {
        let db = Database::open_in_memory().unwrap();
        let input = NewPatient {
            name: " ".into(),
            email: Some("nope".into()),
            consultation_price: Some(dec!(-1)),
            ..Default::default()
        };
        let err = PatientRegistry::new(&db).create(input).unwrap_err();
        let fields = err.fields().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["name"], "name required");
    }

    #[test]
    fn test_oversized_price_rejected_on_create_and_update() {
        let db = Database::open_in_memory().unwrap();
        let registry = PatientRegistry::new(&db);
        let input = NewPatient {
            consultation_price: Some(Decimal::MAX),
            ..named("Caio")
        };
        let err = registry.create(input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.fields().unwrap().contains_key("consultationPrice"));

        let patient = registry.create(named("Caio")).unwrap();
        let patch = PatientUpdate {
            consultation_price: Some(Decimal::from(i64::MAX)),
            ..Default::default()
        };
        let err = registry.update(&patient.id, patch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(registry.get(&patient.id).unwrap().consultation_price, Some(dec!(100)));
    }

    #[test]
    fn test_price_change_does_not_touch_consultations() {
        let db = Database::open_in_memory().unwrap();
        let registry = PatientRegistry::new(&db);
        let patient = registry.create(named("Bia")).unwrap();
        let created = ConsultationLifecycle::new(&db).create(&patient.id, None).unwrap();

        let update = PatientUpdate {
            consultation_price: Some(dec!(180)),
            ..Default::default()
        };
        let updated = registry.update(&patient.id, update).unwrap();
        assert_eq!(updated.consultation_price, Some(dec!(180)));

        let consultation = ConsultationLifecycle::new(&db)
            .get(&created.consultation.id)
            .unwrap();
        assert_eq!(consultation.consultation.price, dec!(100));
    }

    #[test]
    fn test_update_errors() {
        let db = Database::open_in_memory().unwrap();
        let registry = PatientRegistry::new(&db);
        assert_eq!(
            registry.update("x", PatientUpdate::default()).unwrap_err().kind(),
            ErrorKind::Validation
        );
        let update = PatientUpdate {
            notes: Some("n".into()),
            ..Default::default()
        };
        assert_eq!(registry.update("x", update).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_guard() {
        let db = Database::open_in_memory().unwrap();
        let registry = PatientRegistry::new(&db);
        let free = registry.create(named("Free")).unwrap();
        let busy = registry.create(named("Busy")).unwrap();
        ConsultationLifecycle::new(&db).create(&busy.id, None).unwrap();

        registry.delete(&free.id).unwrap();
        assert_eq!(registry.get(&free.id).unwrap_err().kind(), ErrorKind::NotFound);

        let err = registry.delete(&busy.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(registry.delete(&free.id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_search_and_sort() {
        let db = Database::open_in_memory().unwrap();
        let registry = PatientRegistry::new(&db);
        for name in ["Carla", "ana", "Bruno", "Mariana"] {
            registry.create(named(name)).unwrap();
        }

        let query = ListQuery::<PatientSort>::new(1, 10).unwrap().with_search("ANA");
        let page = registry.list(&query).unwrap();
        let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ana", "Mariana"]);
        assert_eq!(page.total_count, 2);

        let query = ListQuery::<PatientSort>::new(1, 2)
            .unwrap()
            .sorted(PatientSort::Name, SortOrder::Desc);
        let page = registry.list(&query).unwrap();
        assert_eq!(page.total_pages, 2);
        assert!(page.has_next_page);
        assert_eq!(page.items.len(), 2);
    }
}
