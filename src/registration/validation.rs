//! Shape checks for registration requests, kept apart from the type definitions.

use chrono::NaiveDate;

use crate::error::RegistryError;
use crate::registration::types::{EmergencyContact, ItineraryItem, RegisterRequest};

const DATE_FORMAT: &str = "%Y-%m-%d";
const GENDERS: [&str; 3] = ["Male", "Female", "Other"];

/// Longest accepted name. Keeps the credential payload within QR capacity.
pub const MAX_NAME_CHARS: usize = 200;

impl RegisterRequest {
    /// Collects every violation and reports them together.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut violations = Vec::new();

        let personal = &self.personal_info;
        require(&mut violations, "personal_info.full_name", &personal.full_name);
        if personal.full_name.chars().count() > MAX_NAME_CHARS {
            violations.push(format!(
                "personal_info.full_name must be at most {} characters",
                MAX_NAME_CHARS
            ));
        }
        check_date(&mut violations, "personal_info.date_of_birth", &personal.date_of_birth);
        if !GENDERS.contains(&personal.gender.as_str()) {
            violations.push(format!(
                "personal_info.gender must be one of {}",
                GENDERS.join(", ")
            ));
        }
        require(&mut violations, "personal_info.nationality", &personal.nationality);

        let gov = &self.government_id;
        require(&mut violations, "government_id.id_type", &gov.id_type);
        require(&mut violations, "government_id.id_number", &gov.id_number);
        if !gov.id_document_url.is_empty() && !is_http_url(&gov.id_document_url) {
            violations.push("government_id.id_document_url must be an http(s) URL".to_string());
        }

        check_e164(&mut violations, "contact_details.mobile_number", &self.contact.mobile_number);
        if !is_email(&self.contact.email) {
            violations.push("contact_details.email must be a valid email address".to_string());
        }

        let travel = &self.travel;
        if travel.trip_itinerary.is_empty() {
            violations.push("travel_details.trip_itinerary must contain at least one stop".to_string());
        }
        for (i, item) in travel.trip_itinerary.iter().enumerate() {
            check_itinerary_item(&mut violations, i, item);
        }
        check_date(&mut violations, "travel_details.arrival_date", &travel.arrival_date);
        check_date(&mut violations, "travel_details.departure_date", &travel.departure_date);
        require(&mut violations, "travel_details.booking_reference", &travel.booking_reference);

        for (i, contact) in self.emergency.contacts.iter().enumerate() {
            check_emergency_contact(&mut violations, i, contact);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Validation(violations.join("; ")))
        }
    }
}

fn check_itinerary_item(violations: &mut Vec<String>, i: usize, item: &ItineraryItem) {
    let prefix = format!("travel_details.trip_itinerary[{}]", i);
    require(violations, &format!("{}.city", prefix), &item.city);
    check_date(violations, &format!("{}.check_in", prefix), &item.check_in);
    check_date(violations, &format!("{}.check_out", prefix), &item.check_out);
}

fn check_emergency_contact(violations: &mut Vec<String>, i: usize, contact: &EmergencyContact) {
    let prefix = format!("emergency_info.contacts[{}]", i);
    require(violations, &format!("{}.name", prefix), &contact.name);
    require(violations, &format!("{}.relationship", prefix), &contact.relationship);
    check_e164(violations, &format!("{}.mobile_number", prefix), &contact.mobile_number);
}

fn require(violations: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(format!("{} is required", field));
    }
}

fn check_date(violations: &mut Vec<String>, field: &str, value: &str) {
    if NaiveDate::parse_from_str(value, DATE_FORMAT).is_err() {
        violations.push(format!("{} must be a date in YYYY-MM-DD format", field));
    }
}

fn check_e164(violations: &mut Vec<String>, field: &str, value: &str) {
    if !is_e164(value) {
        violations.push(format!("{} must be an E.164 phone number", field));
    }
}

/// `+` followed by 2 to 15 digits, the first of which is not zero.
pub fn is_e164(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    (2..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

pub fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
        && domain.contains('.')
}

pub fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e164() {
        assert!(is_e164("+919876543210"));
        assert!(is_e164("+14155550100"));
        assert!(!is_e164("919876543210"));
        assert!(!is_e164("+0123456"));
        assert!(!is_e164("+1234567890123456"));
        assert!(!is_e164("+91 98765"));
    }

    #[test]
    fn test_email() {
        assert!(is_email("asha@example.in"));
        assert!(!is_email("asha@example"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("asha@@example.com"));
        assert!(!is_email("asha @example.com"));
        assert!(!is_email("asha@.com"));
    }

    #[test]
    fn test_http_url() {
        assert!(is_http_url("https://docs.example.com/id.pdf"));
        assert!(is_http_url("http://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("https://"));
    }
}
