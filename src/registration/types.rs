//! Registration request document and its canonical stored form.

use serde::{Deserialize, Serialize};

/// Top-level body of a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub personal_info: PersonalInfo,
    pub government_id: GovernmentId,
    #[serde(rename = "contact_details")]
    pub contact: ContactInfo,
    #[serde(rename = "travel_details")]
    pub travel: TravelDetails,
    #[serde(rename = "emergency_info")]
    pub emergency: EmergencyInfo,
    #[serde(default)]
    pub consent: Consent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub full_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub gender: String,
    pub nationality: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernmentId {
    pub id_type: String,
    pub id_number: String,
    #[serde(default)]
    pub id_document_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// E.164, e.g. `+919876543210`
    pub mobile_number: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelDetails {
    pub trip_itinerary: Vec<ItineraryItem>,
    pub arrival_date: String,
    pub departure_date: String,
    pub booking_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItineraryItem {
    pub city: String,
    pub check_in: String,
    pub check_out: String,
    #[serde(default)]
    pub accommodation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyInfo {
    #[serde(default)]
    pub contacts: Vec<EmergencyContact>,
    #[serde(default)]
    pub blood_group: String,
    #[serde(default)]
    pub medical_conditions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: String,
    pub mobile_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    #[serde(default)]
    pub live_tracking: bool,
    #[serde(default)]
    pub health_data_sharing: bool,
    #[serde(default)]
    pub data_usage_acknowledgement: bool,
}

/// The stored form of a registration: the request merged with the
/// generated id and the derived display fields.
///
/// Field order here is the serialization order, and the serialized bytes
/// are what gets digested, so reordering fields changes every digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub id: String,
    pub tourist_name: String,
    pub digital_id_expiry: String,
    #[serde(flatten)]
    pub request: RegisterRequest,
}

impl CanonicalDocument {
    pub fn new(id: impl Into<String>, request: RegisterRequest) -> Self {
        CanonicalDocument {
            id: id.into(),
            tourist_name: request.personal_info.full_name.clone(),
            digital_id_expiry: request.travel.departure_date.clone(),
            request,
        }
    }

    /// Deterministic serialized form (two-space indented JSON).
    pub fn to_canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Itinerary stops as carried on the ledger.
    pub fn itinerary_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.request.travel.trip_itinerary)
    }

    /// Emergency contacts as carried on the ledger.
    pub fn emergency_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.request.emergency.contacts)
    }
}
