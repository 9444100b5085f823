//! Basecamp document payload.
//!
//! One basecamp document exists per trip; its document id equals the trip id.
//! Edits replace the whole location (last writer wins, no field merge).

use crate::model::document::{DocumentKind, DocumentPayload};
use crate::model::membership::UserId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const MAX_LABEL_CHARS: usize = 200;

/// Shared meeting point of a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasecampLocation {
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

impl BasecampLocation {
    /// Returns a copy with whitespace-normalized labels, or `None` when the
    /// coordinates or name are unusable.
    pub fn normalized(&self) -> Option<Self> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return None;
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return None;
        }
        let name = normalize_label(&self.name)?;
        let address = normalize_label(&self.address).unwrap_or_default();
        Some(Self {
            name,
            address,
            lat: self.lat,
            lng: self.lng,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Basecamp {
    pub location: Option<BasecampLocation>,
    pub updated_by: Option<UserId>,
    /// Epoch milliseconds of the last accepted edit.
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl DocumentPayload for Basecamp {
    const KIND: DocumentKind = DocumentKind::Basecamp;

    fn validate(&self) -> Result<(), String> {
        match &self.location {
            Some(location) if location.normalized().as_ref() != Some(location) => {
                Err("basecamp location is not normalized".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn normalize_label(value: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(value.trim(), " ");
    let truncated: String = collapsed.chars().take(MAX_LABEL_CHARS).collect();
    let label = truncated.trim_end();
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::{Basecamp, BasecampLocation};
    use crate::model::document::DocumentPayload;

    fn location(lat: f64, lng: f64) -> BasecampLocation {
        BasecampLocation {
            name: "  Casa   Azul ".to_string(),
            address: "Rua\tdas Flores 12\n".to_string(),
            lat,
            lng,
        }
    }

    #[test]
    fn normalizes_labels() {
        let normalized = location(38.7, -9.1).normalized().expect("valid location");
        assert_eq!(normalized.name, "Casa Azul");
        assert_eq!(normalized.address, "Rua das Flores 12");
    }

    #[test]
    fn rejects_out_of_range_and_non_finite_coordinates() {
        assert!(location(90.5, 0.0).normalized().is_none());
        assert!(location(0.0, -180.5).normalized().is_none());
        assert!(location(f64::NAN, 0.0).normalized().is_none());
        assert!(location(-90.0, 180.0).normalized().is_some());
    }

    #[test]
    fn truncated_label_never_ends_in_space() {
        let mut long = location(1.0, 1.0);
        long.name = format!("{} b", "a".repeat(199));
        let normalized = long.normalized().expect("valid location");
        assert_eq!(normalized.name, "a".repeat(199));
        assert_eq!(normalized.normalized().as_ref(), Some(&normalized));
    }

    #[test]
    fn rejects_blank_name() {
        let mut blank = location(1.0, 1.0);
        blank.name = " \n ".to_string();
        assert!(blank.normalized().is_none());
    }

    #[test]
    fn validate_requires_normalized_location() {
        let raw = Basecamp {
            location: Some(location(1.0, 1.0)),
            updated_by: None,
            updated_at: None,
        };
        assert!(raw.validate().is_err());

        let clean = Basecamp {
            location: location(1.0, 1.0).normalized(),
            updated_by: None,
            updated_at: None,
        };
        assert!(clean.validate().is_ok());
        assert!(Basecamp::default().validate().is_ok());
    }
}
