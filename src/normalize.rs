//! Turns raw firmware reports into canonical records.

use crate::error::IngestError;
use crate::models::{FieldValue, NodeIdentity, RawReport, Record, SensorDataValue};

// ---

/// Parse every `{value_type, value}` pair into a numeric field.
///
/// Keys are taken verbatim from `value_type`; a repeated key overwrites the
/// earlier entry. Any value that is not a finite base-10 number rejects the
/// whole report.
pub fn normalize(values: &[SensorDataValue]) -> Result<Record, IngestError> {
    // ---
    let mut record = Record::new();

    for dp in values {
        let parsed = dp
            .value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| IngestError::MalformedValue {
                value_type: dp.value_type.clone(),
                value: dp.value.clone(),
            })?;

        record.insert(dp.value_type.clone(), FieldValue::Number(parsed));
    }

    Ok(record)
}

/// Derive the node identity; the ESP id wins over the Raspberry id.
pub fn node_identity(report: &RawReport) -> NodeIdentity {
    // ---
    if let Some(id) = &report.esp8266id {
        NodeIdentity::new("esp8266", id)
    } else if let Some(id) = &report.raspiid {
        NodeIdentity::new("raspi", id)
    } else {
        NodeIdentity::unknown()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_normalize_parses_values() {
        // ---
        let values = vec![
            SensorDataValue::new("SDS_P1", "12.5"),
            SensorDataValue::new("SDS_P2", "7.3"),
        ];

        let record = normalize(&values).unwrap();

        assert_eq!(record.len(), 2);
        assert_eq!(record["SDS_P1"], FieldValue::Number(12.5));
        assert_eq!(record["SDS_P2"], FieldValue::Number(7.3));
    }

    #[test]
    fn test_duplicate_value_type_last_wins() {
        // ---
        let values = vec![
            SensorDataValue::new("temperature", "21.0"),
            SensorDataValue::new("temperature", "22.5"),
        ];

        let record = normalize(&values).unwrap();

        assert_eq!(record.len(), 1);
        assert_eq!(record["temperature"], FieldValue::Number(22.5));
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        // ---
        let values = vec![
            SensorDataValue::new("SDS_P1", "12.5"),
            SensorDataValue::new("SDS_P2", "n/a"),
        ];

        let err = normalize(&values).unwrap_err();
        assert_eq!(
            err,
            IngestError::MalformedValue {
                value_type: "SDS_P2".into(),
                value: "n/a".into()
            }
        );
    }

    #[test]
    fn test_non_finite_value_is_rejected() {
        // ---
        assert!(normalize(&[SensorDataValue::new("lux", "NaN")]).is_err());
        assert!(normalize(&[SensorDataValue::new("lux", "inf")]).is_err());
    }

    #[test]
    fn test_empty_input_gives_empty_record() {
        assert!(normalize(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_node_identity_derivation() {
        // ---
        let esp = RawReport {
            esp8266id: Some("42".into()),
            ..Default::default()
        };
        assert_eq!(node_identity(&esp).as_str(), "esp8266-42");

        let raspi = RawReport {
            raspiid: Some("9".into()),
            ..Default::default()
        };
        assert_eq!(node_identity(&raspi).as_str(), "raspi-9");

        let both = RawReport {
            esp8266id: Some("42".into()),
            raspiid: Some("9".into()),
            ..Default::default()
        };
        assert_eq!(node_identity(&both).as_str(), "esp8266-42");

        assert_eq!(node_identity(&RawReport::default()).as_str(), "unknown");
    }
}
