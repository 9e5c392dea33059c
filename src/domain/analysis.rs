//! Derived data over a decoded FIT payload
//!
//! The payload is the loosely-typed object produced by the FIT decoder:
//! `recordMesgs`, `sessionMesgs`, `deviceInfoMesgs`, `activityMesgs`, each an
//! array of flat objects with snake_case field names. Every field is optional;
//! missing and `null` fields count as absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RECORD_MESGS: &str = "recordMesgs";
pub const SESSION_MESGS: &str = "sessionMesgs";
pub const DEVICE_INFO_MESGS: &str = "deviceInfoMesgs";
pub const ACTIVITY_MESGS: &str = "activityMesgs";

pub const ISSUE_NO_RECORDS: &str = "No records found";
pub const ISSUE_NO_GPS: &str = "No GPS data";
pub const ISSUE_NO_HEART_RATE: &str = "No heart rate data";

fn messages<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn records(payload: &Value) -> &[Value] {
    messages(payload, RECORD_MESGS)
}

pub fn sessions(payload: &Value) -> &[Value] {
    messages(payload, SESSION_MESGS)
}

pub fn devices(payload: &Value) -> &[Value] {
    messages(payload, DEVICE_INFO_MESGS)
}

/// First activity message, if any
pub fn activity(payload: &Value) -> Option<&Value> {
    messages(payload, ACTIVITY_MESGS).first()
}

fn present(record: &Value, field: &str) -> bool {
    record.get(field).is_some_and(|v| !v.is_null())
}

fn number(record: &Value, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round() as u32
}

/// Field coverage over the record stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub total_records: usize,
    pub gps_records: usize,
    pub heart_rate_records: usize,
    pub power_records: usize,
    pub cadence_records: usize,
    pub altitude_records: usize,
    pub has_gps: bool,
    pub has_heart_rate: bool,
    pub has_power: bool,
    pub has_cadence: bool,
    pub has_altitude: bool,
    pub gps_coverage: u32,
    pub heart_rate_coverage: u32,
    pub power_coverage: u32,
    pub cadence_coverage: u32,
    pub altitude_coverage: u32,
    /// `round(max(gps, hr, 1) / total * 100)`, 0 without records
    pub completeness: u32,
    pub issues: Vec<String>,
}

pub fn data_quality(records: &[Value]) -> DataQuality {
    let count = |pred: &dyn Fn(&Value) -> bool| records.iter().filter(|r| pred(r)).count();

    let total = records.len();
    let gps = count(&|r: &Value| present(r, "position_lat") && present(r, "position_long"));
    let hr = count(&|r: &Value| present(r, "heart_rate"));
    let power = count(&|r: &Value| present(r, "power"));
    let cadence = count(&|r: &Value| present(r, "cadence"));
    let altitude = count(&|r: &Value| present(r, "altitude") || present(r, "enhanced_altitude"));

    let mut issues = Vec::new();
    if total == 0 {
        issues.push(ISSUE_NO_RECORDS.to_string());
    }
    if gps == 0 {
        issues.push(ISSUE_NO_GPS.to_string());
    }
    if hr == 0 {
        issues.push(ISSUE_NO_HEART_RATE.to_string());
    }

    DataQuality {
        total_records: total,
        gps_records: gps,
        heart_rate_records: hr,
        power_records: power,
        cadence_records: cadence,
        altitude_records: altitude,
        has_gps: gps > 0,
        has_heart_rate: hr > 0,
        has_power: power > 0,
        has_cadence: cadence > 0,
        has_altitude: altitude > 0,
        gps_coverage: percent(gps, total),
        heart_rate_coverage: percent(hr, total),
        power_coverage: percent(power, total),
        cadence_coverage: percent(cadence, total),
        altitude_coverage: percent(altitude, total),
        completeness: percent(gps.max(hr).max(1), total),
        issues,
    }
}

/// Totals across all sessions, falling back to the record stream for peaks
/// and averages when no session carries them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub sport: Option<String>,
    pub session_count: usize,
    /// meters
    pub total_distance: Option<f64>,
    /// seconds
    pub total_elapsed_time: Option<f64>,
    pub total_timer_time: Option<f64>,
    pub total_calories: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
}

/// `None` when no message carries `field` or the total is not representable
/// as a JSON number
fn sum(msgs: &[Value], field: &str) -> Option<f64> {
    msgs.iter()
        .filter_map(|m| number(m, field))
        .reduce(|a, b| a + b)
        .filter(|t| t.is_finite())
}

fn max_of(msgs: &[Value], field: &str) -> Option<f64> {
    msgs.iter().filter_map(|m| number(m, field)).reduce(f64::max)
}

/// Running mean; stays finite where a plain sum would overflow
fn mean_of(msgs: &[Value], field: &str) -> Option<f64> {
    msgs.iter()
        .filter_map(|m| number(m, field))
        .enumerate()
        .fold(None, |mean, (i, v)| {
            let mean = mean.unwrap_or(0.0);
            Some(mean + (v - mean) / (i + 1) as f64)
        })
        .filter(|m: &f64| m.is_finite())
}

pub fn activity_summary(payload: &Value) -> ActivitySummary {
    let sessions = sessions(payload);
    let records = records(payload);

    let sport = sessions
        .iter()
        .find_map(|s| s.get("sport").and_then(Value::as_str))
        .map(str::to_string);

    let total_distance = sum(sessions, "total_distance")
        .filter(|d| *d != 0.0)
        .or_else(|| max_of(records, "distance"));

    ActivitySummary {
        sport,
        session_count: sessions.len(),
        total_distance,
        total_elapsed_time: sum(sessions, "total_elapsed_time"),
        total_timer_time: sum(sessions, "total_timer_time"),
        total_calories: sum(sessions, "total_calories"),
        avg_heart_rate: mean_of(sessions, "avg_heart_rate")
            .or_else(|| mean_of(records, "heart_rate")),
        max_heart_rate: max_of(sessions, "max_heart_rate")
            .or_else(|| max_of(records, "heart_rate")),
        avg_power: mean_of(sessions, "avg_power").or_else(|| mean_of(records, "power")),
        max_power: max_of(sessions, "max_power").or_else(|| max_of(records, "power")),
    }
}

/// Value stored at `fitFile.processedData`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedData {
    pub record_count: usize,
    pub session_count: usize,
    pub device_count: usize,
    pub has_activity: bool,
    pub summary: ActivitySummary,
}

pub fn process(payload: &Value) -> ProcessedData {
    ProcessedData {
        record_count: records(payload).len(),
        session_count: sessions(payload).len(),
        device_count: devices(payload).len(),
        has_activity: activity(payload).is_some(),
        summary: activity_summary(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn synthetic_records(total: usize, with_gps: usize) -> Vec<Value> {
        (0..total)
            .map(|i| {
                if i < with_gps {
                    json!({"timestamp": i, "position_lat": 1, "position_long": 2})
                } else {
                    json!({"timestamp": i, "position_lat": null})
                }
            })
            .collect()
    }

    #[test]
    fn test_quality_gps_scenario() {
        let quality = data_quality(&synthetic_records(10, 4));
        assert_eq!(quality.completeness, 40);
        assert!(quality.has_gps);
        assert_eq!(quality.gps_coverage, 40);
        assert!(!quality.issues.iter().any(|i| i == ISSUE_NO_GPS));
        assert!(quality.issues.iter().any(|i| i == ISSUE_NO_HEART_RATE));
    }

    #[test]
    fn test_gps_requires_both_coordinates() {
        let records = vec![json!({"position_lat": 1}), json!({"position_long": 2})];
        let quality = data_quality(&records);
        assert_eq!(quality.gps_records, 0);
        assert!(!quality.has_gps);
        // max(0, 0, 1) / 2
        assert_eq!(quality.completeness, 50);
    }

    #[test]
    fn test_quality_of_empty_stream() {
        let quality = data_quality(&[]);
        assert_eq!(quality.completeness, 0);
        assert_eq!(quality.issues.len(), 3);
    }

    #[test]
    fn test_completeness_uses_heart_rate_when_higher() {
        let records = vec![
            json!({"heart_rate": 120, "power": 200}),
            json!({"heart_rate": 130, "altitude": 5.0}),
            json!({"cadence": 80, "enhanced_altitude": 7.0}),
        ];
        let quality = data_quality(&records);
        assert_eq!(quality.completeness, 67);
        assert_eq!(quality.altitude_records, 2);
        assert_eq!(quality.power_coverage, 33);
        assert!(quality.has_cadence);
    }

    #[test]
    fn test_extraction_tolerates_missing_sections() {
        let payload = json!({"recordMesgs": "garbage"});
        assert!(records(&payload).is_empty());
        assert!(sessions(&payload).is_empty());
        assert!(activity(&payload).is_none());
        let processed = process(&payload);
        assert_eq!(processed.record_count, 0);
        assert!(!processed.has_activity);
    }

    #[test]
    fn test_summary_from_sessions() {
        let payload = json!({
            "sessionMesgs": [
                {
                    "sport": "cycling",
                    "total_distance": 1000.0,
                    "total_elapsed_time": 60.0,
                    "total_calories": 20,
                    "avg_heart_rate": 140,
                    "max_heart_rate": 170,
                    "max_power": 400
                },
                {
                    "total_distance": 500.0,
                    "total_elapsed_time": 30.0,
                    "avg_heart_rate": 120,
                    "max_heart_rate": 160
                }
            ],
            "recordMesgs": [{"power": 250}, {"power": 150}]
        });
        let summary = activity_summary(&payload);
        assert_eq!(summary.sport.as_deref(), Some("cycling"));
        assert_eq!(summary.session_count, 2);
        assert_eq!(summary.total_distance, Some(1500.0));
        assert_eq!(summary.total_elapsed_time, Some(90.0));
        assert_eq!(summary.total_timer_time, None);
        assert_eq!(summary.avg_heart_rate, Some(130.0));
        assert_eq!(summary.max_heart_rate, Some(170.0));
        assert_eq!(summary.max_power, Some(400.0));
        // No session average: fall back to records
        assert_eq!(summary.avg_power, Some(200.0));
    }

    #[test]
    fn test_summary_from_records_only() {
        let payload = json!({"recordMesgs": [
            {"distance": 10.0, "heart_rate": 100},
            {"distance": 25.0, "heart_rate": null}
        ]});
        let summary = activity_summary(&payload);
        assert_eq!(summary.total_distance, Some(25.0));
        assert_eq!(summary.max_heart_rate, Some(100.0));
        assert_eq!(summary.avg_power, None);
        assert!(summary.sport.is_none());
    }

    #[test]
    fn test_overflowing_totals_are_dropped() {
        let payload = json!({"sessionMesgs": [
            {"total_calories": 1e308, "avg_power": 1e308},
            {"total_calories": 1e308, "avg_power": 1e308}
        ]});
        let summary = activity_summary(&payload);
        assert_eq!(summary.total_calories, None);
        assert_eq!(summary.avg_power, Some(1e308));

        let encoded = serde_json::to_value(&summary).unwrap();
        let decoded: ActivitySummary = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.total_calories, None);
        assert_eq!(decoded.session_count, 2);
    }
}
