//! Record Tests
//!
//! Tests for merging decoded bins into a record.

use meridian::{BinValue, Record, Value};

#[test]
fn test_single_value_stays_scalar() {
    let mut record = Record::new(4, 100);
    record.add_bin("name".to_string(), Value::from("alice"));

    assert_eq!(record.get("name"), Some(&BinValue::Single(Value::from("alice"))));
    assert_eq!(record.value("name"), Some(&Value::from("alice")));
    assert_eq!(record.generation, 4);
    assert_eq!(record.expiration, 100);
}

#[test]
fn test_second_value_promotes_to_list() {
    let mut record = Record::new(1, 0);
    record.add_bin("count".to_string(), Value::Int(6));
    record.add_bin("count".to_string(), Value::Int(6));

    assert_eq!(
        record.get("count"),
        Some(&BinValue::Multi(vec![Value::Int(6), Value::Int(6)]))
    );
    assert_eq!(record.value("count"), None);
    assert_eq!(record.len(), 1);
}

#[test]
fn test_further_values_append_in_order() {
    let mut record = Record::new(1, 0);
    for i in 1..=4 {
        record.add_bin("n".to_string(), Value::Int(i));
    }

    let bin = record.get("n").unwrap();
    assert_eq!(
        bin.values(),
        &[Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
    );
    assert_eq!(bin.last(), &Value::Int(4));
}

#[test]
fn test_list_value_is_not_confused_with_promotion() {
    // A bin holding a list is still a single value
    let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
    let mut record = Record::new(1, 0);
    record.add_bin("l".to_string(), list.clone());

    assert_eq!(record.value("l"), Some(&list));
    assert_eq!(record.get("l").unwrap().values().len(), 1);
}

#[test]
fn test_bins_are_independent() {
    let mut record = Record::new(1, 0);
    record.add_bin("a".to_string(), Value::Int(1));
    record.add_bin("b".to_string(), Value::Int(2));
    record.add_bin("a".to_string(), Value::Int(3));

    assert_eq!(record.len(), 2);
    assert_eq!(record.value("b"), Some(&Value::Int(2)));
    assert!(record.value("a").is_none());
    assert!(!record.is_empty());
    assert!(Record::default().is_empty());
}

#[test]
fn test_record_serializes_scalars_and_lists() {
    let mut record = Record::new(2, 0);
    record.add_bin("name".to_string(), Value::from("x"));
    record.add_bin("n".to_string(), Value::Int(1));
    record.add_bin("n".to_string(), Value::Int(2));

    let json = serde_json::to_value(&record).unwrap();

    assert_eq!(json["bins"]["name"], serde_json::json!("x"));
    assert_eq!(json["bins"]["n"], serde_json::json!([1, 2]));
    assert_eq!(json["generation"], serde_json::json!(2));
}
