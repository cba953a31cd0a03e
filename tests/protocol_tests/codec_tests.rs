//! Codec Tests
//!
//! Tests for request and response encoding/decoding.

use std::io::Cursor;
use std::time::Duration;

use meridian::key::compute_digest;
use meridian::operation::OperateArgs;
use meridian::protocol::codec::{
    HEADER_SIZE, INFO1_GET_ALL, INFO1_NOBINDATA, INFO1_READ, INFO2_CREATE_ONLY, INFO2_GENERATION,
    INFO2_WRITE, INFO3_UPDATE_ONLY, MAX_MESSAGE_SIZE,
};
use meridian::protocol::particle::MAX_NESTING_DEPTH;
use meridian::protocol::{
    decode_request, decode_response, encode_operate, encode_response, estimate_operate_size,
    read_request, read_response_header, write_response, RecordReader, Response, ResultCode,
};
use meridian::{
    Key, ListOperation, MapOperation, MeridianError, Operation, Policy, RecordExistsAction, Value,
};

fn encode(key: &Key, ops: &[Operation], policy: &Policy) -> Vec<u8> {
    let args = OperateArgs::new(ops, policy).unwrap();
    encode_operate(key, ops, &args, policy, Some(Duration::from_millis(250)))
        .unwrap()
        .to_vec()
}

// =============================================================================
// Request Encoding
// =============================================================================

#[test]
fn test_encode_operate_size_matches_estimate() {
    let key = Key::new("test", "users", "alice");
    let policy = Policy::builder().send_key(true).build();
    let ops = [
        Operation::put("name", "alice"),
        Operation::add("visits", 1),
        ListOperation::append("tags", "new"),
        Operation::get("visits"),
    ];
    let args = OperateArgs::new(&ops, &policy).unwrap();

    let bytes = encode_operate(&key, &ops, &args, &policy, None).unwrap();

    assert_eq!(bytes.len(), estimate_operate_size(&key, &args, &policy));
    let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    assert_eq!(declared + 4, bytes.len());
}

#[test]
fn test_request_decodes_to_same_operations() {
    let key = Key::new("test", "users", 42);
    let policy = Policy::builder().send_key(true).build();
    let ops = vec![
        Operation::add("count", 1),
        Operation::get("count"),
        Operation::put("blob", vec![1u8, 2, 3]),
        MapOperation::put("prefs", "theme", "dark"),
        Operation::get_all(),
    ];

    let request = decode_request(&encode(&key, &ops, &policy)).unwrap();

    assert_eq!(request.namespace, "test");
    assert_eq!(request.set, "users");
    assert_eq!(&request.digest, key.digest());
    assert_eq!(request.user_key, Some(Value::Int(42)));
    assert_eq!(request.operations, ops);
    assert_eq!(request.header.timeout_ms, 250);
}

#[test]
fn test_user_key_only_sent_on_request() {
    let key = Key::new("test", "users", "alice");

    let request = decode_request(&encode(&key, &[Operation::get_all()], &Policy::default())).unwrap();

    assert_eq!(request.header.field_count, 3);
    assert!(request.user_key.is_none());
}

#[test]
fn test_read_attributes() {
    let key = Key::new("test", "", "k");
    let policy = Policy::default();

    let request = decode_request(&encode(&key, &[Operation::get_all()], &policy)).unwrap();
    assert_eq!(request.header.info1, INFO1_READ | INFO1_GET_ALL);
    assert_eq!(request.header.info2, 0);

    let request = decode_request(&encode(&key, &[Operation::get_header()], &policy)).unwrap();
    assert_eq!(request.header.info1, INFO1_READ | INFO1_NOBINDATA);
    assert_eq!(request.header.op_count, 0);
}

#[test]
fn test_write_attributes_follow_policy() {
    let key = Key::new("test", "", "k");

    let policy = Policy::builder()
        .record_exists_action(RecordExistsAction::UpdateOnly)
        .expect_generation(7)
        .build();
    let request = decode_request(&encode(&key, &[Operation::put("a", 1)], &policy)).unwrap();
    assert_eq!(request.header.info2, INFO2_WRITE | INFO2_GENERATION);
    assert_eq!(request.header.info3, INFO3_UPDATE_ONLY);
    assert_eq!(request.header.generation, 7);

    let policy = Policy::builder()
        .record_exists_action(RecordExistsAction::CreateOnly)
        .build();
    let request = decode_request(&encode(&key, &[Operation::put("a", 1)], &policy)).unwrap();
    assert_eq!(request.header.info2, INFO2_WRITE | INFO2_CREATE_ONLY);
}

#[test]
fn test_oversized_request_rejected() {
    let key = Key::new("test", "", "big");
    let policy = Policy::default();
    let ops = [Operation::put("data", vec![0u8; MAX_MESSAGE_SIZE])];
    let args = OperateArgs::new(&ops, &policy).unwrap();

    let err = encode_operate(&key, &ops, &args, &policy, None).unwrap_err();

    assert!(matches!(err, MeridianError::BufferOverflow { max, .. } if max == MAX_MESSAGE_SIZE));
}

#[test]
fn test_operation_validation() {
    let policy = Policy::default();

    assert!(OperateArgs::new(&[], &policy).is_err());
    assert!(OperateArgs::new(&[Operation::put("", 1)], &policy).is_err());
    assert!(OperateArgs::new(&[Operation::put("a_very_long_bin_name", 1)], &policy).is_err());
    assert!(OperateArgs::new(&[Operation::append("s", 5)], &policy).is_err());

    let args = OperateArgs::new(&[Operation::get("a"), Operation::touch()], &policy).unwrap();
    assert!(args.has_write);

    let args = OperateArgs::new(&[ListOperation::size("l")], &policy).unwrap();
    assert!(!args.has_write);
}

// =============================================================================
// Response Decoding
// =============================================================================

#[test]
fn test_response_preserves_bin_order_and_duplicates() {
    let response = Response::ok(
        3,
        120,
        vec![
            ("count".to_string(), Value::Int(6)),
            ("name".to_string(), Value::from("x")),
            ("count".to_string(), Value::Int(6)),
        ],
    );

    let (code, header, bins) = decode_response(&encode_response(&response).unwrap()).unwrap();

    assert_eq!(code, ResultCode::Ok);
    assert_eq!(header.generation, 3);
    assert_eq!(header.expiration, 120);
    assert_eq!(bins, response.bins);
}

#[test]
fn test_collections_survive_wire() {
    let nested = Value::List(vec![
        Value::Int(1),
        Value::from("two"),
        Value::Map(vec![(Value::from("k"), Value::Float(1.5))]),
        Value::Nil,
    ]);
    let response = Response::ok(1, 0, vec![("l".to_string(), nested.clone())]);

    let (_, _, bins) = decode_response(&encode_response(&response).unwrap()).unwrap();

    assert_eq!(bins[0].1, nested);
}

#[test]
fn test_error_response_has_no_bins() {
    let bytes = encode_response(&Response::error(ResultCode::KeyNotFound)).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE);

    let (code, header, bins) = decode_response(&bytes).unwrap();
    assert_eq!(code, ResultCode::KeyNotFound);
    assert_eq!(header.op_count, 0);
    assert!(bins.is_empty());
}

#[test]
fn test_unknown_result_code_is_protocol_error() {
    let mut bytes = encode_response(&Response::ok(1, 0, vec![])).unwrap();
    bytes[7] = 250;

    assert!(matches!(decode_response(&bytes), Err(MeridianError::Protocol(_))));
}

#[test]
fn test_truncated_response_is_protocol_error() {
    let response = Response::ok(1, 0, vec![("name".to_string(), Value::from("alice"))]);
    let bytes = encode_response(&response).unwrap();

    for cut in [10, HEADER_SIZE + 2, bytes.len() - 1] {
        let result = decode_response(&bytes[..cut]);
        assert!(
            matches!(result, Err(MeridianError::Protocol(_))),
            "cut at {} gave {:?}",
            cut,
            result
        );
    }
}

#[test]
fn test_bin_record_overrunning_body_rejected() {
    let response = Response::ok(1, 0, vec![("a".to_string(), Value::Int(1))]);
    let mut bytes = encode_response(&response).unwrap();
    // Claim a bin record far larger than the message
    let record = HEADER_SIZE;
    bytes[record..record + 4].copy_from_slice(&1000u32.to_be_bytes());

    assert!(matches!(decode_response(&bytes), Err(MeridianError::Protocol(_))));

    bytes[record..record + 4].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(decode_response(&bytes), Err(MeridianError::Protocol(_))));
}

#[test]
fn test_field_size_beyond_body_rejected() {
    // One field whose size claims 4 GiB inside a 4-byte body
    let size = HEADER_SIZE - 4 + 4;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(size as u32).to_be_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.extend_from_slice(&u32::MAX.to_be_bytes());

    let mut cursor = Cursor::new(bytes);
    let (_, header) = read_response_header(&mut cursor).unwrap();
    let mut reader = RecordReader::new(&mut cursor, &header);

    assert!(matches!(reader.next(), Some(Err(MeridianError::Protocol(_)))));
    assert!(reader.next().is_none());
}

fn nested_list(depth: usize) -> Value {
    let mut value = Value::List(vec![]);
    for _ in 0..depth {
        value = Value::List(vec![value]);
    }
    value
}

#[test]
fn test_nesting_limit_on_responses() {
    let within = Response::ok(1, 0, vec![("l".to_string(), nested_list(MAX_NESTING_DEPTH))]);
    let (_, _, bins) = decode_response(&encode_response(&within).unwrap()).unwrap();
    assert_eq!(bins[0].1, nested_list(MAX_NESTING_DEPTH));

    let too_deep = Response::ok(1, 0, vec![("l".to_string(), nested_list(MAX_NESTING_DEPTH + 1))]);
    let result = decode_response(&encode_response(&too_deep).unwrap());
    assert!(matches!(result, Err(MeridianError::Protocol(_))), "got {:?}", result);
}

#[test]
fn test_deeply_nested_request_rejected() {
    let key = Key::new("test", "s", "deep");
    let bytes = encode(&key, &[Operation::put("l", nested_list(4 * MAX_NESTING_DEPTH))], &Policy::default());

    assert!(matches!(decode_request(&bytes), Err(MeridianError::Protocol(_))));
}

#[test]
fn test_record_reader_skips_fields() {
    // Header declaring one field and one bin record
    let field = [0u8, 0, 0, 3, 4, 0xAA, 0xBB];
    let bin = {
        let mut b = Vec::new();
        b.extend_from_slice(&(4u32 + 1 + 8).to_be_bytes());
        b.extend_from_slice(&[1, 1, 0, 1]);
        b.push(b'n');
        b.extend_from_slice(&9i64.to_be_bytes());
        b
    };
    let size = HEADER_SIZE - 4 + field.len() + bin.len();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(size as u32).to_be_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&[0; 12]);
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&field);
    bytes.extend_from_slice(&bin);

    let mut cursor = Cursor::new(bytes);
    let (code, header) = read_response_header(&mut cursor).unwrap();
    let mut reader = RecordReader::new(&mut cursor, &header);

    assert_eq!(code, ResultCode::Ok);
    assert_eq!(reader.next().unwrap().unwrap(), ("n".to_string(), Value::Int(9)));
    assert!(reader.next().is_none());
    assert_eq!(reader.bytes_left(), 0);
}

// =============================================================================
// Stream Helpers
// =============================================================================

#[test]
fn test_stream_request_and_response() {
    let key = Key::new("test", "s", "k");
    let bytes = encode(&key, &[Operation::put("a", 1), Operation::put("b", 2)], &Policy::default());

    let mut cursor = Cursor::new(bytes);
    let request = read_request(&mut cursor).unwrap();
    assert_eq!(request.operations.len(), 2);

    let mut out = Vec::new();
    write_response(&mut out, &Response::ok(2, 0, vec![])).unwrap();
    let (code, header) = read_response_header(&mut Cursor::new(out)).unwrap();
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(header.generation, 2);
}

#[test]
fn test_read_request_eof_is_io_error() {
    let mut cursor = Cursor::new(Vec::<u8>::new());

    match read_request(&mut cursor) {
        Err(MeridianError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("Expected EOF, got {:?}", other.map(|r| r.operations)),
    }
}

// =============================================================================
// Digests
// =============================================================================

#[test]
fn test_digest_depends_on_set_and_key() {
    let a = compute_digest("users", &Value::from("alice"));

    assert_eq!(a, compute_digest("users", &Value::from("alice")));
    assert_ne!(a, compute_digest("admins", &Value::from("alice")));
    assert_ne!(a, compute_digest("users", &Value::from("bob")));
    // Same bytes, different particle type
    assert_ne!(
        compute_digest("users", &Value::Blob(b"1".to_vec())),
        compute_digest("users", &Value::from("1"))
    );
    assert_eq!(Key::new("test", "users", "alice").digest(), &a);
}
