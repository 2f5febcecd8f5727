use bridge_api::{DecodeError, RawMessage};

/// Поля успешно декодированного payload'а.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Декодировать payload в JSON-объект.
///
/// Невалидные UTF-8 последовательности выбрасываются, пробелы по краям
/// обрезаются. Всё, что не JSON-объект, возвращается как `DecodeError`.
pub fn decode(payload: &[u8]) -> Result<Fields, DecodeError> {
    let text = lossy_utf8(payload);
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match value {
        serde_json::Value::Object(fields) => Ok(fields),
        serde_json::Value::Null => Err(DecodeError::NotAnObject("null")),
        serde_json::Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
        serde_json::Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        serde_json::Value::String(_) => Err(DecodeError::NotAnObject("string")),
        serde_json::Value::Array(_) => Err(DecodeError::NotAnObject("array")),
    }
}

/// `decode` для сообщения broker'а.
pub fn decode_message(raw: &RawMessage) -> Result<Fields, DecodeError> {
    decode(&raw.payload)
}

/// UTF-8 без невалидных последовательностей (они пропускаются, не заменяются).
fn lossy_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_payload_decodes() {
        let fields = decode(br#"{"temp": 21.5, "device_id": "esp32_01"}"#).unwrap();
        assert_eq!(fields.get("temp"), Some(&json!(21.5)));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b"not-json"), Err(DecodeError::Malformed(_))));
        assert_eq!(decode(b"42"), Err(DecodeError::NotAnObject("number")));
        assert_eq!(decode(b"[1,2,3]"), Err(DecodeError::NotAnObject("array")));
        assert_eq!(decode(br#""not json""#), Err(DecodeError::NotAnObject("string")));
        assert_eq!(decode(b"null"), Err(DecodeError::NotAnObject("null")));
        assert!(matches!(decode(br#"{"a": 1"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn empty_and_blank_payloads() {
        assert_eq!(decode(b""), Err(DecodeError::Empty));
        assert_eq!(decode(b"  \r\n"), Err(DecodeError::Empty));
        assert_eq!(decode(&[0xff, 0xfe]), Err(DecodeError::Empty));
    }

    #[test]
    fn invalid_utf8_is_dropped_not_fatal() {
        let mut payload = b"{\"name\": \"ab".to_vec();
        payload.push(0xff);
        payload.extend_from_slice(b"c\"}");
        let fields = decode(&payload).unwrap();
        assert_eq!(fields.get("name"), Some(&json!("abc")));
    }

    #[test]
    fn numbers_survive_exactly() {
        for literal in ["3485510186621062260e-13", "3236705911238380268e-6", "0.1", "-61"] {
            let fields = decode(format!(r#"{{"v": {literal}}}"#).as_bytes()).unwrap();
            assert_eq!(fields["v"].as_f64(), literal.parse::<f64>().ok(), "{literal}");
        }

        // целые за пределами u64 не превращаются в f64
        let fields = decode(br#"{"id": 123456789012345678901234567890}"#).unwrap();
        assert_eq!(fields["id"].to_string(), "123456789012345678901234567890");
        assert_eq!(
            serde_json::to_string(&fields).unwrap(),
            r#"{"id":123456789012345678901234567890}"#
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let fields = decode(b"\n  {\"status\": \"online\"}  \n").unwrap();
        assert_eq!(fields.get("status"), Some(&json!("online")));
    }
}
