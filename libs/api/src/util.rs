/// Текущее Unix-время в секундах.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Проверить topic filter на корректность.
///
/// - `+` занимает уровень целиком;
/// - `#` занимает уровень целиком и только последний;
/// - пустой filter невалиден.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        l => !l.contains('+') && !l.contains('#'),
    })
}

/// Сопоставить конкретный topic с filter'ом (`+` и завершающий `#`).
///
/// - `"plant/+/telemetry"` ~ `"plant/esp32_01/telemetry"`
/// - `"plant/#"` ~ `"plant"`, `"plant/a/b"`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(fl), Some(tl)) if fl == tl => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Короткое человекочитаемое представление payload для логов.
pub fn preview(payload: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_matches() {
        assert!(topic_matches("plant/esp32_01/telemetry", "plant/esp32_01/telemetry"));
        assert!(topic_matches("plant/+/telemetry", "plant/esp32_02/telemetry"));
        assert!(topic_matches("plant/#", "plant"));
        assert!(topic_matches("plant/#", "plant/a/b/c"));
        assert!(!topic_matches("plant/+/telemetry", "plant/a/b/telemetry"));
        assert!(!topic_matches("plant/esp32_01/telemetry", "plant/esp32_01/status"));
        assert!(!topic_matches("plant/+", "plant"));
    }

    #[test]
    fn filter_validation() {
        assert!(is_valid_filter("a/+/c"));
        assert!(is_valid_filter("#"));
        assert!(!is_valid_filter(""));
        assert!(!is_valid_filter("a/#/c"));
        assert!(!is_valid_filter("a/b+"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview(b"not-json", 128), "not-json");
        assert_eq!(preview("абвгд".as_bytes(), 3), "абв…");
    }
}
