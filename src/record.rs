use serde::{Deserialize, Serialize};

/// Caption of one sampled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    timestamp: String,
    caption: String,
    /// On-screen text. Detection is not implemented; always empty.
    ocr_text: Vec<String>,
}

impl FrameRecord {
    pub fn new(seconds: f64, caption: impl Into<String>) -> Self {
        Self {
            timestamp: format_timestamp(seconds),
            caption: caption.into(),
            ocr_text: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn ocr_text(&self) -> &[String] {
        &self.ocr_text
    }
}

/// Frame records in the order they were sampled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameBatch(Vec<FrameRecord>);

impl FrameBatch {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub(crate) fn push(&mut self, record: FrameRecord) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameRecord> {
        self.0.iter()
    }
}

impl FromIterator<FrameRecord> for FrameBatch {
    fn from_iter<T: IntoIterator<Item = FrameRecord>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FrameBatch {
    type Item = &'a FrameRecord;
    type IntoIter = std::slice::Iter<'a, FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Formats seconds of video time as `MM:SS.mmm`.
///
/// Rounds to the nearest millisecond first so `59.9996` becomes `01:00.000`
/// rather than `00:60.000`. Minutes widen past two digits for long inputs.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let minutes = total_ms / 60_000;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{minutes:02}:{secs:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded_timestamps() {
        assert_eq!(format_timestamp(0.0), "00:00.000");
        assert_eq!(format_timestamp(1.0333), "00:01.033");
        assert_eq!(format_timestamp(75.5), "01:15.500");
        assert_eq!(format_timestamp(599.999), "09:59.999");
    }

    #[test]
    fn rounding_carries_into_minutes() {
        assert_eq!(format_timestamp(59.9996), "01:00.000");
    }

    #[test]
    fn negative_and_non_finite_clamp_to_zero() {
        assert_eq!(format_timestamp(-0.25), "00:00.000");
        assert_eq!(format_timestamp(f64::NAN), "00:00.000");
    }

    #[test]
    fn record_serializes_with_expected_field_names() {
        let record = FrameRecord::new(2.0, "a red car");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "timestamp": "00:02.000",
                "caption": "a red car",
                "ocr_text": []
            })
        );
    }

    #[test]
    fn batch_serializes_as_plain_array() {
        let batch: FrameBatch = [FrameRecord::new(0.0, "a"), FrameRecord::new(1.0, "b")]
            .into_iter()
            .collect();
        let value = serde_json::to_value(&batch).unwrap();
        assert!(value.is_array());
        assert_eq!(value[1]["caption"], "b");
    }
}
