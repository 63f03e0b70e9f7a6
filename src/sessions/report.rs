//! CSV summary of a session.

use sha2::{Digest, Sha256};

use crate::db::CassavaImage;

pub const FILE_FORMAT: &str = "csv";

const HEADER: &str = "image_name,total_lesions,necrosis_percentage,uploaded_at";

/// Quotes a field when it holds a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(images: &[CassavaImage]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for image in images {
        out.push_str(&format!(
            "{},{},{:.2},{}\n",
            csv_field(&image.image_name),
            image.total_lesions,
            image.necrosis_percentage,
            image.uploaded_at.to_rfc3339(),
        ));
    }
    out
}

/// Lowercase hex SHA-256 of the report body.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn report_path(session_id: &str) -> String {
    format!("{}/session_{}.{}", crate::storage::REPORTS_DIR, session_id, FILE_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn image(name: &str, lesions: i64, pct: f64) -> CassavaImage {
        CassavaImage {
            id: 1,
            session_id: 1,
            original_image: None,
            processed_image: None,
            image_name: name.to_string(),
            uploaded_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            total_lesions: lesions,
            necrosis_percentage: pct,
            confidence_score: None,
            metadata: None,
        }
    }

    #[test]
    fn test_render_csv_rows() {
        let csv = render_csv(&[image("leaf.jpg", 3, 12.5), image("a,b.jpg", 0, 0.0)]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "leaf.jpg,3,12.50,2024-06-01T12:00:00+00:00");
        assert!(lines[2].starts_with("\"a,b.jpg\",0,0.00,"));
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_report_path() {
        assert_eq!(report_path("abc"), "reports/session_abc.csv");
    }
}
