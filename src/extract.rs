use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::hash::Hasher as _;
use twox_hash::XxHash64;

use crate::error::Error;
use crate::index::FileEntry;

/// Fields pulled out of a sidecar. All optional; a media file without a
/// sidecar gets the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub people: Vec<String>,
}

/// The metadata-extraction seam. The scan invokes this once per work item on
/// the CPU-bound pool.
pub trait MetadataExtractor: Send + Sync {
    fn extract(
        &self,
        media: &FileEntry,
        sidecar_json: Option<&[u8]>,
    ) -> Result<MediaMetadata, Error>;
}

/// Default extractor for the export tool's sidecar JSON shape.
pub struct SidecarExtractor;

#[derive(Deserialize)]
struct RawSidecar {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "photoTakenTime")]
    photo_taken_time: Option<RawTimestamp>,
    #[serde(rename = "creationTime")]
    creation_time: Option<RawTimestamp>,
    #[serde(rename = "geoData")]
    geo_data: Option<RawGeo>,
    people: Option<Vec<RawPerson>>,
}

#[derive(Deserialize)]
struct RawTimestamp {
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawGeo {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Deserialize)]
struct RawPerson {
    name: Option<String>,
}

impl MetadataExtractor for SidecarExtractor {
    fn extract(
        &self,
        media: &FileEntry,
        sidecar_json: Option<&[u8]>,
    ) -> Result<MediaMetadata, Error> {
        let Some(bytes) = sidecar_json else {
            return Ok(MediaMetadata::default());
        };
        let raw: RawSidecar = serde_json::from_slice(bytes).map_err(|e| {
            Error::Extraction(format!("invalid sidecar for '{}': {}", media.name, e))
        })?;

        let taken_at = parse_timestamp(raw.photo_taken_time.as_ref())
            .or_else(|| parse_timestamp(raw.creation_time.as_ref()));

        // the export tool writes 0.0/0.0 when no location was recorded
        let (latitude, longitude) = match raw.geo_data {
            Some(geo) => match (geo.latitude, geo.longitude) {
                (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => (Some(lat), Some(lon)),
                _ => (None, None),
            },
            None => (None, None),
        };

        let people = raw
            .people
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.name)
            .collect();

        Ok(MediaMetadata {
            title: raw.title.filter(|t| !t.is_empty()),
            description: raw.description.filter(|d| !d.is_empty()),
            taken_at,
            latitude,
            longitude,
            people,
        })
    }
}

fn parse_timestamp(raw: Option<&RawTimestamp>) -> Option<DateTime<Utc>> {
    let secs: i64 = raw?.timestamp.as_ref()?.parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Content identity of a media file.
pub fn content_hash(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FileKind;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    fn media_entry() -> FileEntry {
        FileEntry {
            path: PathBuf::from("IMG_0001.jpg"),
            rel_path: PathBuf::from("IMG_0001.jpg"),
            name: "IMG_0001.jpg".to_string(),
            size: 4,
            modified: UNIX_EPOCH,
            kind: FileKind::Media,
        }
    }

    #[test]
    fn test_extract_full_sidecar() {
        let json = br#"{
            "title": "IMG_0001.jpg",
            "description": "Lake at dawn",
            "photoTakenTime": {"timestamp": "1577882096", "formatted": "Jan 1, 2020"},
            "geoData": {"latitude": 46.94, "longitude": 7.44, "altitude": 540.0},
            "people": [{"name": "Ada"}, {"name": "Grace"}]
        }"#;
        let meta = SidecarExtractor
            .extract(&media_entry(), Some(json))
            .unwrap();
        assert_eq!(meta.title.as_deref(), Some("IMG_0001.jpg"));
        assert_eq!(meta.description.as_deref(), Some("Lake at dawn"));
        assert_eq!(meta.taken_at.unwrap().timestamp(), 1577882096);
        assert_eq!(meta.latitude, Some(46.94));
        assert_eq!(meta.people, vec!["Ada".to_string(), "Grace".to_string()]);
    }

    #[test]
    fn test_extract_zero_geo_is_dropped() {
        let json = br#"{"geoData": {"latitude": 0.0, "longitude": 0.0}}"#;
        let meta = SidecarExtractor
            .extract(&media_entry(), Some(json))
            .unwrap();
        assert_eq!(meta.latitude, None);
        assert_eq!(meta.longitude, None);
    }

    #[test]
    fn test_extract_without_sidecar_is_default() {
        let meta = SidecarExtractor.extract(&media_entry(), None).unwrap();
        assert_eq!(meta, MediaMetadata::default());
    }

    #[test]
    fn test_extract_invalid_json_is_extraction_error() {
        let err = SidecarExtractor
            .extract(&media_entry(), Some(b"{not json"))
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }
}
