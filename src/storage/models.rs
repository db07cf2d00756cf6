/// One cataloged media file, ready for persistence. The row a re-scan of the
/// same relative path produces supersedes the old one.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    pub album_path: String,
    pub rel_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub last_modified: i64,
    pub content_hash: i64,
    pub match_phase: String,
    pub confidence: String,
    pub sidecar_path: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub taken_at: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub people: Vec<String>,
    pub scanned_at: String,
}
