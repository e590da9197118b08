use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub mimetype: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
}

/// A stored part as the server reports it and as completion references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub e_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadPartResponse {
    pub part: CompletedPart,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteUploadRequest<'a> {
    pub filename: &'a str,
    pub parts: &'a [CompletedPart],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub location: String,
}
