use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AddRecordRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub tips: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRecordRequest {
    #[serde(default)]
    pub id: String,
}
