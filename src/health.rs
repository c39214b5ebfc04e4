// §6 Health probe: `GET /health` returns `200` with a status payload.
// Grounded on the teacher's `health_check` in `handlers.rs`, minus the
// SQLite round-trip this system has no equivalent of.
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub time: DateTime<Utc>,
}

pub async fn health_check() -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        time: Utc::now(),
    })
}
