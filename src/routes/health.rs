use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Health {
    status: &'static str,
    /// Whether `/identify` will ask for a gemological write-up.
    descriptions: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    Json(Health {
        status: "Available",
        descriptions: state.generator.is_some(),
    })
}
